//! Configuration for pepperd.

use clap::Parser;
use std::path::PathBuf;

/// pepperd - PEPPER privacy-preserving proximity tracing daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "pepperd")]
#[command(about = "BLE+UWB privacy-preserving proximity tracing runtime")]
pub struct Config {
    /// Epoch duration, in seconds.
    #[arg(long, env = "PEPPER_EPOCH_DURATION_S", default_value = "900")]
    pub epoch_duration_s: u64,

    /// BLE advertisement interval, in milliseconds.
    #[arg(long, env = "PEPPER_ADV_INTERVAL_MS", default_value = "200")]
    pub adv_interval_ms: u32,

    /// Number of advertisement events spent on each EBID slice before
    /// rotating to the next.
    #[arg(long, env = "PEPPER_ADVS_PER_SLICE", default_value = "1")]
    pub advs_per_slice: u32,

    /// Minimum EBID-derived TWR offset, in milliseconds.
    #[arg(long, env = "PEPPER_MIN_OFFSET_MS", default_value = "100")]
    pub min_offset_ms: u32,

    /// Seconds since last seen before a peer is dropped from TWR scheduling.
    #[arg(long, env = "PEPPER_MIA_TIMEOUT_S", default_value = "5")]
    pub mia_timeout_s: u64,

    /// Maximum number of simultaneously tracked encounter data.
    #[arg(long, env = "PEPPER_ED_CAPACITY", default_value = "10")]
    pub ed_capacity: usize,

    /// Number of contact records kept per epoch.
    #[arg(long, env = "PEPPER_TOP_K", default_value = "8")]
    pub top_k: usize,

    /// Minimum exposure time, in seconds, for a contact to survive
    /// finalisation.
    #[arg(long, env = "PEPPER_MIN_EXPOSURE_S", default_value = "30")]
    pub min_exposure_s: u64,

    /// Minimum UWB request count for a contact's distance average to count.
    #[arg(long, env = "PEPPER_MIN_REQUEST_COUNT", default_value = "1")]
    pub min_request_count: u32,

    /// Maximum plausible average UWB distance, in centimetres.
    #[arg(long, env = "PEPPER_MAX_DISTANCE_CM", default_value = "200.0")]
    pub max_distance_cm: f64,

    /// Number of pre-allocated TWR scheduling slots.
    #[arg(long, env = "PEPPER_TWR_SLOT_POOL", default_value = "40")]
    pub twr_slot_pool: usize,

    /// Request-side (tx) TWR offset tweak, in ticks. May be negative provided
    /// `ticks + min_offset_ms` stays positive.
    #[arg(long, env = "PEPPER_TX_OFFSET_TICKS", default_value = "0")]
    pub tx_offset_ticks: i16,

    /// Listen-side (rx) TWR offset tweak, in ticks. Same sign constraint as
    /// `tx_offset_ticks`.
    #[arg(long, env = "PEPPER_RX_OFFSET_TICKS", default_value = "0")]
    pub rx_offset_ticks: i16,

    /// Disable BLE-RSSI obfuscation (enabled by default).
    #[arg(long, env = "PEPPER_NO_OBFUSCATION")]
    pub no_obfuscation: bool,

    /// Epoch summary sink encoding.
    #[arg(long, env = "PEPPER_SINK_FORMAT", default_value = "json")]
    pub sink_format: SinkFormatArg,

    /// Write epoch summaries to this file instead of stdout.
    #[arg(long, env = "PEPPER_SINK_PATH")]
    pub sink_path: Option<PathBuf>,

    /// Number of epoch iterations to run before exiting; unset runs forever.
    #[arg(long, env = "PEPPER_ITERATIONS")]
    pub iterations: Option<u32>,

    /// Align the first epoch boundary to the global epoch-duration grid.
    #[arg(long, env = "PEPPER_ALIGN")]
    pub align: bool,

    /// Enable verbose logging.
    #[arg(short, long, env = "PEPPER_VERBOSE")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SinkFormatArg {
    Json,
    Cbor,
}

impl Config {
    /// Enforce the sign constraint from the TWR-offset spec note: a tick
    /// offset may be negative, but its sum with `min_offset_ms` must stay
    /// positive, or every EBID-derived fire time would be non-positive.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.epoch_duration_s == 0 {
            anyhow::bail!("epoch_duration_s must be nonzero");
        }
        if self.min_exposure_s >= self.epoch_duration_s {
            anyhow::bail!("min_exposure_s must be smaller than epoch_duration_s");
        }
        if (self.tx_offset_ticks as i64) + (self.min_offset_ms as i64) <= 0 {
            anyhow::bail!(
                "tx_offset_ticks ({}) + min_offset_ms ({}) must be positive",
                self.tx_offset_ticks,
                self.min_offset_ms
            );
        }
        if (self.rx_offset_ticks as i64) + (self.min_offset_ms as i64) <= 0 {
            anyhow::bail!(
                "rx_offset_ticks ({}) + min_offset_ms ({}) must be positive",
                self.rx_offset_ticks,
                self.min_offset_ms
            );
        }
        Ok(())
    }

    pub fn epoch_params(&self) -> pepper_engine::EpochParams {
        pepper_engine::EpochParams {
            duration_s: self.epoch_duration_s,
            min_exposure_s: self.min_exposure_s,
            top_k: self.top_k,
            max_eds: self.ed_capacity,
            adv_interval_ms: self.adv_interval_ms,
            advs_per_slice: self.advs_per_slice,
            mia_timeout_s: self.mia_timeout_s,
            twr_slot_pool: self.twr_slot_pool,
            min_offset_ms: self.min_offset_ms,
            min_request_count: self.min_request_count,
            max_distance_cm: self.max_distance_cm,
            iterations: self.iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            epoch_duration_s: 900,
            adv_interval_ms: 200,
            advs_per_slice: 1,
            min_offset_ms: 100,
            mia_timeout_s: 5,
            ed_capacity: 10,
            top_k: 8,
            min_exposure_s: 30,
            min_request_count: 1,
            max_distance_cm: 200.0,
            twr_slot_pool: 40,
            tx_offset_ticks: 0,
            rx_offset_ticks: 0,
            no_obfuscation: false,
            sink_format: SinkFormatArg::Json,
            sink_path: None,
            iterations: None,
            align: false,
            verbose: false,
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn negative_tx_offset_beyond_min_offset_is_rejected() {
        let mut config = base_config();
        config.tx_offset_ticks = -150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_tx_offset_within_min_offset_is_accepted() {
        let mut config = base_config();
        config.tx_offset_ticks = -50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_exposure_must_be_smaller_than_duration() {
        let mut config = base_config();
        config.min_exposure_s = 900;
        assert!(config.validate().is_err());
    }
}
