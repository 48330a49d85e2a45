//! Serialisation sink (§6 "uploader/printer hand-off", §10.4): given a
//! finalised [`EpochSummary`], a sink may copy, serialise, or drop it. No
//! back-pressure is applied to the core; the controller calls `emit` on a
//! lower-priority path than the epoch-boundary flow that produced the
//! summary.
//!
//! Grounded on the reference firmware's `serializer.c` (dual CBOR/JSON
//! encoders) for the wire shape, and on the manual `Encoder`/`Decoder` usage
//! in `tyler-potyondy-nrf-rpc::packet` for the minicbor idiom — here using
//! `#[derive(Encode, Decode)]` wire-mirror structs rather than that crate's
//! hand-rolled `no_std` byte pushing, since this sink runs on a hosted
//! target with the `std`/`derive` minicbor features available.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use minicbor::{Decode, Encode};
use pepper_core::types::{BleSummary, ContactRecord, EpochSummary, Pet, PetPair, UwbSummary};
use thiserror::Error;
use tracing::debug;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("CBOR encode error: {0}")]
    CborEncode(String),
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed PET byte length: expected 32, got {0}")]
    BadPetLength(usize),
}

/// The wire encoding a sink emits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Cbor,
}

/// An opaque hand-off capability for finalised epoch summaries.
pub trait Sink: Send + Sync {
    fn emit(&self, summary: &EpochSummary) -> Result<(), SinkError>;
}

/// Writes each summary to stdout, one record per call.
pub struct StdoutSink {
    format: Format,
}

impl StdoutSink {
    pub fn new(format: Format) -> Self {
        Self { format }
    }
}

impl Sink for StdoutSink {
    fn emit(&self, summary: &EpochSummary) -> Result<(), SinkError> {
        match self.format {
            Format::Json => {
                let text = serde_json::to_string(summary)?;
                println!("{text}");
            }
            Format::Cbor => {
                let bytes = encode_cbor(summary)?;
                std::io::stdout().write_all(&bytes)?;
            }
        }
        debug!(timestamp = summary.timestamp, contacts = summary.contacts.len(), "sink emitted");
        Ok(())
    }
}

/// Appends each summary to a file as a length-prefixed record (4-byte
/// little-endian length followed by the encoded payload), so multiple
/// epochs can be read back sequentially.
pub struct FileSink {
    path: PathBuf,
    format: Format,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, format: Format) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

impl Sink for FileSink {
    fn emit(&self, summary: &EpochSummary) -> Result<(), SinkError> {
        let payload = match self.format {
            Format::Json => serde_json::to_vec(summary)?,
            Format::Cbor => encode_cbor(summary)?,
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(&payload)?;
        Ok(())
    }
}

/// Read every length-prefixed record written by a [`FileSink`] in
/// [`Format::Cbor`] back out, in order.
pub fn read_cbor_records(path: impl AsRef<Path>) -> Result<Vec<EpochSummary>, SinkError> {
    let bytes = std::fs::read(path)?;
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor + 4 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        let record = &bytes[cursor..cursor + len];
        out.push(decode_cbor(record)?);
        cursor += len;
    }
    Ok(out)
}

pub fn encode_cbor(summary: &EpochSummary) -> Result<Vec<u8>, SinkError> {
    let wire = SummaryWire::from(summary);
    minicbor::to_vec(&wire).map_err(|e| SinkError::CborEncode(e.to_string()))
}

pub fn decode_cbor(bytes: &[u8]) -> Result<EpochSummary, SinkError> {
    let wire: SummaryWire = minicbor::decode(bytes).map_err(|e| SinkError::CborDecode(e.to_string()))?;
    wire.try_into()
}

#[derive(Debug, Clone, Encode, Decode)]
struct BleWire {
    #[n(0)]
    exposure_s: u32,
    #[n(1)]
    scan_count: u32,
    #[n(2)]
    avg_rssi_dbm: f32,
}

impl From<BleSummary> for BleWire {
    fn from(b: BleSummary) -> Self {
        Self {
            exposure_s: b.exposure_s,
            scan_count: b.scan_count,
            avg_rssi_dbm: b.avg_rssi_dbm,
        }
    }
}

impl From<BleWire> for BleSummary {
    fn from(w: BleWire) -> Self {
        Self {
            exposure_s: w.exposure_s,
            scan_count: w.scan_count,
            avg_rssi_dbm: w.avg_rssi_dbm,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct UwbWire {
    #[n(0)]
    exposure_s: u32,
    #[n(1)]
    req_count: u32,
    #[n(2)]
    avg_d_cm: f32,
    #[n(3)]
    avg_los_pct: f32,
}

impl From<UwbSummary> for UwbWire {
    fn from(u: UwbSummary) -> Self {
        Self {
            exposure_s: u.exposure_s,
            req_count: u.req_count,
            avg_d_cm: u.avg_d_cm,
            avg_los_pct: u.avg_los_pct,
        }
    }
}

impl From<UwbWire> for UwbSummary {
    fn from(w: UwbWire) -> Self {
        Self {
            exposure_s: w.exposure_s,
            req_count: w.req_count,
            avg_d_cm: w.avg_d_cm,
            avg_los_pct: w.avg_los_pct,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct ContactWire {
    #[n(0)]
    et: Vec<u8>,
    #[n(1)]
    rt: Vec<u8>,
    #[n(2)]
    ble: Option<BleWire>,
    #[n(3)]
    uwb: Option<UwbWire>,
}

impl From<&ContactRecord> for ContactWire {
    fn from(c: &ContactRecord) -> Self {
        Self {
            et: c.pet.et.0.to_vec(),
            rt: c.pet.rt.0.to_vec(),
            ble: c.ble.map(BleWire::from),
            uwb: c.uwb.map(UwbWire::from),
        }
    }
}

impl TryFrom<ContactWire> for ContactRecord {
    type Error = SinkError;

    fn try_from(w: ContactWire) -> Result<Self, Self::Error> {
        Ok(Self {
            pet: PetPair {
                et: pet_from_vec(w.et)?,
                rt: pet_from_vec(w.rt)?,
            },
            ble: w.ble.map(BleSummary::from),
            uwb: w.uwb.map(UwbSummary::from),
        })
    }
}

fn pet_from_vec(bytes: Vec<u8>) -> Result<Pet, SinkError> {
    let len = bytes.len();
    let array: [u8; 32] = bytes.try_into().map_err(|_| SinkError::BadPetLength(len))?;
    Ok(Pet(array))
}

#[derive(Debug, Clone, Encode, Decode)]
struct SummaryWire {
    #[n(0)]
    timestamp: u64,
    #[n(1)]
    contacts: Vec<ContactWire>,
}

impl From<&EpochSummary> for SummaryWire {
    fn from(s: &EpochSummary) -> Self {
        Self {
            timestamp: s.timestamp,
            contacts: s.contacts.iter().map(ContactWire::from).collect(),
        }
    }
}

impl TryFrom<SummaryWire> for EpochSummary {
    type Error = SinkError;

    fn try_from(w: SummaryWire) -> Result<Self, Self::Error> {
        let contacts = w
            .contacts
            .into_iter()
            .map(ContactRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            timestamp: w.timestamp,
            contacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_summary() -> EpochSummary {
        EpochSummary {
            timestamp: 12345,
            contacts: vec![ContactRecord {
                pet: PetPair {
                    et: Pet([1u8; 32]),
                    rt: Pet([2u8; 32]),
                },
                ble: Some(BleSummary {
                    exposure_s: 120,
                    scan_count: 40,
                    avg_rssi_dbm: -55.0,
                }),
                uwb: None,
            }],
        }
    }

    #[test]
    fn cbor_roundtrips() {
        let summary = sample_summary();
        let bytes = encode_cbor(&summary).unwrap();
        let decoded = decode_cbor(&bytes).unwrap();
        assert_eq!(decoded, summary);
    }

    #[test]
    fn file_sink_writes_readable_cbor_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epochs.cbor");
        let sink = FileSink::new(&path, Format::Cbor);

        sink.emit(&sample_summary()).unwrap();
        sink.emit(&sample_summary()).unwrap();

        let records = read_cbor_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], sample_summary());
    }

    #[test]
    fn json_sink_writes_parseable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epochs.json");
        let sink = FileSink::new(&path, Format::Json);
        sink.emit(&sample_summary()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let parsed: EpochSummary = serde_json::from_slice(&bytes[4..4 + len]).unwrap();
        assert_eq!(parsed, sample_summary());
    }
}
