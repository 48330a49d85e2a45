//! Stateful runtime on top of `pepper-core`'s wire types and `pepper-radio`'s
//! BLE framing: encounter-data accumulation, UWB ranging scheduling, the
//! epoch state machine, current-time hooks, serialisation sinks, and the
//! controller that owns all of the above for one running device.

pub mod arena;
pub mod controller;
pub mod current_time;
pub mod ed;
pub mod epoch;
pub mod sink;
pub mod twr;

pub use controller::{Controller, ControllerError, RunStatus};
pub use current_time::{classify_offset, PreHookDecision};
pub use ed::{Ed, EdError, EdList};
pub use epoch::{EndOfEpochOutcome, EpochEngine, EpochError, EpochParams, EpochState};
pub use sink::{decode_cbor, encode_cbor, read_cbor_records, FileSink, Format, Sink, SinkError, StdoutSink};
pub use twr::{ebid_offset_ms, time_of_flight_to_cm, RangingResult, TwrAction, TwrPool, UwbSemaphore};
