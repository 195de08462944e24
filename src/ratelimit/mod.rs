//! Admission logic: gating, key derivation, counting and blocking.

mod block;
mod gate;
mod key;
mod limiter;
mod limits;
mod recorder;
mod window;

pub use block::{block_until, check_already_blocked, decide_should_block, BlockState};
pub use gate::{AccessGate, BypassReason, GateVerdict};
pub use key::{TrackingKey, TrackingMode, TrackingScope};
pub use limiter::{AdmissionRequest, Decision, RateLimiter};
pub use limits::{EffectiveLimits, LimitOverrides};
pub use recorder::{RecordOutcome, RecordResult, Recorder, RequestMetadata};
pub use window::{count_in_window, WindowPosition};
