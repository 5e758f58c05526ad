//! Rolling-buffer recording
//!
//! - `RollingBuffer` holds the current retention window and restarts the
//!   encoder when the window grows too old
//! - `RecordingCoordinator` owns the buffer and serializes segment arrivals,
//!   saves, deferred restarts and the elapsed tick
//! - `DashcamSession` ties device acquisition to the recorder

pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod elapsed;
pub mod session;
pub mod state;
pub mod stream;

pub use buffer::{RollingBuffer, SegmentOutcome};
pub use config::{load_config, save_config, BufferConfig};
pub use coordinator::{RecorderHandle, RecordingCoordinator, RecordingEvent};
pub use elapsed::ElapsedTimePublisher;
pub use session::DashcamSession;
pub use state::{RecorderState, RecorderStatus, SaveOutcome, SkipReason};
pub use stream::{Segment, SegmentSink, SegmentStream, StreamError, StreamEvent, StreamState};
