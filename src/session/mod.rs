//! Realtime session state: event decoding, the transcript store, guardrail
//! verdicts, agent handoffs, and the controller that ties them together.

pub mod controller;
pub mod events;
pub mod guardrail;
pub mod handoff;
pub mod reducer;
pub mod replay;
pub mod transcript;

pub use controller::{
    RealtimeTransport, SessionController, SessionNotification, SessionStatus, TransportSignal,
};
pub use events::SessionEvent;
pub use reducer::{Reduction, SessionReducer};
pub use replay::ReplayTransport;
pub use transcript::{Transcript, TranscriptItem};
