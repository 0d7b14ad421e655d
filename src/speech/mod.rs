//! Speech dispatch
//!
//! Engine discovery, request gating, concurrency control and process
//! supervision for text-to-speech requests.

pub mod dispatcher;
pub mod engine;
pub mod gate;
pub mod limiter;
pub mod request;
pub mod runner;
pub mod speed;
pub mod status;
pub mod timeout;

pub use dispatcher::Dispatcher;
pub use engine::{Engine, EngineChoice, EngineRegistry, SelectedEngine};
pub use request::SpeechRequest;
pub use status::{Mode, SpeakOutcome, StatusDetails};
