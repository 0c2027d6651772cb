//! Execution-request orchestration.
//!
//! This module owns the run lifecycle (start, supersede, abort), the stream
//! consumer that feeds the display, and the session loop that presentation
//! layers drive through commands and observe through events.

mod consumer;
mod controller;
mod session;

pub use consumer::{ConsumerEvent, StreamConsumer};
pub use controller::{Run, RunController};
pub use session::run_session;
