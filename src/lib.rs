//! Client for a remote code execution backend.
//!
//! The crate is split into a pure core ([`model`], [`selection`]), the
//! backend [`engine`], and the [`orchestrator`] that turns user triggers into
//! runs whose output reaches a [`sink::DisplaySink`] exactly once and in order.

pub mod cli;
pub mod engine;
pub mod errors;
pub mod listing;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod selection;
pub mod sink;
