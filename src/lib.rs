//! Campaign dispatch orchestrator.
//!
//! Background process that drains a shared queue of outbound messages,
//! grouped by campaign and by contact. Pacing comes from per-campaign
//! delays; crash recovery comes from a timestamp-based revival sweep.
//! The shared store is the only synchronization point between workers.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;

pub mod model;
pub mod payload;
pub mod template;

pub mod channel;
pub mod store;

pub mod orchestrator;
