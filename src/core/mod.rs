//! Core module - Configuration, events, persistence and the event loop

pub mod config;
pub mod events;
pub mod runtime;
pub mod state;
pub mod store;
