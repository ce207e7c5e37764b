//! JSON wire formats: channel frames, completion events and HTTP bodies.

pub mod message;
pub mod types;
