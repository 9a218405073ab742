//! Core types, config, errors, flow definition and call state machine for IVR Pilot.

pub mod config;
pub mod dtmf;
pub mod error;
pub mod flow;
pub mod machine;
pub mod protocol;
pub mod session;
