//! HTTP and media stream gateway for IVR Pilot.
//!
//! Hosts the call-initiation endpoint, accepts the provider's media stream
//! per call, feeds audio to transcription and drives each call's session
//! through the configured flow.

pub mod calls;
pub mod connection;
pub mod effector;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod state;
pub mod twiml;

pub use calls::CallRuntime;
pub use effector::{CallControl, TwilioCallControl};
pub use registry::{CallEntry, CallSnapshot, SessionRegistry};
pub use server::{build_router, serve, start_gateway};
pub use state::GatewayState;
