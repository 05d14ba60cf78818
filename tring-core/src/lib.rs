//! Control-plane bridge between an application's call signaling and a native calling engine.
//! Coordinates call sessions, marshals data across the native boundary, routes native upcalls
//! to the application and services the engine's outbound HTTP requests.

pub mod api;
pub mod call_link;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod logging;
pub mod marshal;
pub mod native;
pub mod router;
pub mod service;
pub mod session;

#[cfg(feature = "native")]
pub mod sys;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{PeekInfo, TringApi, TringFrame};
pub use config::{ConfigError, TringConfig};
pub use error::{Result, TringError};
pub use logging::init_tracing;
pub use native::{EndpointHandle, NativeEngine, NativeSupport};
pub use router::CallbackRouter;
pub use service::TringService;
pub use session::{ActiveSession, CallId, ClientId, DemuxId};
