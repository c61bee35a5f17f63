//! sessionguard - resilient calls and polite pacing for remote agent sessions
//!
//! Two pieces sit between higher-level session code and the upstream job API:
//! the `http::Executor`, which retries, backs off and cancels outbound
//! requests, and the `throttle`, which decides whether a session may be
//! poked again. `session::SessionActions` shows them working together.

pub mod config;
pub mod error;
pub mod http;
pub mod id;
pub mod session;
pub mod throttle;

pub use config::Config;
pub use error::{Result, SessionGuardError};
pub use http::{Executor, HttpResponse, HttpTransport, RequestDescriptor, RequestError};
pub use throttle::{SessionSnapshot, ThrottleSettings, should_interact, should_interact_at};
