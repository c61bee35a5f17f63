//! Outbound HTTP layer - resilient executor for the session API
//!
//! This module provides:
//! - `HttpTransport` trait with a reqwest implementation and a scripted mock
//! - Retry classification and backoff (`RetryPolicy`)
//! - In-flight registry for cancellation by request id
//! - `RequestGate` admission control (concurrency, spacing, 429 backoff)
//! - `Executor`, which ties them together
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sessionguard::http::{Executor, ReqwestTransport, RequestDescriptor};
//!
//! let executor = Executor::new(Arc::new(ReqwestTransport::new()?));
//! let response = executor
//!     .execute(RequestDescriptor::get("https://example.com/v1/sessions").with_request_id("list"))
//!     .await?;
//! ```

pub mod error;
pub mod executor;
pub mod gate;
pub mod mock;
pub mod observer;
pub mod registry;
pub mod retry;
pub mod transport;

pub use error::{LastFailure, RequestError, TransportError};
pub use executor::{DEFAULT_TIMEOUT, Executor};
pub use gate::{GateConfig, GatePermit, RateLimitState, RequestGate};
pub use mock::{MockTransport, RecordedCall};
pub use observer::{FailureReport, RequestObserver, RetryEvent, TracingObserver, excerpt};
pub use registry::{InFlightRegistry, RegistrationGuard};
pub use retry::{RetryPolicy, StatusClass, classify_status, parse_retry_after};
pub use transport::{HttpResponse, HttpTransport, RequestDescriptor, ReqwestTransport};
