//! netcache - A client-side HTTP response cache
//!
//! Serves repeated requests from a bounded in-memory LRU and a crash-safe,
//! journal-backed disk LRU, revalidating stale entries with conditional
//! requests.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod operation;
mod tasks;
pub mod transport;

pub use config::Config;
pub use engine::{CancellationToken, Engine, EngineStats, OperationHandle};
pub use error::{CacheError, EngineError, TransportError};
pub use operation::{HttpMethod, Operation, OperationListener, OperationStatus};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
