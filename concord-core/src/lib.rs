//! Concord Core - Shared Types
//!
//! Identity types, errors, configuration, cache scopes, and the
//! cluster-unique identifier generator. Every other Concord crate depends on
//! this one; it has no knowledge of caches or locks beyond naming their scopes.

pub mod clock;
pub mod config;
pub mod error;
pub mod id_generator;
pub mod identity;
pub mod scope;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConcordConfig, DEFAULT_LOCK_CACHE_NAME, DEFAULT_LOCK_REQUEST_CACHE_NAME};
pub use error::{CacheError, ConcordError, ConcordResult, ConfigError, IdError, LockError};
pub use id_generator::{decode_id, encode_id, IdGenerator, IdParts, DEFAULT_EPOCH_MILLIS};
pub use identity::{NodeId, ServerNumber, Timestamp, MAX_SERVER_NUMBER, SERVER_NUMBER_SLOTS};
pub use scope::{CacheScope, CacheScopeParseError};
