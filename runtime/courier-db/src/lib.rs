//! Embedded-engine plumbing for the sqlcourier worker: the rusqlite handle
//! wrapper, the path-keyed handle registry, and the one-shot readiness gate
//! the dispatcher waits on before touching the engine.

pub mod ready;
pub mod registry;
pub mod sqlite;
pub mod value;

pub use ready::ReadyGate;
pub use registry::{ClosePolicy, HandleRegistry, OpenPolicy, RegistryConfig, MEMORY_SENTINEL};
pub use sqlite::{BatchOp, EngineConfig, QueryResult, SqliteHandle, DEFAULT_BUSY_TIMEOUT_MS};
