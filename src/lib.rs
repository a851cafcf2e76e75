pub mod channel;
pub mod config;
pub mod error;
pub mod harness;
pub mod pool;
pub mod sync;
pub mod types;

pub use config::{Config, Discipline, ElementKind, Strategy};
pub use error::{Error, Result};
pub use harness::{run_configured, Harness, RunReport};
pub use pool::{shared_pool, ArrayPool, Buffer};
