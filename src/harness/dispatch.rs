//! Element-type dispatch.

use crate::config::{Config, ElementKind};
use crate::error::Result;
use crate::harness::{Harness, RunReport};

/// Build a harness for the configured element type and run the configured
/// strategy.
///
/// The element type is resolved here, once; everything below is
/// monomorphized for it.
pub async fn run_configured(config: &Config) -> Result<RunReport> {
    match config.element {
        ElementKind::U8 => Harness::<u8>::new(config)?.run(config.strategy).await,
        ElementKind::I32 => Harness::<i32>::new(config)?.run(config.strategy).await,
        ElementKind::U64 => Harness::<u64>::new(config)?.run(config.strategy).await,
        ElementKind::F64 => Harness::<f64>::new(config)?.run(config.strategy).await,
        ElementKind::String => Harness::<String>::new(config)?.run(config.strategy).await,
    }
}
