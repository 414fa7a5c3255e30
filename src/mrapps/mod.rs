//! Built-in map and reduce functions, looked up by name.

mod basic;
mod grep;
mod wc;

use std::sync::Arc;

use crate::mr::{Mapper, Reducer};

pub use basic::{Count, First, IdentityMapper, IdentityReducer, NoPass, Sum};
pub use grep::Grep;
pub use wc::{FileWordCount, WordCount};

pub fn get_mapper(name: &str) -> Result<Arc<dyn Mapper>, anyhow::Error> {
    if let Some(pattern) = name.strip_prefix("grep:") {
        return Ok(Arc::new(Grep::new(pattern)?));
    }
    match name {
        "wc" => Ok(Arc::new(WordCount)),
        "wcfile" => Ok(Arc::new(FileWordCount)),
        "identity" => Ok(Arc::new(IdentityMapper)),
        _ => Err(anyhow::anyhow!("Unknown mapper: {}", name)),
    }
}

pub fn get_reducer(name: &str) -> Result<Arc<dyn Reducer>, anyhow::Error> {
    match name {
        "sum" => Ok(Arc::new(Sum)),
        "count" => Ok(Arc::new(Count)),
        "identity" => Ok(Arc::new(IdentityReducer)),
        "first" => Ok(Arc::new(First)),
        "nopass" => Ok(Arc::new(NoPass)),
        _ => Err(anyhow::anyhow!("Unknown reducer: {}", name)),
    }
}
