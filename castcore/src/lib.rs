mod arrays;
mod barrier;
mod cache;
mod engine;
mod error;
mod object;
mod oracle;
mod result;
mod strategy;
mod types;

pub use arrays::ElementAddress;
pub use barrier::*;
pub use cache::{CastCache, CastCacheCreateInfo, CastCacheSettings, CastCacheStats};
pub use engine::*;
pub use error::CastError;
pub use object::*;
pub use oracle::*;
pub use result::*;
pub use strategy::*;
pub use types::*;
