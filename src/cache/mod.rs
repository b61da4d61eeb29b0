//! HTTP Cache Module
//!
//! Cacheability rules, cache keys, Vary metadata, stored entry encoding and
//! the tee that captures origin bodies.

pub mod directives;
mod determiner;
mod key;
mod object;
mod tee;
mod vary;


// Re-export public types
pub use determiner::{CacheDecision, Determiner, CACHEABLE_BY_DEFAULT};
pub use key::{extend_key, parse_vary, DefaultKey, KeyStrategy, QueryIgnoringKey};
pub use object::{
    decode_header_block, encode_header_block, CachedObject, EntryMeta, ObjectStore,
    MAX_HEADER_BLOCK,
};
pub use tee::{tee, Capture, CaptureHandle, TeeStream};
pub use vary::VaryStore;
