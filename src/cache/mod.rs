//! Two-tier caching in front of the content API.
//!
//! - The response cache keeps raw responses, bounded and evicted oldest-first
//! - The interceptor picks a strategy per request class and serves stale copies offline
//! - The bridge decodes cacheable payloads into structured-store scopes

mod bridge;
mod interceptor;
mod responses;
mod traits;

pub use bridge::{decode, BridgeMessage, ChapterRef, DEFAULT_TRANSLATION};
pub(crate) use bridge::{commentary_records, parse_commentary};
pub use interceptor::{CacheCoordinator, ResponseCacheStats};
pub use responses::{request_key, CachedResponse, NoopStorage, ResponseStorage, SqliteResponseCache};
pub use traits::{InterceptedResponse, RequestClass, ResponseOrigin, OFFLINE_CACHE_HEADER};

#[cfg(test)]
pub(crate) use interceptor::tests::{coordinator, ScriptedTransport};
