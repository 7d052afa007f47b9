//! Offline caching and annotation sync for a scripture study reader.
//!
//! Outbound reads go through [`cache::CacheCoordinator`], which keeps a bounded raw
//! response cache and feeds decodable payloads into the [`store::StructuredStore`].
//! User notes, tags and reading plans are reconciled with a remote store by
//! [`sync::SyncEngine`]. [`download::DownloadOrchestrator`] primes the store in bulk.

pub mod cache;
pub mod canon;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod download;
pub mod error;
pub mod logging;
pub mod store;
pub mod sync;
pub mod transport;
