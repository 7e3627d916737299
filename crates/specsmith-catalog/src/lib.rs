//! Block catalog sources.
//!
//! The editor only ever sees a [`BlockCatalog`](specsmith_core::BlockCatalog)
//! passed into each call. This crate produces those catalogs: from a local
//! file, the platform API with an on-disk cache, or a fallback file, and
//! keeps a shared [`CatalogHandle`] current on a timer.

pub mod fetcher;
pub mod handle;
pub mod wire;

pub use fetcher::{CacheInfo, CacheMetadata, CacheStatus, CatalogFetcher, CatalogSource, LoadedCatalog};
pub use handle::CatalogHandle;
pub use wire::parse_blocks;
