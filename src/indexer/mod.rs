//! Indexer layer: rate-limited clients (Component A), protocol adapters
//! (Component B), and the registry that wires configured backends into
//! `Arc<dyn Adapter>` instances the aggregator consumes.

pub mod adapters;
pub mod client;
pub mod definition;
pub mod field_extractor;
pub mod filters;
pub mod registry;
pub mod result_builder;
pub mod selector;
pub mod template;
pub mod traits;

pub use client::IndexerClient;
pub use registry::IndexerRegistry;
pub use traits::Adapter;
