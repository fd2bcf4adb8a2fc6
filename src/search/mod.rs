//! Search Aggregator and Result Processor (Components E and F, §4.E, §4.F).

pub mod aggregator;
pub mod processor;

pub use aggregator::{RegistryIndexerLookup, SearchAggregator};
