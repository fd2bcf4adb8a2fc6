//! `IndexerRegistry` — builds the `Arc<dyn Adapter>` set from configuration
//! (§9 "Backends register themselves at startup from configuration"). The
//! aggregator depends only on `Adapter`; this is the one place that knows
//! about concrete adapter types.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use super::adapters::{HtmlAdapter, RssAdapter, TorznabAdapter};
use super::definition::IndexerDefinition;
use super::traits::Adapter;
use crate::config::BackendConfig;
use crate::error::Result;
use crate::models::{Indexer, IndexerKind};

/// A configured indexer alongside the adapter instance that serves it.
pub struct RegisteredIndexer {
    pub indexer: Indexer,
    pub adapter: Arc<dyn Adapter>,
}

/// Deterministic id derivation so a backend's identity survives process
/// restarts without needing a separate admin-assigned id in the config file.
fn stable_id(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("foliofox-indexer:{name}").as_bytes())
}

#[derive(Default)]
pub struct IndexerRegistry {
    entries: HashMap<Uuid, RegisteredIndexer>,
}

impl IndexerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every statically configured backend (Prowlarr/Jackett/
    /// Torznab/Newznab aggregators share the Torznab wire format; `rss`
    /// backends get the generic feed adapter).
    pub fn register_backends(&mut self, backends: &[BackendConfig]) {
        for backend in backends {
            let id = stable_id(&backend.name);
            let kind = match backend.kind.to_ascii_lowercase().as_str() {
                "rss" => IndexerKind::Rss,
                "newznab" => IndexerKind::Newznab,
                _ => IndexerKind::Torznab,
            };
            let indexer = Indexer {
                id,
                name: backend.name.clone(),
                base_url: backend.base_url.clone(),
                api_path: None,
                kind,
                supports_search: true,
                supports_download: true,
                priority: 50,
                rate_limit_requests: backend.rate_limit_requests,
                rate_limit_window_secs: backend.rate_limit_window_secs,
                timeout_secs: backend.timeout_s.clamp(5, 300) as u32,
                is_active: true,
                user_agent: "foliofox/0.1".to_string(),
            };

            let adapter: Arc<dyn Adapter> = match kind {
                IndexerKind::Rss => Arc::new(RssAdapter::new(&indexer, backend.api_key.as_deref())),
                _ => Arc::new(TorznabAdapter::new(&indexer, backend.api_key.as_deref())),
            };

            self.entries.insert(id, RegisteredIndexer { indexer, adapter });
        }
    }

    /// Register every Cardigann-style YAML definition found directly under
    /// `dir` as an `Html`/direct-scraper indexer. Missing or unreadable
    /// files are logged and skipped rather than failing startup.
    pub fn register_definitions_dir(&mut self, dir: &Path, proxy_url: Option<&str>) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir).map_err(crate::error::Error::Io)? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                continue;
            }
            match IndexerDefinition::from_file(&path) {
                Ok(definition) => self.register_definition(definition, proxy_url),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load indexer definition"),
            }
        }
        Ok(())
    }

    pub fn register_definition(&mut self, definition: IndexerDefinition, proxy_url: Option<&str>) {
        let id = stable_id(&definition.id);
        let Some(base_url) = definition.base_url().map(str::to_string) else {
            tracing::warn!(indexer = %definition.id, "definition has no base url, skipping");
            return;
        };
        let indexer = Indexer {
            id,
            name: definition.name.clone(),
            base_url,
            api_path: None,
            kind: IndexerKind::Html,
            supports_search: true,
            supports_download: true,
            priority: 50,
            rate_limit_requests: 1,
            rate_limit_window_secs: 2,
            timeout_secs: 30,
            is_active: true,
            user_agent: "foliofox/0.1".to_string(),
        };
        match HtmlAdapter::new(id, definition, proxy_url, HashMap::new(), 1, 2) {
            Ok(adapter) => {
                self.entries.insert(
                    id,
                    RegisteredIndexer {
                        indexer,
                        adapter: Arc::new(adapter),
                    },
                );
            }
            Err(e) => tracing::warn!(indexer = %indexer.name, error = %e, "failed to build html adapter"),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<dyn Adapter>> {
        self.entries.get(&id).map(|e| e.adapter.clone())
    }

    pub fn indexer(&self, id: Uuid) -> Option<Indexer> {
        self.entries.get(&id).map(|e| e.indexer.clone())
    }

    pub fn all(&self) -> Vec<Indexer> {
        self.entries.values().map(|e| e.indexer.clone()).collect()
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.entries
            .values()
            .filter(|e| e.indexer.is_active)
            .map(|e| e.indexer.id)
            .collect()
    }

    pub fn adapters(&self) -> Vec<(Uuid, Arc<dyn Adapter>)> {
        self.entries
            .values()
            .map(|e| (e.indexer.id, e.adapter.clone()))
            .collect()
    }

    /// Test-only direct registration, for exercising the aggregator and
    /// health monitor against fake adapters without a real config source.
    #[cfg(test)]
    pub fn register_for_test(&mut self, id: Uuid, name: &str, adapter: Arc<dyn Adapter>) {
        let indexer = Indexer {
            id,
            name: name.to_string(),
            base_url: "http://test.invalid".to_string(),
            api_path: None,
            kind: IndexerKind::Api,
            supports_search: true,
            supports_download: false,
            priority: 50,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            timeout_secs: 30,
            is_active: true,
            user_agent: "foliofox/0.1".to_string(),
        };
        self.entries.insert(id, RegisteredIndexer { indexer, adapter });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    #[test]
    fn test_register_backends_assigns_stable_ids_across_calls() {
        let backend = BackendConfig {
            name: "my-prowlarr".into(),
            kind: "torznab".into(),
            base_url: "http://localhost:9696".into(),
            api_key: Some("key".into()),
            timeout_s: 30,
            rate_limit_requests: 5,
            rate_limit_window_secs: 60,
        };
        let mut a = IndexerRegistry::new();
        a.register_backends(&[backend.clone()]);
        let mut b = IndexerRegistry::new();
        b.register_backends(&[backend]);
        assert_eq!(a.active_ids(), b.active_ids());
    }
}
