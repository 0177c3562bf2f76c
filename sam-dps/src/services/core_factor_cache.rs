//! Core factor lookup
//!
//! [`CoreFactorTrie`] maps a CPU manufacturer and the whitespace separated
//! words of a model name to a licensing multiplier. Each manufacturer owns a
//! tree of model words; a `default` word at any level catches models that
//! stop matching there, and the `default` manufacturer supplies the global
//! fallback.
//!
//! [`CoreFactorCache`] owns the trie for the service. The trie is rebuilt
//! from the reference table on first use after [`CoreFactorCache::uncache`].

use sam_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::db::core_factor::{self, CoreFactorReference};

/// Sentinel manufacturer / model word
pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreFactorNode {
    pub key: String,
    pub value: f64,
    pub children: HashMap<String, CoreFactorNode>,
}

impl CoreFactorNode {
    fn new(key: &str) -> Self {
        Self {
            key: key.trim().to_string(),
            ..Default::default()
        }
    }
}

/// Read-only manufacturer -> model word trie
#[derive(Debug, Clone, Default)]
pub struct CoreFactorTrie {
    manufacturers: HashMap<String, CoreFactorNode>,
    fallback: f64,
}

impl CoreFactorTrie {
    /// Build from reference rows; fails on a factor that is not a number
    pub fn build(references: &[CoreFactorReference]) -> Result<Self> {
        let mut trie = CoreFactorTrie::default();

        for reference in references {
            let manufacturer = reference.manufacturer.trim().to_lowercase();
            let model = reference.model.to_lowercase();
            let factor: f64 = reference.core_factor.trim().parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "Bad core factor '{}' for {} {}",
                    reference.core_factor, reference.manufacturer, reference.model
                ))
            })?;

            if manufacturer == DEFAULT_KEY {
                trie.fallback = factor;
                continue;
            }

            let mut node = trie
                .manufacturers
                .entry(manufacturer.clone())
                .or_insert_with(|| CoreFactorNode::new(&manufacturer));

            let words: Vec<&str> = model.split_whitespace().collect();
            let last = words.len().saturating_sub(1);
            for (i, word) in words.iter().enumerate() {
                node = node
                    .children
                    .entry(word.to_string())
                    .or_insert_with(|| CoreFactorNode::new(word));
                if i == last || *word == DEFAULT_KEY {
                    node.value = factor;
                }
            }
        }

        Ok(trie)
    }

    /// Global fallback factor (0 when no `default` row exists)
    pub fn fallback(&self) -> f64 {
        self.fallback
    }

    pub fn lookup(&self, manufacturer: &str, model: &str) -> f64 {
        let manufacturer = manufacturer.trim().to_lowercase();
        if manufacturer == DEFAULT_KEY {
            return self.fallback;
        }

        let Some(mut node) = self.manufacturers.get(&manufacturer) else {
            tracing::error!(
                manufacturer = %manufacturer,
                fallback = self.fallback,
                "No core factor for manufacturer, using default"
            );
            return self.fallback;
        };

        let model = model.to_lowercase();
        for word in model.split_whitespace() {
            if let Some(child) = node.children.get(word) {
                node = child;
            } else if let Some(child) = node.children.get(DEFAULT_KEY) {
                node = child;
            } else {
                break;
            }
        }

        if node.value == 0.0 {
            self.fallback
        } else {
            node.value
        }
    }
}

/// Lazily built trie shared by analysis requests
pub struct CoreFactorCache {
    cached: Mutex<bool>,
    trie: RwLock<Arc<CoreFactorTrie>>,
}

impl Default for CoreFactorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreFactorCache {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(false),
            trie: RwLock::new(Arc::new(CoreFactorTrie::default())),
        }
    }

    /// Rebuild from the reference table if invalidated, then return the trie
    ///
    /// The `cached` lock is held for the whole rebuild so concurrent callers
    /// wait for one build instead of racing. A failed build leaves the cache
    /// invalid.
    pub async fn ensure_cached(&self, pool: &SqlitePool) -> Result<Arc<CoreFactorTrie>> {
        let mut cached = self.cached.lock().await;
        if !*cached {
            let references = core_factor::all_references(pool).await?;
            let trie = Arc::new(CoreFactorTrie::build(&references)?);
            tracing::info!(references = references.len(), "Core factor cache rebuilt");
            *self.trie.write().await = trie;
            *cached = true;
        }
        Ok(self.trie.read().await.clone())
    }

    /// Force a rebuild on next use
    pub async fn uncache(&self) {
        *self.cached.lock().await = false;
    }
}
