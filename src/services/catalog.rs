// Category cache backed by the catalog service

use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::core::config::CatalogConfig;
use crate::core::errors::CatalogError;
use crate::core::types::CanonicalCategory;

/// Read-through cache of the catalog's canonical category list.
///
/// Holds the last good snapshot; `replace` bumps a generation counter on
/// a watch channel so interested tasks can react to refreshes.
#[derive(Clone)]
pub struct CategoryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    categories: RwLock<Vec<CanonicalCategory>>,
    generation_tx: watch::Sender<u64>,
}

impl CategoryCache {
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(CacheInner {
                categories: RwLock::new(Vec::new()),
                generation_tx,
            }),
        }
    }

    pub fn snapshot(&self) -> Vec<CanonicalCategory> {
        self.inner.categories.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.categories.read().is_empty()
    }

    /// Swap in a fresh category list and notify subscribers.
    pub fn replace(&self, categories: Vec<CanonicalCategory>) {
        *self.inner.categories.write() = categories;
        self.inner.generation_tx.send_modify(|generation| *generation += 1);
    }

    /// Subscribe to refresh notifications. The value is a generation
    /// counter; any change means the snapshot may differ.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.generation_tx.subscribe()
    }
}

impl Default for CategoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP client for the catalog service's category listing.
pub struct CatalogClient {
    client: reqwest::Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the active category list and fold it into canonical form.
    #[instrument(skip(self))]
    pub async fn fetch_categories(&self) -> Result<Vec<CanonicalCategory>, CatalogError> {
        let url = format!("{}/api/categories", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }

        let raw: Vec<RawCategory> = response.json().await?;
        let categories = canonicalize(raw);
        info!("Fetched {} categories from catalog", categories.len());
        Ok(categories)
    }

    /// Refresh a cache from the catalog, leaving the old snapshot intact
    /// on failure.
    pub async fn refresh_into(&self, cache: &CategoryCache) -> Result<usize, CatalogError> {
        let categories = self.fetch_categories().await?;
        let count = categories.len();
        cache.replace(categories);
        Ok(count)
    }
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(rename = "isActive", default)]
    is_active: Option<bool>,
}

fn canonicalize(raw: Vec<RawCategory>) -> Vec<CanonicalCategory> {
    raw.into_iter()
        .filter(|c| c.is_active.unwrap_or(true))
        .map(|c| {
            let slug = match c.slug {
                Some(s) if !s.trim().is_empty() => s,
                _ => slugify(&c.name),
            };
            CanonicalCategory {
                id: c.id,
                label: c.name,
                slug,
            }
        })
        .collect()
}

/// Lowercased, whitespace-to-hyphen fallback slug derived from a name.
fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_hyphenates() {
        assert_eq!(slugify("Dried Flowers"), "dried-flowers");
        assert_eq!(slugify("  Vases  "), "vases");
    }

    #[test]
    fn canonicalize_uses_slug_or_falls_back_to_name() {
        let raw = vec![
            RawCategory {
                id: "1".to_string(),
                name: "Bouquets".to_string(),
                slug: Some("bouquets".to_string()),
                is_active: Some(true),
            },
            RawCategory {
                id: "2".to_string(),
                name: "Dried Flowers".to_string(),
                slug: None,
                is_active: None,
            },
        ];
        let out = canonicalize(raw);
        assert_eq!(out[0].slug, "bouquets");
        assert_eq!(out[1].slug, "dried-flowers");
        assert_eq!(out[1].label, "Dried Flowers");
    }

    #[test]
    fn canonicalize_drops_inactive_categories() {
        let raw = vec![RawCategory {
            id: "1".to_string(),
            name: "Archived".to_string(),
            slug: None,
            is_active: Some(false),
        }];
        assert!(canonicalize(raw).is_empty());
    }

    #[test]
    fn cache_replace_notifies_subscribers() {
        let cache = CategoryCache::new();
        let mut rx = cache.subscribe();
        assert_eq!(*rx.borrow_and_update(), 0);

        cache.replace(vec![CanonicalCategory::new("1", "Bouquets", "bouquets")]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn cache_starts_empty() {
        let cache = CategoryCache::new();
        assert!(cache.is_empty());
        assert!(cache.snapshot().is_empty());
    }
}
