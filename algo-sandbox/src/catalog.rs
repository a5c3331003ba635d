use async_trait::async_trait;
use std::collections::HashSet;

/// Source of truth for which algorithm ids exist.
#[async_trait]
pub trait AlgorithmCatalog: Send + Sync {
    async fn exists(&self, algorithm_id: i64) -> bool;
}

/// Fixed id set loaded from configuration. An empty set accepts every id.
#[derive(Debug, Default, Clone)]
pub struct StaticAlgorithmCatalog {
    ids: HashSet<i64>,
}

impl StaticAlgorithmCatalog {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Catalog that accepts every id.
    pub fn open() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlgorithmCatalog for StaticAlgorithmCatalog {
    async fn exists(&self, algorithm_id: i64) -> bool {
        self.ids.is_empty() || self.ids.contains(&algorithm_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_catalog_accepts_everything() {
        let catalog = StaticAlgorithmCatalog::open();
        assert!(catalog.exists(1).await);
        assert!(catalog.exists(-7).await);
    }

    #[tokio::test]
    async fn test_fixed_ids() {
        let catalog = StaticAlgorithmCatalog::new([1, 2, 3]);
        assert!(catalog.exists(2).await);
        assert!(!catalog.exists(999_999).await);
    }
}
