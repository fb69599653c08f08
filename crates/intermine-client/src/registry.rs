use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use intermine_model::Model;

use parking_lot::Mutex;

use tokio::sync::OnceCell;

type Slot = Arc<OnceCell<Arc<Model>>>;

/// Caches fetched models, keyed by service base URL.
///
/// Connections to the same service can share one registry. The model for a URL is fetched at
/// most once, even when several connections ask for it at the same time.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Mutex<HashMap<String, Slot>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, base_url: &str) -> Slot {
        let mut guard = self.models.lock();
        guard.entry(String::from(base_url)).or_default().clone()
    }

    /// Returns the cached model for `base_url`, calling `fetch` to load it if there is none.
    ///
    /// Concurrent callers wait on the first fetch. If it fails, the next caller tries again.
    pub async fn get_or_fetch<F, Fut, E>(&self, base_url: &str, fetch: F) -> Result<Arc<Model>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Model>, E>>,
    {
        let slot = self.slot(base_url);
        if let Some(model) = slot.get() {
            tracing::debug!(base_url, "model cache hit");
            return Ok(model.clone());
        }

        let result = slot.get_or_try_init(fetch).await.map(Arc::clone);
        if result.is_err() {
            self.release_slot(base_url, &slot);
        }
        result
    }

    /// Drops an empty slot nobody else is waiting on.
    fn release_slot(&self, base_url: &str, slot: &Slot) {
        let mut guard = self.models.lock();
        let unused = guard.get(base_url).map_or(false, |current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if unused {
            guard.remove(base_url);
        }
    }

    pub fn get(&self, base_url: &str) -> Option<Arc<Model>> {
        let guard = self.models.lock();
        guard.get(base_url).and_then(|slot| slot.get().cloned())
    }

    /// Drops the cached model for `base_url`. Returns whether there was one.
    pub fn invalidate(&self, base_url: &str) -> bool {
        let mut guard = self.models.lock();
        let removed = guard
            .remove(base_url)
            .map(|slot| slot.initialized())
            .unwrap_or(false);
        if removed {
            tracing::debug!(base_url, "invalidated cached model");
        }
        removed
    }

    /// Number of models currently cached.
    pub fn len(&self) -> usize {
        let guard = self.models.lock();
        guard.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
