//! Per-session item bag.
//!
//! Items attach ambient metadata (caches, request-scoped helpers) to a
//! session. Their lifetime is bound to the session: when the session is
//! closed, every item that carries a disposal capability is released.

use asupersync::Cx;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Synchronous disposal capability.
pub trait Dispose: Send + Sync {
    /// Release the resources held by the item.
    fn dispose(&self);
}

/// Asynchronous disposal capability.
///
/// Boxed-future form so it can be stored behind `dyn`.
pub trait AsyncDispose: Send + Sync {
    /// Release the resources held by the item.
    fn dispose_async<'a>(&'a self, cx: &'a Cx) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// How an item is released when its session closes.
#[derive(Clone)]
enum Release {
    None,
    Sync(Arc<dyn Dispose>),
    Async(Arc<dyn AsyncDispose>),
    Both(Arc<dyn Dispose>, Arc<dyn AsyncDispose>),
}

/// One entry of the bag: the value itself plus its release capability.
#[derive(Clone)]
pub(crate) struct ItemEntry {
    value: Arc<dyn Any + Send + Sync>,
    release: Release,
}

impl ItemEntry {
    /// Release on the asynchronous path, preferring the async capability.
    pub(crate) async fn release_async(&self, cx: &Cx) {
        match &self.release {
            Release::None => {}
            Release::Sync(item) => item.dispose(),
            Release::Async(item) | Release::Both(_, item) => item.dispose_async(cx).await,
        }
    }

    /// Release on the synchronous path. Async-only items are just dropped.
    pub(crate) fn release_sync(&self) {
        match &self.release {
            Release::Sync(item) | Release::Both(item, _) => item.dispose(),
            Release::None | Release::Async(_) => {}
        }
    }
}

/// String-keyed bag of session-scoped values.
///
/// The backing map is only allocated on first insert.
#[derive(Default)]
pub struct SessionItems {
    entries: Option<HashMap<String, ItemEntry>>,
}

impl std::fmt::Debug for SessionItems {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionItems")
            .field("keys", &self.keys())
            .finish()
    }
}

impl SessionItems {
    fn entries_mut(&mut self) -> &mut HashMap<String, ItemEntry> {
        self.entries.get_or_insert_with(HashMap::new)
    }

    fn put(&mut self, key: impl Into<String>, entry: ItemEntry) -> bool {
        self.entries_mut().insert(key.into(), entry).is_some()
    }

    /// Insert a plain value. Returns true if an existing entry was replaced.
    ///
    /// A replaced entry is dropped, not disposed.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.put(
            key,
            ItemEntry {
                value: Arc::new(value),
                release: Release::None,
            },
        )
    }

    /// Insert a value that is disposed synchronously when the session closes.
    pub fn insert_disposable<T: Dispose + Any>(
        &mut self,
        key: impl Into<String>,
        value: Arc<T>,
    ) -> bool {
        let release = Release::Sync(value.clone());
        self.put(key, ItemEntry { value, release })
    }

    /// Insert a value that is disposed asynchronously when the session closes.
    pub fn insert_async_disposable<T: AsyncDispose + Any>(
        &mut self,
        key: impl Into<String>,
        value: Arc<T>,
    ) -> bool {
        let release = Release::Async(value.clone());
        self.put(key, ItemEntry { value, release })
    }

    /// Insert a value with both capabilities. The asynchronous one is used
    /// when the session is closed with `close`, the synchronous one otherwise.
    pub fn insert_dual_disposable<T: Dispose + AsyncDispose + Any>(
        &mut self,
        key: impl Into<String>,
        value: Arc<T>,
    ) -> bool {
        let release = Release::Both(value.clone(), value.clone());
        self.put(key, ItemEntry { value, release })
    }

    /// Get a value by key, if present and of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.entries.as_ref()?.get(key)?;
        Arc::clone(&entry.value).downcast::<T>().ok()
    }

    /// Remove an entry without disposing it.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries
            .as_mut()
            .is_some_and(|entries| entries.remove(key).is_some())
    }

    /// Whether an entry exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|entries| entries.contains_key(key))
    }

    /// All keys currently in the bag.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .as_ref()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the bag, handing back the entries for release.
    pub(crate) fn drain(&mut self) -> Vec<ItemEntry> {
        self.entries
            .take()
            .map(|entries| entries.into_values().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Cache {
        sync_disposed: AtomicUsize,
        async_disposed: AtomicUsize,
    }

    impl Dispose for Cache {
        fn dispose(&self) {
            self.sync_disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AsyncDispose for Cache {
        fn dispose_async<'a>(
            &'a self,
            _cx: &'a Cx,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.async_disposed.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn typed_get_and_remove() {
        let mut items = SessionItems::default();
        assert!(items.is_empty());
        assert!(!items.insert("tenant", String::from("acme")));
        assert!(items.insert("tenant", String::from("globex")));
        assert_eq!(items.get::<String>("tenant").as_deref(), Some(&"globex".to_string()));
        assert!(items.get::<u32>("tenant").is_none());
        assert!(items.contains_key("tenant"));
        assert!(items.remove("tenant"));
        assert!(!items.remove("tenant"));
        assert_eq!(items.len(), 0);
    }

    #[test]
    fn disposable_items_are_still_readable() {
        let mut items = SessionItems::default();
        let cache = Arc::new(Cache::default());
        items.insert_disposable("cache", Arc::clone(&cache));
        let fetched = items.get::<Cache>("cache").expect("cache item");
        assert!(Arc::ptr_eq(&fetched, &cache));
    }

    #[test]
    fn async_path_prefers_async_capability() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();

        let mut items = SessionItems::default();
        let dual = Arc::new(Cache::default());
        let sync_only = Arc::new(Cache::default());
        items.insert_dual_disposable("dual", Arc::clone(&dual));
        items.insert_disposable("sync", Arc::clone(&sync_only));

        let entries = items.drain();
        assert!(items.is_empty());
        rt.block_on(async {
            for entry in &entries {
                entry.release_async(&cx).await;
            }
        });

        assert_eq!(dual.async_disposed.load(Ordering::SeqCst), 1);
        assert_eq!(dual.sync_disposed.load(Ordering::SeqCst), 0);
        assert_eq!(sync_only.sync_disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_path_skips_async_only_items() {
        let mut items = SessionItems::default();
        let async_only = Arc::new(Cache::default());
        let dual = Arc::new(Cache::default());
        items.insert_async_disposable("async", Arc::clone(&async_only));
        items.insert_dual_disposable("dual", Arc::clone(&dual));

        for entry in items.drain() {
            entry.release_sync();
        }

        assert_eq!(async_only.async_disposed.load(Ordering::SeqCst), 0);
        assert_eq!(async_only.sync_disposed.load(Ordering::SeqCst), 0);
        assert_eq!(dual.sync_disposed.load(Ordering::SeqCst), 1);
    }
}
