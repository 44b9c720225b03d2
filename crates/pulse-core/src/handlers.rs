//! Keyed callback registry.
//!
//! Handlers are stored per key in registration order and invoked in that
//! order. Removal matches by `Arc` pointer identity, so callers must keep the
//! [`Handler`] they registered if they want to remove it later. Registering
//! the same reference twice delivers twice; removing it drops both.
//!
//! Dispatch clones the handler list before invoking, so a handler may call
//! [`HandlerRegistry::on`] or [`HandlerRegistry::off`] without deadlocking.
//! Changes made during a dispatch take effect from the next one.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared callback receiving a borrowed payload.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<T, F>(f: F) -> Handler<T>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered callbacks grouped by key.
pub struct HandlerRegistry<K, T> {
    handlers: RwLock<HashMap<K, Vec<Handler<T>>>>,
}

impl<K, T> HandlerRegistry<K, T>
where
    K: Eq + Hash,
{
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Append `handler` to the list for `key`.
    pub fn on(&self, key: K, handler: Handler<T>) {
        self.handlers.write().entry(key).or_default().push(handler);
    }

    /// Remove every registration of `handler` under `key`.
    ///
    /// Returns `true` if anything was removed.
    pub fn off<Q>(&self, key: &Q, handler: &Handler<T>) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = handlers.remove(key);
        }
        removed
    }

    /// Invoke every handler for `key` in registration order.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit<Q>(&self, key: &Q, payload: &T) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let snapshot: Vec<Handler<T>> = match self.handlers.read().get(key) {
            Some(list) => list.clone(),
            None => return 0,
        };
        for h in &snapshot {
            h(payload);
        }
        snapshot.len()
    }

    /// Number of registrations under `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.handlers.read().get(key).map_or(0, Vec::len)
    }

    /// Whether no handlers are registered at all.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl<K: Eq + Hash, T> Default for HandlerRegistry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> std::fmt::Debug for HandlerRegistry<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("keys", &self.handlers.read().len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Handler<u32>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |name: &'static str| {
            let log = log2.clone();
            handler(move |v: &u32| log.lock().unwrap().push(format!("{name}:{v}")))
        };
        (log, make)
    }

    #[test]
    fn invokes_in_registration_order() {
        let registry: HandlerRegistry<String, u32> = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.on("tick".into(), make("a"));
        registry.on("tick".into(), make("b"));
        registry.on("tick".into(), make("c"));

        assert_eq!(registry.emit("tick", &7), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7", "c:7"]);
    }

    #[test]
    fn keys_are_isolated() {
        let registry: HandlerRegistry<String, u32> = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.on("one".into(), make("a"));
        registry.on("two".into(), make("b"));

        let _ = registry.emit("two", &1);
        assert_eq!(*log.lock().unwrap(), vec!["b:1"]);
    }

    #[test]
    fn off_removes_by_reference() {
        let registry: HandlerRegistry<String, u32> = HandlerRegistry::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        registry.on("tick".into(), a.clone());
        registry.on("tick".into(), b);

        assert!(registry.off("tick", &a));
        let _ = registry.emit("tick", &1);
        assert_eq!(*log.lock().unwrap(), vec!["b:1"]);
    }

    #[test]
    fn off_ignores_equal_but_distinct_closures() {
        let registry: HandlerRegistry<String, u32> = HandlerRegistry::new();
        let (_log, make) = recorder();
        registry.on("tick".into(), make("a"));

        assert!(!registry.off("tick", &make("a")));
        assert_eq!(registry.count("tick"), 1);
    }

    #[test]
    fn off_unknown_key_is_noop() {
        let registry: HandlerRegistry<String, u32> = HandlerRegistry::new();
        let (_log, make) = recorder();
        assert!(!registry.off("missing", &make("a")));
    }

    #[test]
    fn duplicate_registration_removed_together() {
        let registry: HandlerRegistry<String, u32> = HandlerRegistry::new();
        let (log, make) = recorder();
        let a = make("a");
        registry.on("tick".into(), a.clone());
        registry.on("tick".into(), a.clone());
        assert_eq!(registry.emit("tick", &1), 2);

        assert!(registry.off("tick", &a));
        assert_eq!(registry.emit("tick", &2), 0);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn handler_may_unregister_itself_during_emit() {
        let registry: Arc<HandlerRegistry<String, u32>> = Arc::new(HandlerRegistry::new());
        let calls = Arc::new(Mutex::new(0));
        let slot: Arc<Mutex<Option<Handler<u32>>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let calls2 = calls.clone();
        let slot2 = slot.clone();
        let once = handler(move |_: &u32| {
            *calls2.lock().unwrap() += 1;
            if let Some(me) = slot2.lock().unwrap().take() {
                let _ = reg.off("tick", &me);
            }
        });
        *slot.lock().unwrap() = Some(once.clone());
        registry.on("tick".into(), once);

        let _ = registry.emit("tick", &1);
        let _ = registry.emit("tick", &2);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let registry: HandlerRegistry<String, u32> = HandlerRegistry::new();
        let (_log, make) = recorder();
        registry.on("a".into(), make("a"));
        registry.on("b".into(), make("b"));
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.emit("a", &1), 0);
    }

    #[test]
    fn is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HandlerRegistry<String, serde_json::Value>>();
    }
}
