//! Value holder with a listener list.
//!
//! Mutations run under a short lock and produce a new immutable snapshot;
//! listeners are invoked after the lock is released, in subscription order,
//! once per committed mutation. A listener may freely read or write the same
//! observable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Listener<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

/// 訂閱代號，用於取消訂閱。 / Handle returned by [`Observable::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct State<T> {
    value: Arc<T>,
    listeners: Vec<(SubscriptionId, Listener<T>)>,
}

pub struct Observable<T> {
    state: Mutex<State<T>>,
    next_id: AtomicU64,
}

impl<T: Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Observable<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable").field("value", &self.get()).finish()
    }
}

impl<T> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(State {
                value: Arc::new(value),
                listeners: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Listeners never run under this lock; the stored snapshot is always whole.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 取得目前快照。 / Returns the current snapshot.
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.lock().value)
    }

    /// 取代整個值並通知監聽者。 / Replaces the value and notifies listeners.
    pub fn set(&self, value: T) {
        let snapshot = Arc::new(value);
        let listeners = {
            let mut state = self.lock();
            state.value = Arc::clone(&snapshot);
            Self::collect(&state)
        };
        Self::notify(&listeners, &snapshot);
    }

    /// 註冊監聽者。 / Registers a listener invoked after every committed mutation.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        state.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn collect(state: &State<T>) -> Vec<Listener<T>> {
        state
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn notify(listeners: &[Listener<T>], snapshot: &Arc<T>) {
        for listener in listeners {
            listener(snapshot);
        }
    }
}

impl<T: Clone> Observable<T> {
    /// 就地修改並通知監聽者。 / Mutates a copy of the value in place, commits it and notifies listeners.
    pub fn update<R>(&self, op: impl FnOnce(&mut T) -> R) -> R {
        let (result, snapshot, listeners) = {
            let mut state = self.lock();
            let mut next = T::clone(&state.value);
            let result = op(&mut next);
            let snapshot = Arc::new(next);
            state.value = Arc::clone(&snapshot);
            (result, snapshot, Self::collect(&state))
        };
        Self::notify(&listeners, &snapshot);
        result
    }

    /// 僅在 `op` 回報變更時提交與通知。 / Commits and notifies only when `op` reports a change.
    pub fn update_if(&self, op: impl FnOnce(&mut T) -> bool) -> bool {
        let committed = {
            let mut state = self.lock();
            let mut next = T::clone(&state.value);
            if op(&mut next) {
                let snapshot = Arc::new(next);
                state.value = Arc::clone(&snapshot);
                Some((snapshot, Self::collect(&state)))
            } else {
                None
            }
        };
        match committed {
            Some((snapshot, listeners)) => {
                Self::notify(&listeners, &snapshot);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listeners_observe_every_commit() {
        let observable = Observable::new(0u32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        observable.subscribe(move |value| sink.lock().unwrap().push(**value));

        observable.set(1);
        observable.update(|value| *value += 1);
        observable.update(|value| *value += 1);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*observable.get(), 3);
    }

    #[test]
    fn update_if_skips_notification_without_change() {
        let observable = Observable::new(BTreeSet::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        observable.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!observable.update_if(|set| set.remove("missing")));
        assert!(observable.update_if(|set| set.insert("a".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_read_the_same_observable() {
        let observable = Arc::new(Observable::new(String::new()));
        let reader = Arc::clone(&observable);
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        observable.subscribe(move |_| {
            *sink.lock().unwrap() = reader.get().to_string();
        });

        observable.set("hello".into());
        assert_eq!(*seen.lock().unwrap(), "hello");
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let observable = Observable::new(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = observable.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        observable.set(1);
        assert!(observable.unsubscribe(id));
        observable.set(2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observable.listener_count(), 0);
    }
}
