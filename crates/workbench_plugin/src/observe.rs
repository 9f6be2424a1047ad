use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// a subscriber gets the new value after every write
pub type ChangeHandler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    id: u64,
    disposed: Arc<AtomicBool>,
    handler: ChangeHandler<T>,
}

struct ObservableInner<T> {
    value: Mutex<T>,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: AtomicU64,
}

/// A shared mutable value with explicit subscribe/notify. Handles are cheap
/// clones over the same state; writes notify every live subscriber.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                value: Mutex::new(value),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.lock().unwrap().clone()
    }

    pub fn set(&self, value: T) {
        {
            *self.inner.value.lock().unwrap() = value;
        }
        self.notify();
    }

    /// Mutate in place, then notify.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            f(&mut self.inner.value.lock().unwrap());
        }
        self.notify();
    }

    /// Register a change handler. Dropping or disposing the returned
    /// subscription unregisters it; a fire racing the disposal is skipped.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<ObservableInner<T>> = Arc::downgrade(&self.inner);
        let sub = Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().unwrap().retain(|s| s.id != id);
            }
        });
        self.inner.subscribers.lock().unwrap().push(Subscriber {
            id,
            disposed: sub.disposed_handle(),
            handler: Arc::new(handler),
        });
        sub
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }

    fn notify(&self) {
        // grab and clone the subscriber list under the lock, call outside it
        let handlers: Vec<(Arc<AtomicBool>, ChangeHandler<T>)> = {
            let subs = self.inner.subscribers.lock().unwrap();
            subs.iter().map(|s| (s.disposed.clone(), s.handler.clone())).collect()
        };
        let value = self.get();
        for (disposed, handler) in handlers {
            if disposed.load(Ordering::SeqCst) {
                continue;
            }
            handler(&value);
        }
    }
}

impl<T: Default + Clone + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug + Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.lock().unwrap())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Revokes one or more registrations. Disposal is idempotent and also runs
/// on drop; anything still holding the disposed flag treats later fires as
/// no-ops.
pub struct Subscription {
    disposed: Arc<AtomicBool>,
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposed: Arc::new(AtomicBool::new(false)),
            cleanups: Mutex::new(vec![Box::new(cleanup)]),
        }
    }

    /// A subscription with nothing to revoke.
    pub fn empty() -> Self {
        Self {
            disposed: Arc::new(AtomicBool::new(false)),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Bundle several subscriptions into one disposal unit.
    pub fn group(subs: Vec<Subscription>) -> Self {
        Self::new(move || {
            for sub in &subs {
                sub.dispose();
            }
        })
    }

    /// Attach another subscription so it is revoked together with this one.
    pub fn also(&self, other: Subscription) {
        if self.is_disposed() {
            other.dispose();
            return;
        }
        self.cleanups.lock().unwrap().push(Box::new(move || other.dispose()));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Runs every attached cleanup the first time, nothing after that.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let cleanups: Vec<Box<dyn FnOnce() + Send>> = {
            self.cleanups.lock().unwrap().drain(..).collect()
        };
        for cleanup in cleanups {
            cleanup();
        }
    }

    pub(crate) fn disposed_handle(&self) -> Arc<AtomicBool> {
        self.disposed.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Type-erased dependency of an [`effect`]; lets one effect watch
/// observables of mixed value types.
pub trait Source: Send + Sync {
    fn on_change(&self, f: Arc<dyn Fn() + Send + Sync>) -> Subscription;
}

impl<T: Clone + Send + Sync + 'static> Source for Observable<T> {
    fn on_change(&self, f: Arc<dyn Fn() + Send + Sync>) -> Subscription {
        self.subscribe(move |_| f())
    }
}

/// Run `body` now and again after every change to any source. Writes the
/// body itself makes do not re-trigger it while it runs, so an effect can
/// derive state from its dependencies without looping.
pub fn effect(sources: &[&dyn Source], body: impl Fn() + Send + Sync + 'static) -> Subscription {
    let body = Arc::new(body);
    let running = Arc::new(AtomicBool::new(false));
    let run: Arc<dyn Fn() + Send + Sync> = {
        let body = body.clone();
        let running = running.clone();
        Arc::new(move || {
            if running.swap(true, Ordering::SeqCst) {
                return;
            }
            body();
            running.store(false, Ordering::SeqCst);
        })
    };
    run();
    let subs: Vec<Subscription> = sources.iter().map(|s| s.on_change(run.clone())).collect();
    Subscription::group(subs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn set_notifies_subscribers() {
        let obs = Observable::new(1u32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = obs.subscribe(move |v| seen2.lock().unwrap().push(*v));
        obs.set(2);
        obs.update(|v| *v += 3);
        assert_eq!(*seen.lock().unwrap(), vec![2, 5]);
        assert_eq!(obs.get(), 5);
    }

    #[test]
    fn dispose_unregisters_and_later_fires_are_noops() {
        let obs = Observable::new(0u32);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let sub = obs.subscribe(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        obs.set(1);
        sub.dispose();
        sub.dispose();
        obs.set(2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let obs = Observable::new(0u32);
        {
            let _sub = obs.subscribe(|_| {});
            assert_eq!(obs.subscriber_count(), 1);
        }
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn effect_runs_immediately_and_on_change() {
        let obs = Observable::new(10u32);
        let total = Arc::new(AtomicUsize::new(0));
        let total2 = total.clone();
        let obs2 = obs.clone();
        let sub = effect(&[&obs], move || {
            total2.store(obs2.get() as usize, Ordering::SeqCst);
        });
        assert_eq!(total.load(Ordering::SeqCst), 10);
        obs.set(42);
        assert_eq!(total.load(Ordering::SeqCst), 42);
        sub.dispose();
        obs.set(7);
        assert_eq!(total.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn effect_writing_its_own_source_does_not_loop() {
        let list: Observable<Vec<u32>> = Observable::new(vec![1]);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs2 = runs.clone();
        let list2 = list.clone();
        let _sub = effect(&[&list], move || {
            runs2.fetch_add(1, Ordering::SeqCst);
            // a derivation that writes back into its own dependency
            list2.update(|v| v.dedup());
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        list.update(|v| v.push(2));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn group_disposes_all_members() {
        let a = Observable::new(0u32);
        let b = Observable::new(0u32);
        let hits = Arc::new(AtomicUsize::new(0));
        let ha = hits.clone();
        let hb = hits.clone();
        let group = Subscription::group(vec![
            a.subscribe(move |_| {
                ha.fetch_add(1, Ordering::SeqCst);
            }),
            b.subscribe(move |_| {
                hb.fetch_add(1, Ordering::SeqCst);
            }),
        ]);
        group.dispose();
        a.set(1);
        b.set(1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
