//! Subscription handles and listener fan-out.
//!
//! A [`Subscription`] is a receiving channel plus a [`SubscriptionHandle`]
//! whose release action runs exactly once, either on
//! [`Subscription::unsubscribe`] or when the subscription is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::backend::{AuthChange, ChangeEvent};

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

type Release = Box<dyn FnOnce() + Send>;

/// Owns the release action of a subscription.
pub struct SubscriptionHandle {
    release: Option<Release>,
}

impl SubscriptionHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Run the release action. Returns `false` if it already ran.
    pub fn unsubscribe(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A stream of notifications together with the means to stop it.
#[derive(Debug)]
pub struct Subscription<T> {
    events: mpsc::UnboundedReceiver<T>,
    handle: SubscriptionHandle,
}

/// Row changes on a collection.
pub type ChangeSubscription = Subscription<ChangeEvent>;

/// Session changes.
pub type AuthSubscription = Subscription<AuthChange>;

impl<T> Subscription<T> {
    pub fn new(events: mpsc::UnboundedReceiver<T>, handle: SubscriptionHandle) -> Self {
        Self { events, handle }
    }

    /// Wait for the next notification. `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.events.recv().await
    }

    /// Next queued notification, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.events.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Release the subscription. Returns `false` if already released.
    pub fn unsubscribe(&mut self) -> bool {
        self.handle.unsubscribe()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }
}

// ---------------------------------------------------------------------------
// Listener registry
// ---------------------------------------------------------------------------

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct Listener<T> {
    tx: mpsc::UnboundedSender<T>,
    predicate: Option<Predicate<T>>,
}

struct Listeners<T> {
    next_id: u64,
    entries: HashMap<u64, Listener<T>>,
}

/// Fans notifications out to every registered listener.
pub struct ListenerRegistry<T> {
    inner: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for ListenerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 1,
                entries: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener receiving every notification. `initial`, if
    /// given, is queued before anything else.
    pub fn register(&self, initial: Option<T>) -> (u64, mpsc::UnboundedReceiver<T>) {
        self.register_inner(initial, None)
    }

    /// Register a listener receiving only notifications `predicate` accepts.
    pub fn register_filtered(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> (u64, mpsc::UnboundedReceiver<T>) {
        self.register_inner(None, Some(Arc::new(predicate)))
    }

    fn register_inner(
        &self,
        initial: Option<T>,
        predicate: Option<Predicate<T>>,
    ) -> (u64, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(value) = initial {
            let _ = tx.send(value);
        }

        let mut listeners = self.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Listener { tx, predicate });
        (id, rx)
    }

    /// Drop a listener. Returns whether it was registered.
    pub fn remove(&self, id: u64) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> ListenerRegistry<T> {
    /// Register a listener and wrap it in a [`Subscription`] whose release
    /// removes it from the registry.
    pub fn subscribe(&self, initial: Option<T>) -> Subscription<T> {
        let (id, rx) = self.register(initial);
        Subscription::new(rx, self.release_handle(id))
    }

    /// Handle that removes listener `id` when released.
    pub fn release_handle(&self, id: u64) -> SubscriptionHandle {
        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.inner);
        SubscriptionHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut listeners = inner.lock().unwrap_or_else(|p| p.into_inner());
                listeners.entries.remove(&id);
            }
        })
    }
}

impl<T: Clone> ListenerRegistry<T> {
    /// Deliver `value` to every interested listener, pruning listeners whose
    /// receiver is gone. Returns the number of deliveries.
    pub fn notify(&self, value: &T) -> usize {
        let mut listeners = self.lock();
        let mut delivered = 0;
        listeners.entries.retain(|_, listener| {
            if let Some(predicate) = &listener.predicate {
                if !predicate(value) {
                    return !listener.tx.is_closed();
                }
            }
            match listener.tx.send(value.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }
}
