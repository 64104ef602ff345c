//! # Listeners
//! Callbacks that want to hear about changes. Events are queued while the owner is being mutated and
//! only handed out by [`Listeners::drain_due_notifications`], so the owner can release its lock first.
//! (Many callbacks call straight back into the owner, which would otherwise deadlock.)

use std::sync::Arc;

use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct ListenerKey;
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct Listeners<E> {
    listeners: SlotMap<ListenerKey, Listener<E>>,
    pending: Vec<Arc<E>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            listeners: SlotMap::with_key(),
            pending: Vec::new(),
        }
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("registered", &self.listeners.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<E: Send + Sync + 'static> Listeners<E> {
    pub fn register_listener(&mut self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerKey {
        self.listeners.insert(Arc::new(listener))
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        self.listeners.remove(key);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn queue(&mut self, event: E) {
        if self.listeners.is_empty() {
            return;
        }
        self.pending.push(Arc::new(event));
    }

    /// Take every queued event, bound to every listener registered right now.
    pub fn drain_due_notifications(&mut self) -> Vec<Box<dyn FnOnce() + Send>> {
        let mut notifications: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        for event in self.pending.drain(..) {
            for listener in self.listeners.values() {
                let listener = Arc::clone(listener);
                let event = Arc::clone(&event);
                notifications.push(Box::new(move || listener(&event)));
            }
        }
        notifications
    }
}
