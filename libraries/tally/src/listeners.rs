use std::cell::RefCell;

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle returned when registering a listener; pass it back to unregister.
    pub struct ListenerKey;
}

type Callback<A> = Box<dyn FnMut(&A)>;

/// A set of callbacks that can be notified without holding a borrow.
///
/// Callbacks are taken out of their slot while they run, so a callback may register or unregister listeners
/// (including itself) on the same set.
pub struct Listeners<A> {
    slots: RefCell<SlotMap<ListenerKey, Option<Callback<A>>>>,
}

impl<A> Default for Listeners<A> {
    fn default() -> Self {
        Self {
            slots: RefCell::new(SlotMap::with_key()),
        }
    }
}

impl<A> Listeners<A> {
    pub fn register(&self, callback: impl FnMut(&A) + 'static) -> ListenerKey {
        self.slots.borrow_mut().insert(Some(Box::new(callback)))
    }

    pub fn unregister(&self, key: ListenerKey) -> bool {
        self.slots.borrow_mut().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        // dropping callbacks can run arbitrary code, so do it outside the borrow
        let removed = std::mem::take(&mut *self.slots.borrow_mut());
        drop(removed);
    }

    pub fn notify(&self, arg: &A) {
        let keys: Vec<ListenerKey> = self.slots.borrow().keys().collect();
        for key in keys {
            let callback = self
                .slots
                .borrow_mut()
                .get_mut(key)
                .and_then(Option::take);
            let Some(mut callback) = callback else {
                continue;
            };

            callback(arg);

            if let Some(slot) = self.slots.borrow_mut().get_mut(key) {
                *slot = Some(callback);
            }
        }
    }
}
