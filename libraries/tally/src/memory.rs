//! An in-process document store.
//!
//! Clones share the same documents, so several sessions can be pointed at one `MemoryStore` to simulate many
//! independent viewers. Writes are applied in one step while the store's state is borrowed, which makes each
//! increment atomic with respect to every other session on the same store.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

use futures::FutureExt as _;
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use serde_json::{Map, Value};
use slotmap::SlotMap;

use crate::error::StoreError;
use crate::listeners::ListenerKey;
use crate::path::DocumentPath;
use crate::snapshot::{DocumentSnapshot, as_count};
use crate::store::{DocumentStore, SnapshotListener, Subscription};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Rc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: RefCell<State>,
    watchers: RefCell<SlotMap<ListenerKey, Watcher>>,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<DocumentPath, Map<String, Value>>,
    increment_calls: usize,
    failing_increments: VecDeque<StoreError>,
    paused: bool,
    held_writes: Vec<HeldWrite>,
}

struct Watcher {
    path: DocumentPath,
    // taken out while the callback runs
    callback: Option<SnapshotListener>,
}

struct HeldWrite {
    path: DocumentPath,
    field: String,
    delta: u64,
    done: oneshot::Sender<Result<(), StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites (or creates) a document with exactly these fields.
    pub fn put_document(&self, path: &DocumentPath, fields: Map<String, Value>) {
        self.inner
            .state
            .borrow_mut()
            .documents
            .insert(path.clone(), fields);
        self.inner.publish(path);
    }

    /// Writes one field verbatim, bypassing any numeric checks.
    pub fn set_field(&self, path: &DocumentPath, field: &str, value: Value) {
        self.inner
            .state
            .borrow_mut()
            .documents
            .entry(path.clone())
            .or_default()
            .insert(field.to_string(), value);
        self.inner.publish(path);
    }

    pub fn remove_document(&self, path: &DocumentPath) {
        let removed = self.inner.state.borrow_mut().documents.remove(path);
        if removed.is_some() {
            self.inner.publish(path);
        }
    }

    pub fn snapshot(&self, path: &DocumentPath) -> DocumentSnapshot {
        self.inner.snapshot(path)
    }

    /// How many increments have been requested, including ones that failed or are still held.
    pub fn increment_calls(&self) -> usize {
        self.inner.state.borrow().increment_calls
    }

    /// Live subscriptions across all documents.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().len()
    }

    /// The next increment fails with `error` instead of being applied.
    pub fn fail_next_increment(&self, error: StoreError) {
        self.inner
            .state
            .borrow_mut()
            .failing_increments
            .push_back(error);
    }

    /// Holds every increment until [`MemoryStore::resume_writes`], like a slow network would.
    pub fn pause_writes(&self) {
        self.inner.state.borrow_mut().paused = true;
    }

    pub fn resume_writes(&self) {
        let held = {
            let mut state = self.inner.state.borrow_mut();
            state.paused = false;
            std::mem::take(&mut state.held_writes)
        };
        for write in held {
            self.inner.apply_increment(&write.path, &write.field, write.delta);
            let _ = write.done.send(Ok(()));
        }
    }

    pub fn held_writes(&self) -> usize {
        self.inner.state.borrow().held_writes.len()
    }

    /// Breaks every subscription on `path` with `error`. The subscriptions stay registered.
    pub fn push_error(&self, path: &DocumentPath, error: StoreError) {
        let keys = self.inner.watcher_keys(path);
        for key in keys {
            self.inner.deliver(key, Err(error.clone()));
        }
    }
}

impl Inner {
    fn snapshot(&self, path: &DocumentPath) -> DocumentSnapshot {
        match self.state.borrow().documents.get(path) {
            Some(fields) => DocumentSnapshot::existing(path.clone(), fields.clone()),
            None => DocumentSnapshot::missing(path.clone()),
        }
    }

    fn apply_increment(&self, path: &DocumentPath, field: &str, delta: u64) {
        {
            let mut state = self.state.borrow_mut();
            let document = state.documents.entry(path.clone()).or_default();
            let current = document.get(field).and_then(as_count).unwrap_or(0);
            document.insert(field.to_string(), Value::from(current.saturating_add(delta)));
        }
        self.publish(path);
    }

    fn watcher_keys(&self, path: &DocumentPath) -> Vec<ListenerKey> {
        self.watchers
            .borrow()
            .iter()
            .filter(|(_, watcher)| &watcher.path == path)
            .map(|(key, _)| key)
            .collect()
    }

    fn publish(&self, path: &DocumentPath) {
        for key in self.watcher_keys(path) {
            // each watcher sees the state as of its own delivery
            let snapshot = self.snapshot(path);
            self.deliver(key, Ok(snapshot));
        }
    }

    fn deliver(&self, key: ListenerKey, update: Result<DocumentSnapshot, StoreError>) {
        let callback = self
            .watchers
            .borrow_mut()
            .get_mut(key)
            .and_then(|watcher| watcher.callback.take());
        let Some(mut callback) = callback else {
            return;
        };

        callback(update);

        if let Some(watcher) = self.watchers.borrow_mut().get_mut(key) {
            watcher.callback = Some(callback);
        }
    }
}

impl DocumentStore for MemoryStore {
    fn increment(
        &self,
        path: &DocumentPath,
        field: &str,
        delta: u64,
    ) -> LocalBoxFuture<'static, Result<(), StoreError>> {
        let mut state = self.inner.state.borrow_mut();
        state.increment_calls += 1;

        if let Some(error) = state.failing_increments.pop_front() {
            return futures::future::ready(Err(error)).boxed_local();
        }

        if state.paused {
            let (done, result) = oneshot::channel();
            state.held_writes.push(HeldWrite {
                path: path.clone(),
                field: field.to_string(),
                delta,
                done,
            });
            return async move {
                result
                    .await
                    .unwrap_or_else(|_| Err(StoreError::Unavailable("store dropped".to_string())))
            }
            .boxed_local();
        }
        drop(state);

        let inner = Rc::downgrade(&self.inner);
        let path = path.clone();
        let field = field.to_string();
        async move {
            let inner = inner
                .upgrade()
                .ok_or_else(|| StoreError::Unavailable("store dropped".to_string()))?;
            inner.apply_increment(&path, &field, delta);
            Ok(())
        }
        .boxed_local()
    }

    fn get(&self, path: &DocumentPath) -> LocalBoxFuture<'static, Result<DocumentSnapshot, StoreError>> {
        futures::future::ready(Ok(self.inner.snapshot(path))).boxed_local()
    }

    fn subscribe(&self, path: &DocumentPath, listener: SnapshotListener) -> Subscription {
        let key = self.inner.watchers.borrow_mut().insert(Watcher {
            path: path.clone(),
            callback: Some(listener),
        });

        let initial = self.inner.snapshot(path);
        self.inner.deliver(key, Ok(initial));

        let inner: Weak<Inner> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                let removed = inner.watchers.borrow_mut().remove(key);
                drop(removed);
            }
        })
    }
}
