//! Minimal publish/subscribe primitives.
//!
//! [`Listeners`] is a list of callbacks invoked synchronously on every emit.
//! [`Observable`] pairs a value with a listener list and notifies after each
//! change.

use std::sync::{Arc, Mutex, MutexGuard};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerList<T> {
  next_id: u64,
  entries: Vec<(u64, Callback<T>)>,
}

/// Callback list shared between a publisher and its subscription handles.
pub struct Listeners<T> {
  inner: Arc<Mutex<ListenerList<T>>>,
}

impl<T: 'static> Listeners<T> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(ListenerList {
        next_id: 0,
        entries: Vec::new(),
      })),
    }
  }

  /// Register a listener. It stays registered until the returned handle is
  /// dropped or [`Subscription::unsubscribe`] is called.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    let id = {
      let mut list = lock(&self.inner);
      let id = list.next_id;
      list.next_id += 1;
      list.entries.push((id, Arc::new(listener)));
      id
    };

    let weak = Arc::downgrade(&self.inner);
    Subscription {
      cancel: Some(Box::new(move || {
        if let Some(inner) = weak.upgrade() {
          lock(&inner).entries.retain(|(entry_id, _)| *entry_id != id);
        }
      })),
    }
  }

  /// Call every listener with `value`.
  pub fn emit(&self, value: &T) {
    // Snapshot so listeners may subscribe or unsubscribe while being called
    let callbacks: Vec<Callback<T>> = lock(&self.inner)
      .entries
      .iter()
      .map(|(_, cb)| Arc::clone(cb))
      .collect();

    for callback in callbacks {
      callback(value);
    }
  }

  pub fn len(&self) -> usize {
    lock(&self.inner).entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: 'static> Default for Listeners<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Handle returned by `subscribe`. Dropping it removes the listener.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
  pub fn unsubscribe(mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.cancel.is_some())
      .finish()
  }
}

/// A value with change notification.
pub struct Observable<T> {
  value: Mutex<T>,
  listeners: Listeners<T>,
}

impl<T: Clone + PartialEq + Send + 'static> Observable<T> {
  pub fn new(initial: T) -> Self {
    Self {
      value: Mutex::new(initial),
      listeners: Listeners::new(),
    }
  }

  pub fn get(&self) -> T {
    lock(&self.value).clone()
  }

  /// Store `value` and notify listeners if it differs from the previous one.
  /// Returns the previous value.
  pub fn set(&self, value: T) -> T {
    let previous = {
      let mut current = lock(&self.value);
      std::mem::replace(&mut *current, value.clone())
    };
    if previous != value {
      self.listeners.emit(&value);
    }
    previous
  }

  /// Subscribe to changes. The listener is called with the current value
  /// right away.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    listener(&self.get());
    self.listeners.subscribe(listener)
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  // Listener state stays consistent even if a callback panicked
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
