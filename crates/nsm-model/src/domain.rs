use nsm_api::{NsmError, Result};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Identifies a registered modification handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type AddFn<T> = Box<dyn Fn(&T) + Send + Sync>;
type UpdateFn<T> = Box<dyn Fn(&T, &T) + Send + Sync>;
type DeleteFn<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Callbacks fired on changes to a domain.
///
/// Handlers run synchronously while the domain's write lock is held, so they
/// see changes in the order they were made. A handler must not call back into
/// the domain that fired it.
pub struct ModificationHandler<T> {
    pub on_add: Option<AddFn<T>>,
    /// Receives the old and the new value.
    pub on_update: Option<UpdateFn<T>>,
    pub on_delete: Option<DeleteFn<T>>,
}

impl<T> Default for ModificationHandler<T> {
    fn default() -> Self {
        Self {
            on_add: None,
            on_update: None,
            on_delete: None,
        }
    }
}

impl<T> ModificationHandler<T> {
    pub fn on_add(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_add = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&T, &T) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }
}

struct Inner<T> {
    items: HashMap<String, T>,
    handlers: Vec<(HandlerId, ModificationHandler<T>)>,
    next_handler: u64,
}

/// A concurrent string-keyed store with change notification.
///
/// Values are cloned in and out: a value returned by [`Domain::load`] is a
/// snapshot and mutating it never changes the stored entity. Read-modify-write
/// must go through [`Domain::apply_changes`].
///
/// `store` on an existing key fires the update handlers with the old and new
/// value; on a new key it fires the add handlers.
pub struct Domain<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Clone> Default for Domain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Domain<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: HashMap::new(),
                handlers: Vec::new(),
                next_handler: 0,
            }),
        }
    }

    pub fn store(&self, key: impl Into<String>, value: T) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let old = inner.items.insert(key.into(), value.clone());
        match old {
            Some(old) => {
                for (_, h) in &inner.handlers {
                    if let Some(f) = &h.on_update {
                        f(&old, &value);
                    }
                }
            }
            None => {
                for (_, h) in &inner.handlers {
                    if let Some(f) = &h.on_add {
                        f(&value);
                    }
                }
            }
        }
    }

    pub fn load(&self, key: &str) -> Option<T> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.get(key).cloned()
    }

    /// Removes the entity; deleting an absent key is a no-op.
    pub fn delete(&self, key: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = inner.items.remove(key) {
            for (_, h) in &inner.handlers {
                if let Some(f) = &h.on_delete {
                    f(&old);
                }
            }
        }
    }

    /// Loads, mutates and stores the entity under one write lock.
    ///
    /// Returns the updated value, or `None` if the key is absent.
    pub fn apply_changes(&self, key: &str, change: impl FnOnce(&mut T)) -> Option<T> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let current = inner.items.get_mut(key)?;
        let old = current.clone();
        change(current);
        let new = current.clone();
        for (_, h) in &inner.handlers {
            if let Some(f) = &h.on_update {
                f(&old, &new);
            }
        }
        Some(new)
    }

    /// Returns some entity matching `predicate`; `None` matches any entity.
    ///
    /// `kind` names the entity in the error when nothing matches.
    pub fn select(&self, kind: &'static str, predicate: Option<&dyn Fn(&T) -> bool>) -> Result<T> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .items
            .values()
            .find(|v| predicate.map_or(true, |p| p(v)))
            .cloned()
            .ok_or(NsmError::NoMatch(kind))
    }

    pub fn values(&self) -> Vec<T> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_handler(&self, handler: ModificationHandler<T>) -> HandlerId {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = HandlerId(inner.next_handler);
        inner.next_handler += 1;
        inner.handlers.push((id, handler));
        id
    }

    /// Returns `false` if no handler with this id was registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.handlers.len();
        inner.handlers.retain(|(h, _)| *h != id);
        inner.handlers.len() != before
    }
}
