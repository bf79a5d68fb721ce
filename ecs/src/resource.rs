use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::error::{EcsError, EcsResult};

/// A single type-erased resource with its own borrow lock.
struct ResourceEntry {
    value: RwLock<Box<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

/// Container for typed singleton values, keyed by type.
///
/// Borrows go through a per-entry `RwLock` used as a borrow flag: shared
/// borrows coexist, an exclusive borrow requires no other active borrow.
/// Conflicts are reported immediately (`try_read`/`try_write`), never waited on.
pub(crate) struct Resources {
    entries: HashMap<TypeId, ResourceEntry>,
}

impl Resources {
    /// Creates a new empty resource container.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Inserts or replaces the value of type `T`, returning the old one.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        let previous = self.remove::<T>();
        self.entries.insert(
            TypeId::of::<T>(),
            ResourceEntry {
                value: RwLock::new(Box::new(value)),
                type_name: type_name::<T>(),
            },
        );
        previous
    }

    /// Removes the value of type `T`, returning it if present.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        let entry = self.entries.remove(&TypeId::of::<T>())?;
        entry.value.into_inner().downcast::<T>().ok().map(|b| *b)
    }

    /// Returns whether a value of type `T` exists.
    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Type names of every stored value, in no particular order.
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.values().map(|e| e.type_name)
    }

    /// Drops every stored value.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Mutable access through `&mut self`; never conflicts.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())?
            .value
            .get_mut()
            .downcast_mut::<T>()
    }

    /// Borrows the value of type `T` immutably.
    ///
    /// Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::BorrowConflict`] if it is borrowed mutably.
    pub fn try_borrow<T: 'static>(&self) -> EcsResult<Option<ResourceRef<'_, T>>> {
        let Some(entry) = self.entries.get(&TypeId::of::<T>()) else {
            return Ok(None);
        };
        let guard = entry.value.try_read().ok_or(EcsError::BorrowConflict {
            type_name: entry.type_name,
        })?;
        Ok(Some(ResourceRef(RwLockReadGuard::map(guard, |b| {
            b.downcast_ref::<T>()
                .expect("resource stored under a mismatched TypeId")
        }))))
    }

    /// Borrows the value of type `T` mutably.
    ///
    /// Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::BorrowConflict`] if any other borrow is active.
    pub fn try_borrow_mut<T: 'static>(&self) -> EcsResult<Option<ResourceRefMut<'_, T>>> {
        let Some(entry) = self.entries.get(&TypeId::of::<T>()) else {
            return Ok(None);
        };
        let guard = entry.value.try_write().ok_or(EcsError::BorrowConflict {
            type_name: entry.type_name,
        })?;
        Ok(Some(ResourceRefMut(RwLockWriteGuard::map(guard, |b| {
            b.downcast_mut::<T>()
                .expect("resource stored under a mismatched TypeId")
        }))))
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared borrow of a resource. Releases the borrow when dropped.
pub struct ResourceRef<'a, T: 'static>(MappedRwLockReadGuard<'a, T>);

impl<T: 'static> Deref for ResourceRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for ResourceRef<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

/// Exclusive borrow of a resource. Releases the borrow when dropped.
pub struct ResourceRefMut<'a, T: 'static>(MappedRwLockWriteGuard<'a, T>);

impl<T: 'static> Deref for ResourceRefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: 'static> DerefMut for ResourceRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// A growable singleton collection of `T`, addressed by insertion index.
///
/// Indices stay valid across insertions and lookups. Removing index `i`
/// shifts every later element down by one, invalidating indices above `i`.
#[derive(Debug, Clone)]
pub struct ResourceArray<T> {
    items: Vec<T>,
}

impl<T> ResourceArray<T> {
    /// Creates a new empty array.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Appends a value and returns its index.
    pub fn push(&mut self, value: T) -> usize {
        self.items.push(value);
        self.items.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    /// Removes the value at `index`, shifting later elements down.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for ResourceArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> IntoIterator for &'a ResourceArray<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
