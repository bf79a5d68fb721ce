use std::any::{Any, type_name};

use crate::entity::Entity;
use crate::sparse_index::{PAGE_SIZE, SparseIndex};

/// Marker trait for component types.
///
/// Blanket-implemented for every `Send + Sync + 'static` type; concrete
/// components are plain data supplied by the application.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Densely packed storage for one component type.
///
/// Pairs a [`SparseIndex`] with a paged payload array that is index-aligned
/// with the index's packed entities: the component of the entity at packed
/// position `p` lives in page `p / PAGE_SIZE`, offset `p % PAGE_SIZE`.
/// Payload pages are allocated with a fixed capacity of [`PAGE_SIZE`] and
/// never reallocate, so growing the store never moves existing components.
///
/// Zero-sized ("tag") components only record membership: their pages never
/// allocate (see [`IS_TAG`](Self::IS_TAG)).
pub struct ComponentStore<T> {
    index: SparseIndex,
    pages: Vec<Vec<T>>,
}

#[inline]
fn locate(position: usize) -> (usize, usize) {
    (position / PAGE_SIZE, position % PAGE_SIZE)
}

impl<T> ComponentStore<T> {
    /// `true` for zero-sized component types, which store presence only.
    pub const IS_TAG: bool = size_of::<T>() == 0;

    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            index: SparseIndex::new(),
            pages: Vec::new(),
        }
    }

    /// Attaches `value` to `entity` and returns a reference to the stored
    /// component.
    ///
    /// A fresh entity is appended to the packed arrays. Emplacing onto an
    /// entity that already has the component keeps its packed position and
    /// overwrites the payload.
    pub fn emplace(&mut self, entity: Entity, value: T) -> &mut T {
        let (position, fresh) = self.index.insert_full(entity);
        let (page, offset) = locate(position);
        if fresh {
            if page == self.pages.len() {
                self.pages.push(Vec::with_capacity(PAGE_SIZE));
            }
            debug_assert_eq!(self.pages[page].len(), offset);
            self.pages[page].push(value);
        } else {
            self.pages[page][offset] = value;
        }
        &mut self.pages[page][offset]
    }

    /// Returns the component of `entity`, if present.
    pub fn get(&self, entity: Entity) -> Option<&T> {
        let position = self.index.try_packed_index(entity)?;
        Some(self.at(position))
    }

    /// Returns the component of `entity` mutably, if present.
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let position = self.index.try_packed_index(entity)?;
        Some(self.at_mut(position))
    }

    /// Returns the component of `entity`.
    ///
    /// # Panics
    ///
    /// Panics if the entity does not have this component.
    pub fn fetch(&self, entity: Entity) -> &T {
        self.get(entity).unwrap_or_else(|| missing::<T>(entity))
    }

    /// Returns the component of `entity` mutably.
    ///
    /// # Panics
    ///
    /// Panics if the entity does not have this component.
    pub fn fetch_mut(&mut self, entity: Entity) -> &mut T {
        match self.index.try_packed_index(entity) {
            Some(position) => self.at_mut(position),
            None => missing::<T>(entity),
        }
    }

    pub(crate) fn at(&self, position: usize) -> &T {
        let (page, offset) = locate(position);
        &self.pages[page][offset]
    }

    pub(crate) fn at_mut(&mut self, position: usize) -> &mut T {
        let (page, offset) = locate(position);
        &mut self.pages[page][offset]
    }

    /// Detaches the component from `entity` and returns it.
    ///
    /// Mirrors the index's swap-remove on the payload so both stay in
    /// lockstep. Returns `None` if the entity did not have the component.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let position = self.index.remove(entity)?;
        // The old tail sat at the index's new length.
        let (tail_page, _) = locate(self.index.len());
        let tail = self.pages.get_mut(tail_page).and_then(Vec::pop)?;
        if position == self.index.len() {
            return Some(tail);
        }
        Some(std::mem::replace(self.at_mut(position), tail))
    }

    /// Returns whether `entity` has this component.
    pub fn contains(&self, entity: Entity) -> bool {
        self.index.contains(entity)
    }

    /// Returns the number of stored components.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entities owning a component, in packed order.
    pub fn entities(&self) -> &[Entity] {
        self.index.entities()
    }

    /// The underlying sparse index.
    pub fn index(&self) -> &SparseIndex {
        &self.index
    }

    /// Iterates over `(entity, &component)` pairs, back to front.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.index
            .entities()
            .iter()
            .rev()
            .copied()
            .zip(self.pages.iter().rev().flat_map(|p| p.iter().rev()))
    }

    /// Iterates over `(entity, &mut component)` pairs, back to front.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.index
            .entities()
            .iter()
            .rev()
            .copied()
            .zip(self.pages.iter_mut().rev().flat_map(|p| p.iter_mut().rev()))
    }

    /// Number of payload pages holding data. Always 0 for tag components.
    pub fn payload_page_count(&self) -> usize {
        if Self::IS_TAG {
            0
        } else {
            self.pages.iter().filter(|p| p.capacity() > 0).count()
        }
    }

    /// Removes every component and releases all pages.
    pub fn clear(&mut self) {
        self.index.clear();
        self.pages.clear();
    }

    /// Releases empty payload pages and unused sparse pages.
    pub fn shrink_to_fit(&mut self) {
        while self.pages.last().is_some_and(Vec::is_empty) {
            self.pages.pop();
        }
        self.pages.shrink_to_fit();
        self.index.shrink_to_fit();
    }
}

#[cold]
fn missing<T>(entity: Entity) -> ! {
    panic!("missing component `{}` on entity {entity}", type_name::<T>())
}

impl<T> Default for ComponentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe view of a [`ComponentStore`] used by the
/// [`Registry`](crate::Registry) to hold stores of different types in one
/// map and to fan out entity destruction.
pub trait ErasedStore: Any + Send + Sync {
    /// Removes the entity's component, if any. Returns true if removed.
    fn remove_untyped(&mut self, entity: Entity) -> bool;

    /// Checks if the entity has a component in this store.
    fn contains_untyped(&self, entity: Entity) -> bool;

    /// Returns the number of stored components.
    fn len(&self) -> usize;

    /// Returns whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entities owning a component, in packed order.
    fn entities(&self) -> &[Entity];

    /// The store's sparse index, used by queries to intersect stores.
    fn sparse_index(&self) -> &SparseIndex;

    /// Removes every component.
    fn clear(&mut self);

    /// Releases pages that no longer hold components.
    fn shrink_to_fit(&mut self);

    /// Human-readable component type name.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStore for ComponentStore<T> {
    fn remove_untyped(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn contains_untyped(&self, entity: Entity) -> bool {
        self.contains(entity)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn entities(&self) -> &[Entity] {
        self.index.entities()
    }

    fn sparse_index(&self) -> &SparseIndex {
        &self.index
    }

    fn clear(&mut self) {
        ComponentStore::clear(self);
    }

    fn shrink_to_fit(&mut self) {
        ComponentStore::shrink_to_fit(self);
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
