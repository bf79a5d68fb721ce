use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::commands::{CommandBuffer, Commands};
use crate::component_store::{Component, ComponentStore, ErasedStore};
use crate::entity::{Entity, EntityAllocator};
use crate::error::{EcsError, EcsResult};
use crate::events::{EventBus, EventData, EventPriority, EventReader, EventSender};
use crate::function_system::SystemId;
use crate::query::{QueryData, QueryFilter, QueryView, StoreGuard};
use crate::resource::{ResourceArray, ResourceRef, ResourceRefMut, Resources};
use crate::sparse_index::SparseIndex;

/// Shared borrow of a component (or of a whole store) held by a
/// [`Registry`]. Releases the borrow when dropped.
pub struct Ref<'a, T>(MappedRwLockReadGuard<'a, T>);

impl<T> Deref for Ref<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Ref<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

/// Exclusive borrow of a component held by a [`Registry`].
pub struct RefMut<'a, T>(MappedRwLockWriteGuard<'a, T>);

impl<T> Deref for RefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for RefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

type StoreCell = RwLock<Box<dyn ErasedStore>>;

/// The owner of every entity, component store, resource, event channel and
/// deferred command.
///
/// One [`ComponentStore`] exists per component type. Stores are created
/// lazily on first use and held behind a per-store `RwLock` that acts as a
/// borrow flag, so a query can borrow several stores through `&Registry` at
/// once. Conflicting borrows fail with [`EcsError::BorrowConflict`] instead
/// of blocking.
///
/// # Example
///
/// ```
/// use tessera_ecs::Registry;
///
/// #[derive(Debug, PartialEq)]
/// struct Health(u32);
///
/// let mut registry = Registry::new();
/// let e = registry.create();
/// registry.add_component(e, Health(10)).unwrap();
/// assert_eq!(*registry.get_component::<Health>(e).unwrap(), Health(10));
///
/// registry.destroy(e);
/// assert!(registry.get_component::<Health>(e).is_err());
/// ```
pub struct Registry {
    // Field order is teardown order: stores, resources, arrays, then entities.
    stores: HashMap<TypeId, StoreCell>,
    resources: Resources,
    resource_arrays: Resources,
    events: EventBus,
    /// Event subscriptions owned by systems, kept across invocations.
    system_readers: HashMap<(SystemId, TypeId), Box<dyn Any + Send + Sync>>,
    running_system: Option<SystemId>,
    commands: CommandBuffer,
    entities: EntityAllocator,
}

impl Registry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            stores: HashMap::new(),
            resources: Resources::new(),
            resource_arrays: Resources::new(),
            events: EventBus::new(),
            system_readers: HashMap::new(),
            running_system: None,
            commands: CommandBuffer::new(),
            entities: EntityAllocator::new(),
        }
    }

    // ---- Entity management ----

    /// Creates a new entity.
    ///
    /// A never-used slot starts at version 0; a recycled slot carries the
    /// generation bumped by its last destruction.
    pub fn create(&mut self) -> Entity {
        self.entities.allocate()
    }

    /// Creates `count` entities at once.
    pub fn create_many(&mut self, count: u32) -> Vec<Entity> {
        self.entities.allocate_many(count)
    }

    /// Destroys an entity, removing every component it owns.
    ///
    /// Returns `false` for stale, null or already destroyed handles.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.entities.deallocate(entity) {
            log::debug!("Ignoring destroy of dead entity {entity}");
            return false;
        }
        for store in self.stores.values_mut() {
            store.get_mut().remove_untyped(entity);
        }
        true
    }

    /// Returns whether the entity is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Returns the number of alive entities.
    pub fn entity_count(&self) -> usize {
        self.entities.count()
    }

    /// Iterates over all alive entities.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter_alive()
    }

    /// Number of entity slots retired after exhausting their generations.
    pub fn retired_slot_count(&self) -> u32 {
        self.entities.retired_count()
    }

    /// Number of destroyed slots waiting to be recycled by `create`.
    pub fn free_slot_count(&self) -> usize {
        self.entities.free_count()
    }

    pub(crate) fn alive_index(&self) -> &SparseIndex {
        self.entities.alive()
    }

    // ---- Components ----

    /// Creates the store for `T` if it does not exist yet. Returns `true`
    /// if a store was created.
    pub fn register_component<T: Component>(&mut self) -> bool {
        let created = !self.stores.contains_key(&TypeId::of::<T>());
        self.store_mut::<T>();
        created
    }

    /// Returns whether a store for `T` exists.
    pub fn is_registered<T: Component>(&self) -> bool {
        self.stores.contains_key(&TypeId::of::<T>())
    }

    /// Type names of every component store, in no particular order.
    pub fn component_type_names(&self) -> Vec<&'static str> {
        self.stores
            .values()
            .filter_map(|cell| cell.try_read().map(|store| store.type_name()))
            .collect()
    }

    /// Attaches `value` to `entity`, replacing any previous value of the
    /// same type, and returns a reference to the stored component.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidEntity`] if the entity is not alive.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<&mut T> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        Ok(self.store_mut::<T>().emplace(entity, value))
    }

    /// Borrows the component `T` of `entity`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidEntity`] if the entity is not alive
    /// - [`EcsError::MissingComponent`] if it has no `T`
    /// - [`EcsError::BorrowConflict`] if the `T` store is borrowed mutably
    pub fn get_component<T: Component>(&self, entity: Entity) -> EcsResult<Ref<'_, T>> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        let missing = || missing_component::<T>(entity);
        let cell = self.stores.get(&TypeId::of::<T>()).ok_or_else(missing)?;
        let guard = cell.try_read().ok_or_else(borrow_conflict::<T>)?;
        RwLockReadGuard::try_map(guard, |store| {
            store
                .as_any()
                .downcast_ref::<ComponentStore<T>>()?
                .get(entity)
        })
        .map(Ref)
        .map_err(|_| missing())
    }

    /// Mutable access to the component `T` of `entity`.
    ///
    /// # Errors
    ///
    /// Same as [`get_component`](Self::get_component), minus borrow
    /// conflicts (`&mut self` rules them out).
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> EcsResult<&mut T> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        self.stores
            .get_mut(&TypeId::of::<T>())
            .and_then(|cell| {
                cell.get_mut()
                    .as_any_mut()
                    .downcast_mut::<ComponentStore<T>>()?
                    .get_mut(entity)
            })
            .ok_or_else(|| missing_component::<T>(entity))
    }

    /// Borrows the component `T` of `entity` mutably through `&self`.
    ///
    /// # Errors
    ///
    /// Same as [`get_component`](Self::get_component); a conflict is
    /// reported if the store is borrowed in any way.
    pub fn borrow_component_mut<T: Component>(&self, entity: Entity) -> EcsResult<RefMut<'_, T>> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        let missing = || missing_component::<T>(entity);
        let cell = self.stores.get(&TypeId::of::<T>()).ok_or_else(missing)?;
        let guard = cell.try_write().ok_or_else(borrow_conflict::<T>)?;
        RwLockWriteGuard::try_map(guard, |store| {
            store
                .as_any_mut()
                .downcast_mut::<ComponentStore<T>>()?
                .get_mut(entity)
        })
        .map(RefMut)
        .map_err(|_| missing())
    }

    /// Returns whether `entity` has a `T`.
    ///
    /// Returns `false` while the `T` store is exclusively borrowed.
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.stores
            .get(&TypeId::of::<T>())
            .and_then(|cell| cell.try_read())
            .is_some_and(|store| store.contains_untyped(entity))
    }

    /// Detaches and returns the component `T` of `entity`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.stores
            .get_mut(&TypeId::of::<T>())?
            .get_mut()
            .as_any_mut()
            .downcast_mut::<ComponentStore<T>>()?
            .remove(entity)
    }

    /// Number of entities owning a `T`.
    ///
    /// Returns 0 while the `T` store is exclusively borrowed.
    pub fn component_count<T: Component>(&self) -> usize {
        self.stores
            .get(&TypeId::of::<T>())
            .and_then(|cell| cell.try_read())
            .map_or(0, |store| store.len())
    }

    /// Releases unused pages in every component store.
    pub fn shrink_to_fit(&mut self) {
        for cell in self.stores.values_mut() {
            cell.get_mut().shrink_to_fit();
        }
    }

    fn store_mut<T: Component>(&mut self) -> &mut ComponentStore<T> {
        self.stores
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                log::debug!("Creating component store for {}", type_name::<T>());
                RwLock::new(Box::new(ComponentStore::<T>::new()) as Box<dyn ErasedStore>)
            })
            .get_mut()
            .as_any_mut()
            .downcast_mut::<ComponentStore<T>>()
            .expect("component store registered under a mismatched TypeId")
    }

    pub(crate) fn lock_store_shared<T: Component>(&self) -> EcsResult<StoreGuard<'_>> {
        match self.stores.get(&TypeId::of::<T>()) {
            Some(cell) => cell
                .try_read()
                .map(StoreGuard::Shared)
                .ok_or_else(borrow_conflict::<T>),
            None => Ok(StoreGuard::Missing),
        }
    }

    pub(crate) fn lock_store_exclusive<T: Component>(&self) -> EcsResult<StoreGuard<'_>> {
        match self.stores.get(&TypeId::of::<T>()) {
            Some(cell) => cell
                .try_write()
                .map(StoreGuard::Exclusive)
                .ok_or_else(borrow_conflict::<T>),
            None => Ok(StoreGuard::Missing),
        }
    }

    // ---- Queries ----

    /// Creates a view over every entity owning all data terms of `D`.
    ///
    /// Stores named by `D` are created if missing.
    ///
    /// # Panics
    ///
    /// Panics if `D` borrows the same component type twice with a mutable
    /// term. Use [`try_query`](Self::try_query) to get an error instead.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_ecs::Registry;
    ///
    /// struct Position(f32);
    /// struct Velocity(f32);
    ///
    /// let mut registry = Registry::new();
    /// let e = registry.create();
    /// registry.add_component(e, Position(0.0)).unwrap();
    /// registry.add_component(e, Velocity(2.0)).unwrap();
    ///
    /// registry
    ///     .query::<(&mut Position, &Velocity)>()
    ///     .each(|_, (pos, vel): (&mut Position, &Velocity)| pos.0 += vel.0);
    /// assert_eq!(registry.get_component::<Position>(e).unwrap().0, 2.0);
    /// ```
    pub fn query<D: QueryData>(&mut self) -> QueryView<'_, D> {
        self.query_filtered::<D, ()>()
    }

    /// Like [`query`](Self::query) with a filter tuple of
    /// [`With`](crate::With) / [`Without`](crate::Without) terms.
    pub fn query_filtered<D: QueryData, F: QueryFilter>(&mut self) -> QueryView<'_, D, F> {
        D::prepare(self);
        F::prepare(self);
        QueryView::new(self).unwrap_or_else(|err| panic!("invalid query: {err}"))
    }

    /// Creates a view through `&self`.
    ///
    /// Missing stores are treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::BorrowConflict`] if a requested store is
    /// borrowed in a conflicting way.
    pub fn try_query<D: QueryData, F: QueryFilter>(&self) -> EcsResult<QueryView<'_, D, F>> {
        QueryView::new(self)
    }

    // ---- Resources ----

    /// Inserts or replaces the resource of type `T`. Returns the previous
    /// value, if any.
    pub fn emplace_resource<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.resources.insert(value)
    }

    /// Borrows the resource of type `T`. Returns `None` if it does not
    /// exist or is borrowed mutably.
    pub fn get_resource<T: Send + Sync + 'static>(&self) -> Option<ResourceRef<'_, T>> {
        self.try_get_resource().ok()
    }

    /// Borrows the resource of type `T`.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingResource`] or [`EcsError::BorrowConflict`].
    pub fn try_get_resource<T: Send + Sync + 'static>(&self) -> EcsResult<ResourceRef<'_, T>> {
        self.resources
            .try_borrow::<T>()?
            .ok_or(EcsError::MissingResource {
                resource: type_name::<T>(),
            })
    }

    pub fn get_resource_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.resources.get_mut::<T>()
    }

    /// Borrows the resource of type `T` mutably through `&self`.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingResource`] or [`EcsError::BorrowConflict`].
    pub fn try_get_resource_mut<T: Send + Sync + 'static>(
        &self,
    ) -> EcsResult<ResourceRefMut<'_, T>> {
        self.resources
            .try_borrow_mut::<T>()?
            .ok_or(EcsError::MissingResource {
                resource: type_name::<T>(),
            })
    }

    pub fn remove_resource<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.resources.remove::<T>()
    }

    pub fn has_resource<T: Send + Sync + 'static>(&self) -> bool {
        self.resources.contains::<T>()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Type names of every resource, in no particular order.
    pub fn resource_type_names(&self) -> Vec<&'static str> {
        self.resources.type_names().collect()
    }

    // ---- Resource arrays ----

    /// Appends `value` to the resource array of `T`, creating the array on
    /// first use. Returns the element's index.
    pub fn emplace_resource_array<T: Send + Sync + 'static>(&mut self, value: T) -> usize {
        if let Some(array) = self.resource_arrays.get_mut::<ResourceArray<T>>() {
            return array.push(value);
        }
        log::debug!("Creating resource array for {}", type_name::<T>());
        let mut array = ResourceArray::new();
        let index = array.push(value);
        self.resource_arrays.insert(array);
        index
    }

    /// Borrows the resource array of `T`. Returns `None` if it does not
    /// exist or is borrowed mutably.
    pub fn get_resource_array<T: Send + Sync + 'static>(
        &self,
    ) -> Option<ResourceRef<'_, ResourceArray<T>>> {
        self.try_get_resource_array().ok()
    }

    /// Borrows the resource array of `T`.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingResourceArray`] or [`EcsError::BorrowConflict`].
    pub fn try_get_resource_array<T: Send + Sync + 'static>(
        &self,
    ) -> EcsResult<ResourceRef<'_, ResourceArray<T>>> {
        self.resource_arrays
            .try_borrow::<ResourceArray<T>>()?
            .ok_or(EcsError::MissingResourceArray {
                resource: type_name::<T>(),
            })
    }

    pub fn get_resource_array_mut<T: Send + Sync + 'static>(
        &mut self,
    ) -> Option<&mut ResourceArray<T>> {
        self.resource_arrays.get_mut::<ResourceArray<T>>()
    }

    /// Borrows the resource array of `T` mutably through `&self`.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingResourceArray`] or [`EcsError::BorrowConflict`].
    pub fn try_get_resource_array_mut<T: Send + Sync + 'static>(
        &self,
    ) -> EcsResult<ResourceRefMut<'_, ResourceArray<T>>> {
        self.resource_arrays
            .try_borrow_mut::<ResourceArray<T>>()?
            .ok_or(EcsError::MissingResourceArray {
                resource: type_name::<T>(),
            })
    }

    /// Removes the whole resource array of `T`.
    pub fn remove_resource_array<T: Send + Sync + 'static>(&mut self) -> Option<ResourceArray<T>> {
        self.resource_arrays.remove::<ResourceArray<T>>()
    }

    /// Removes one element; later elements shift down by one.
    pub fn remove_resource_array_element<T: Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> Option<T> {
        self.get_resource_array_mut::<T>()?.remove(index)
    }

    pub fn has_resource_array<T: Send + Sync + 'static>(&self) -> bool {
        self.resource_arrays.contains::<ResourceArray<T>>()
    }

    // ---- Events ----

    /// Queues an event for the next [`dispatch_events`](Self::dispatch_events).
    pub fn emit_event<T: EventData>(&self, value: T, priority: EventPriority) {
        self.events.send(value, priority);
    }

    /// Publishes an event to every reader without waiting for a dispatch.
    /// The next dispatch republishes it to readers that have not read it.
    pub fn emit_event_immediate<T: EventData>(&self, value: T, priority: EventPriority) {
        self.events.send_immediate(value, priority);
    }

    /// Subscribes a new reader to events of type `T`.
    pub fn get_event_reader<T: EventData>(&self) -> EventReader<T> {
        self.events.reader()
    }

    /// Returns a cloneable producer for events of type `T`.
    pub fn event_sender<T: EventData>(&self) -> EventSender<T> {
        self.events.sender()
    }

    /// Publishes every queued event. Returns the number published.
    pub fn dispatch_events(&self) -> usize {
        self.events.dispatch()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Marks the system whose parameters are being resolved.
    pub(crate) fn set_running_system(&mut self, id: Option<SystemId>) {
        self.running_system = id;
    }

    /// Subscribes the running system to `T` unless it already is.
    pub(crate) fn prepare_system_reader<T: EventData>(&mut self) {
        let Some(id) = self.running_system else {
            self.events.channel::<T>();
            return;
        };
        let events = &self.events;
        self.system_readers
            .entry((id, TypeId::of::<T>()))
            .or_insert_with(|| Box::new(events.reader::<T>()));
    }

    /// A handle on the running system's subscription to `T`, or a fresh
    /// reader when no system is running.
    pub(crate) fn system_event_reader<T: EventData>(&self) -> EventReader<T> {
        self.running_system
            .and_then(|id| self.system_readers.get(&(id, TypeId::of::<T>())))
            .and_then(|reader| reader.downcast_ref::<EventReader<T>>())
            .map_or_else(|| self.events.reader(), EventReader::share)
    }

    // ---- Commands ----

    /// Returns a handle for queueing deferred structural changes.
    pub fn commands(&self) -> Commands<'_> {
        Commands::new(&self.commands, self)
    }

    /// Applies every queued command in order. Commands queued while
    /// applying are applied too. Returns the number applied.
    pub fn apply_commands(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let commands = self.commands.drain();
            if commands.is_empty() {
                return applied;
            }
            applied += commands.len();
            for command in commands {
                command(self);
            }
        }
    }

    /// Number of commands waiting to be applied.
    pub fn pending_command_count(&self) -> usize {
        self.commands.len()
    }

    // ---- Teardown ----

    /// Drops every component store, resource, resource array, queued
    /// command and event, then destroys all entities.
    ///
    /// Entity generations survive, so handles minted before the call stay
    /// stale.
    pub fn clear(&mut self) {
        self.stores.clear();
        self.resources.clear();
        self.resource_arrays.clear();
        self.commands.drain();
        self.system_readers.clear();
        self.events.clear();
        self.entities.clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_component<T>(entity: Entity) -> EcsError {
    EcsError::MissingComponent {
        entity,
        component: type_name::<T>(),
    }
}

fn borrow_conflict<T>() -> EcsError {
    EcsError::BorrowConflict {
        type_name: type_name::<T>(),
    }
}
