use std::cell::Cell;
use std::marker::PhantomData;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::component_store::{Component, ComponentStore, ErasedStore};
use crate::entity::Entity;
use crate::error::EcsResult;
use crate::registry::Registry;
use crate::sparse_index::SparseIndex;

/// A borrowed component store held by a [`QueryView`].
///
/// `Missing` stands for a store that was never created: it is treated as
/// empty.
pub enum StoreGuard<'r> {
    Shared(RwLockReadGuard<'r, Box<dyn ErasedStore>>),
    Exclusive(RwLockWriteGuard<'r, Box<dyn ErasedStore>>),
    Missing,
}

impl StoreGuard<'_> {
    fn index(&self) -> Option<&SparseIndex> {
        match self {
            Self::Shared(store) => Some(store.sparse_index()),
            Self::Exclusive(store) => Some(store.sparse_index()),
            Self::Missing => None,
        }
    }

    fn contains(&self, entity: Entity) -> bool {
        self.index().is_some_and(|index| index.contains(entity))
    }

    fn store<T: Component>(&self) -> Option<&ComponentStore<T>> {
        match self {
            Self::Shared(store) => store.as_any().downcast_ref(),
            Self::Exclusive(store) => store.as_any().downcast_ref(),
            Self::Missing => None,
        }
    }

    fn store_mut<T: Component>(&mut self) -> Option<&mut ComponentStore<T>> {
        match self {
            Self::Exclusive(store) => store.as_any_mut().downcast_mut(),
            Self::Shared(_) | Self::Missing => None,
        }
    }
}

/// The data terms of a query: `&T`, `&mut T`, or tuples of them.
///
/// Implemented for tuples of up to 8 terms. Each term borrows one component
/// store; terms are fetched in declaration order.
pub trait QueryData {
    /// What a callback receives per matching entity.
    type Item<'a>;

    /// Creates the stores this term reads.
    fn prepare(registry: &mut Registry);

    /// Borrows the stores this term reads, in declaration order.
    fn acquire<'r>(registry: &'r Registry, guards: &mut Vec<StoreGuard<'r>>) -> EcsResult<()>;

    /// Fetches the item of `entity`, consuming one guard per term.
    fn fetch<'a>(
        guards: &mut std::slice::IterMut<'a, StoreGuard<'_>>,
        entity: Entity,
    ) -> Option<Self::Item<'a>>;
}

impl<T: Component> QueryData for &T {
    type Item<'a> = &'a T;

    fn prepare(registry: &mut Registry) {
        registry.register_component::<T>();
    }

    fn acquire<'r>(registry: &'r Registry, guards: &mut Vec<StoreGuard<'r>>) -> EcsResult<()> {
        guards.push(registry.lock_store_shared::<T>()?);
        Ok(())
    }

    fn fetch<'a>(
        guards: &mut std::slice::IterMut<'a, StoreGuard<'_>>,
        entity: Entity,
    ) -> Option<&'a T> {
        let guard: &'a StoreGuard<'_> = guards.next()?;
        guard.store::<T>()?.get(entity)
    }
}

impl<T: Component> QueryData for &mut T {
    type Item<'a> = &'a mut T;

    fn prepare(registry: &mut Registry) {
        registry.register_component::<T>();
    }

    fn acquire<'r>(registry: &'r Registry, guards: &mut Vec<StoreGuard<'r>>) -> EcsResult<()> {
        guards.push(registry.lock_store_exclusive::<T>()?);
        Ok(())
    }

    fn fetch<'a>(
        guards: &mut std::slice::IterMut<'a, StoreGuard<'_>>,
        entity: Entity,
    ) -> Option<&'a mut T> {
        guards.next()?.store_mut::<T>()?.get_mut(entity)
    }
}

macro_rules! impl_query_data {
    ($($T:ident),*) => {
        impl<$($T: QueryData),*> QueryData for ($($T,)*) {
            type Item<'a> = ($($T::Item<'a>,)*);

            #[allow(unused_variables)]
            fn prepare(registry: &mut Registry) {
                $($T::prepare(registry);)*
            }

            #[allow(unused_variables)]
            fn acquire<'r>(
                registry: &'r Registry,
                guards: &mut Vec<StoreGuard<'r>>,
            ) -> EcsResult<()> {
                $($T::acquire(registry, guards)?;)*
                Ok(())
            }

            #[allow(unused_variables, clippy::unused_unit)]
            fn fetch<'a>(
                guards: &mut std::slice::IterMut<'a, StoreGuard<'_>>,
                entity: Entity,
            ) -> Option<Self::Item<'a>> {
                Some(($($T::fetch(guards, entity)?,)*))
            }
        }
    };
}

impl_query_data!();
impl_query_data!(A);
impl_query_data!(A, B);
impl_query_data!(A, B, C);
impl_query_data!(A, B, C, D);
impl_query_data!(A, B, C, D, E);
impl_query_data!(A, B, C, D, E, F);
impl_query_data!(A, B, C, D, E, F, G);
impl_query_data!(A, B, C, D, E, F, G, H);

/// Filter terms of a query: [`With`], [`Without`], or tuples of them.
pub trait QueryFilter {
    /// Creates the stores this filter inspects.
    fn prepare(registry: &mut Registry);

    /// Borrows the inspected stores, sorting them into required and
    /// excluded sets.
    fn acquire<'r>(
        registry: &'r Registry,
        with: &mut Vec<StoreGuard<'r>>,
        without: &mut Vec<StoreGuard<'r>>,
    ) -> EcsResult<()>;
}

/// Requires component `T` without borrowing its data. This is how tag
/// components take part in a query.
pub struct With<T>(PhantomData<fn() -> T>);

/// Excludes entities owning component `T`.
pub struct Without<T>(PhantomData<fn() -> T>);

impl<T: Component> QueryFilter for With<T> {
    fn prepare(registry: &mut Registry) {
        registry.register_component::<T>();
    }

    fn acquire<'r>(
        registry: &'r Registry,
        with: &mut Vec<StoreGuard<'r>>,
        _without: &mut Vec<StoreGuard<'r>>,
    ) -> EcsResult<()> {
        with.push(registry.lock_store_shared::<T>()?);
        Ok(())
    }
}

impl<T: Component> QueryFilter for Without<T> {
    fn prepare(registry: &mut Registry) {
        registry.register_component::<T>();
    }

    fn acquire<'r>(
        registry: &'r Registry,
        _with: &mut Vec<StoreGuard<'r>>,
        without: &mut Vec<StoreGuard<'r>>,
    ) -> EcsResult<()> {
        without.push(registry.lock_store_shared::<T>()?);
        Ok(())
    }
}

macro_rules! impl_query_filter {
    ($($T:ident),*) => {
        impl<$($T: QueryFilter),*> QueryFilter for ($($T,)*) {
            #[allow(unused_variables)]
            fn prepare(registry: &mut Registry) {
                $($T::prepare(registry);)*
            }

            #[allow(unused_variables)]
            fn acquire<'r>(
                registry: &'r Registry,
                with: &mut Vec<StoreGuard<'r>>,
                without: &mut Vec<StoreGuard<'r>>,
            ) -> EcsResult<()> {
                $($T::acquire(registry, with, without)?;)*
                Ok(())
            }
        }
    };
}

impl_query_filter!();
impl_query_filter!(A);
impl_query_filter!(A, B);
impl_query_filter!(A, B, C);
impl_query_filter!(A, B, C, D);
impl_query_filter!(A, B, C, D, E);
impl_query_filter!(A, B, C, D, E, F);
impl_query_filter!(A, B, C, D, E, F, G);
impl_query_filter!(A, B, C, D, E, F, G, H);

/// A view over every alive entity that owns all data terms of `D`, all
/// [`With`] terms of `F` and none of its [`Without`] terms.
///
/// Matching scans only the smallest of the live-entity set and the
/// data/`With` stores, and checks the others by sparse lookup. Stores stay
/// borrowed for as long as the view lives.
///
/// Visit order follows the packed order of the smallest store and is not
/// stable across removals.
pub struct QueryView<'r, D: QueryData, F: QueryFilter = ()> {
    alive: &'r SparseIndex,
    data: Vec<StoreGuard<'r>>,
    with: Vec<StoreGuard<'r>>,
    without: Vec<StoreGuard<'r>>,
    scanned: Cell<usize>,
    _marker: PhantomData<fn() -> (D, F)>,
}

impl<'r, D: QueryData, F: QueryFilter> QueryView<'r, D, F> {
    pub(crate) fn new(registry: &'r Registry) -> EcsResult<Self> {
        let mut data = Vec::new();
        D::acquire(registry, &mut data)?;
        let mut with = Vec::new();
        let mut without = Vec::new();
        F::acquire(registry, &mut with, &mut without)?;
        Ok(Self {
            alive: registry.alive_index(),
            data,
            with,
            without,
            scanned: Cell::new(0),
            _marker: PhantomData,
        })
    }

    fn required(&self) -> impl Iterator<Item = &StoreGuard<'r>> {
        self.data.iter().chain(&self.with)
    }

    /// The index to scan, or `None` when a required store does not exist.
    fn driver(&self) -> Option<&SparseIndex> {
        let mut smallest = self.alive;
        for guard in self.required() {
            let index = guard.index()?;
            if index.len() < smallest.len() {
                smallest = index;
            }
        }
        Some(smallest)
    }

    /// Returns whether `entity` matches the view.
    pub fn contains(&self, entity: Entity) -> bool {
        self.alive.contains(entity)
            && self.required().all(|guard| guard.contains(entity))
            && !self.without.iter().any(|guard| guard.contains(entity))
    }

    /// Collects every matching entity.
    pub fn entities(&self) -> Vec<Entity> {
        let Some(driver) = self.driver() else {
            self.scanned.set(0);
            return Vec::new();
        };
        self.scanned.set(driver.len());
        driver.iter().filter(|&e| self.contains(e)).collect()
    }

    /// Calls `f` once per matching entity with its items, in declaration
    /// order.
    ///
    /// The matching set is computed before the first call.
    pub fn each<Func>(&mut self, mut f: Func)
    where
        Func: for<'a> FnMut(Entity, D::Item<'a>),
    {
        for entity in self.entities() {
            if let Some(item) = D::fetch(&mut self.data.iter_mut(), entity) {
                f(entity, item);
            }
        }
    }

    /// Items of `entity` if it matches the view.
    pub fn get(&mut self, entity: Entity) -> Option<D::Item<'_>> {
        if !self.contains(entity) {
            return None;
        }
        D::fetch(&mut self.data.iter_mut(), entity)
    }

    /// Upper bound on the number of matches: the size of the smallest of
    /// the live set and the data/`With` stores.
    pub fn size(&self) -> usize {
        self.driver().map_or(0, SparseIndex::len)
    }

    /// Exact number of matches.
    pub fn count(&self) -> usize {
        self.entities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0 || self.count() == 0
    }

    /// Candidates examined by the last matching pass.
    pub fn scanned(&self) -> usize {
        self.scanned.get()
    }
}
