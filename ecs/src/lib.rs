//! # Tessera ECS
//!
//! Sparse-set Entity-Component-System with a staged, single-threaded
//! scheduler and a priority event bus.
//!
//! ## Core Types
//!
//! - [`Entity`] — Generational entity handle (32-bit slot, 32-bit version)
//! - [`Registry`] — Owns entities, component stores, resources and events
//! - [`SparseIndex`] / [`ComponentStore`] — Paged sparse sets, one per component type
//! - [`Ref`] / [`RefMut`] — Borrow-checked access to single components
//!
//! ## Queries
//!
//! - [`QueryView`] — Intersection of component stores, driven by the smallest one
//! - [`With`] / [`Without`] — Presence filters that do not fetch data
//!
//! ## Systems & Scheduling
//!
//! - [`SystemParam`] — Values injected into system functions
//! - [`Res`] / [`ResMut`] / [`ResArray`] / [`ResArrayMut`] — Resource parameters
//! - [`Commands`] — Deferred structural changes, applied after each system
//! - [`IntoSystem`] / [`SystemFn`] — Functions converted to type-erased systems
//! - [`Schedule`] — `StartUp`, update stages and `CleanUp`, run in order
//!
//! ## Events
//!
//! - [`EventBus`] — One channel per event type
//! - [`EventReader`] / [`EventSender`] — Per-consumer cursor and cloneable producer
//! - [`EventPriority`] / [`EventFilter`] — Delivery order and reader-side filtering
//!
//! See `DESIGN.md` at the repository root for architecture decisions.

mod commands;
mod component_store;
mod entity;
mod error;
mod events;
mod function_system;
mod query;
mod registry;
mod resource;
mod schedule;
mod sparse_index;
mod system_param;

pub use commands::{Command, CommandBuffer, Commands, SpawnBuilder};
pub use component_store::{Component, ComponentStore, ErasedStore};
pub use entity::Entity;
pub use error::{EcsError, EcsResult};
pub use events::{
    Event, EventBus, EventChannel, EventData, EventFilter, EventPriority, EventReader, EventSender,
};
pub use function_system::{IntoSystem, IsSystemFn, SystemFn, SystemId, SystemParamFunction};
pub use query::{QueryData, QueryFilter, QueryView, StoreGuard, With, Without};
pub use registry::{Ref, RefMut, Registry};
pub use resource::{ResourceArray, ResourceRef, ResourceRefMut};
pub use schedule::{Schedule, ScheduleState, Stage, StageLabel};
pub use sparse_index::{PAGE_SIZE, SparseIndex};
pub use system_param::{
    OptionalParam, ParamKind, Res, ResArray, ResArrayMut, ResMut, SystemParam,
};
