use parking_lot::Mutex;

use crate::component_store::Component;
use crate::entity::Entity;
use crate::events::{EventData, EventPriority};
use crate::registry::Registry;

/// A boxed command closure that mutates the registry.
pub type Command = Box<dyn FnOnce(&mut Registry) + Send>;

/// A boxed insert closure that attaches a component to a spawned entity.
type InsertFn = Box<dyn FnOnce(&mut Registry, Entity) + Send>;

/// A thread-safe queue of deferred registry mutations.
///
/// Systems only see the registry through shared borrows while their
/// parameters are alive, so structural changes (create, destroy, attach,
/// detach) are queued here and applied by
/// [`Registry::apply_commands`] once the system returns.
pub struct CommandBuffer {
    commands: Mutex<Vec<Command>>,
}

impl CommandBuffer {
    /// Creates a new empty command buffer.
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Queues a raw command closure.
    pub fn push(&self, command: impl FnOnce(&mut Registry) + Send + 'static) {
        self.commands.lock().push(Box::new(command));
    }

    /// Drains all queued commands, returning them in queue order.
    pub fn drain(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock())
    }

    /// Returns the number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    /// Returns whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for queueing deferred changes, with read access to entity
/// liveness.
///
/// Obtained from [`Registry::commands`] or as a system parameter. Queued
/// commands run in order when the registry applies them; a system's
/// commands are applied right after it returns.
///
/// # Example
///
/// ```
/// use tessera_ecs::Registry;
///
/// struct Name(&'static str);
///
/// let mut registry = Registry::new();
/// registry.commands().spawn().with(Name("crate")).build();
/// assert_eq!(registry.entity_count(), 0);
///
/// registry.apply_commands();
/// assert_eq!(registry.entity_count(), 1);
/// ```
pub struct Commands<'r> {
    buffer: &'r CommandBuffer,
    registry: &'r Registry,
}

impl<'r> Commands<'r> {
    pub(crate) fn new(buffer: &'r CommandBuffer, registry: &'r Registry) -> Self {
        Self { buffer, registry }
    }

    /// Queues a raw command closure.
    pub fn push(&self, command: impl FnOnce(&mut Registry) + Send + 'static) {
        self.buffer.push(command);
    }

    /// Begins building a command that creates an entity with components.
    pub fn spawn(&self) -> SpawnBuilder<'r> {
        SpawnBuilder {
            buffer: self.buffer,
            inserts: Vec::new(),
        }
    }

    /// Queues the destruction of `entity`.
    pub fn destroy(&self, entity: Entity) {
        self.push(move |registry| {
            registry.destroy(entity);
        });
    }

    /// Queues attaching `component` to `entity`. Ignored if the entity is
    /// dead by the time the command runs.
    pub fn insert<T: Component>(&self, entity: Entity, component: T) {
        self.push(move |registry| {
            if let Err(err) = registry.add_component(entity, component) {
                log::debug!("Dropping deferred insert: {err}");
            }
        });
    }

    /// Queues detaching the `T` of `entity`.
    pub fn remove<T: Component>(&self, entity: Entity) {
        self.push(move |registry| {
            registry.remove_component::<T>(entity);
        });
    }

    /// Queues inserting or replacing a resource.
    pub fn emplace_resource<T: Send + Sync + 'static>(&self, value: T) {
        self.push(move |registry| {
            registry.emplace_resource(value);
        });
    }

    /// Queues removing a resource.
    pub fn remove_resource<T: Send + Sync + 'static>(&self) {
        self.push(|registry| {
            registry.remove_resource::<T>();
        });
    }

    /// Queues appending to a resource array.
    pub fn emplace_resource_array<T: Send + Sync + 'static>(&self, value: T) {
        self.push(move |registry| {
            registry.emplace_resource_array(value);
        });
    }

    /// Sends an event right away; events need no deferral.
    pub fn emit_event<T: EventData>(&self, value: T, priority: EventPriority) {
        self.registry.emit_event(value, priority);
    }

    pub fn emit_event_immediate<T: EventData>(&self, value: T, priority: EventPriority) {
        self.registry.emit_event_immediate(value, priority);
    }

    /// Returns whether `entity` is alive right now, ignoring queued
    /// commands.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.registry.is_alive(entity)
    }

    /// Number of alive entities, ignoring queued commands.
    pub fn entity_count(&self) -> usize {
        self.registry.entity_count()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Builder for spawning an entity with multiple components.
///
/// Created by [`Commands::spawn`]. The entity is created and every component
/// attached in a single command when [`build`](SpawnBuilder::build) is
/// called.
pub struct SpawnBuilder<'a> {
    buffer: &'a CommandBuffer,
    inserts: Vec<InsertFn>,
}

impl SpawnBuilder<'_> {
    /// Adds a component to the entity being built.
    pub fn with<T: Component>(mut self, component: T) -> Self {
        self.inserts.push(Box::new(move |registry, entity| {
            // The entity was created by the same command, so it is alive.
            let _ = registry.add_component(entity, component);
        }));
        self
    }

    /// Finalizes the builder, queuing the spawn command.
    pub fn build(self) {
        let inserts = self.inserts;
        self.buffer.push(move |registry| {
            let entity = registry.create();
            for insert in inserts {
                insert(registry, entity);
            }
        });
    }
}
