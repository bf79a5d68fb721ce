use crate::sparse_index::SparseIndex;

/// A 64-bit generational entity identifier.
///
/// Layout: `u32 index` (low half) + `u32 version` (high half).
///
/// - **index**: slot in the entity allocator
/// - **version**: generation of the slot when this handle was minted. When a
///   slot is recycled its generation is bumped, so older handles never match
///   the live entity again.
///
/// [`Entity::NULL`] is a reserved sentinel with every bit set.
///
/// # Example
///
/// ```
/// use tessera_ecs::{Entity, Registry};
///
/// let mut registry = Registry::new();
/// let e = registry.create();
/// assert_eq!(e.index(), 0);
/// assert_eq!(e.version(), 0);
/// assert_ne!(e, Entity::NULL);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    version: u32,
}

impl Entity {
    /// The null entity. Never alive, never contained in any store.
    pub const NULL: Entity = Entity {
        index: u32::MAX,
        version: u32::MAX,
    };

    /// Creates an entity handle from its parts.
    pub const fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }

    /// Returns the slot index of this entity.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Returns the generation of this entity.
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Returns `true` for [`Entity::NULL`].
    pub const fn is_null(&self) -> bool {
        self.index == u32::MAX && self.version == u32::MAX
    }

    /// Packs the handle into its 64-bit representation.
    pub const fn to_bits(self) -> u64 {
        ((self.version as u64) << 32) | self.index as u64
    }

    /// Rebuilds a handle from [`to_bits`](Self::to_bits) output.
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            version: (bits >> 32) as u32,
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.index, self.version)
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Mints and recycles entity handles.
///
/// The live set is itself a [`SparseIndex`], so queries can use it as an
/// iteration driver like any other store. On top of it the allocator keeps
/// the `next_id` counter for fresh slots, a generation per slot and a LIFO
/// free list of recyclable slots.
///
/// Destroying an entity bumps its slot generation. A slot whose generation
/// would reach `u32::MAX` (the null sentinel's version) is retired and never
/// handed out again.
pub(crate) struct EntityAllocator {
    alive: SparseIndex,
    /// Generation the next handle minted for each slot will carry.
    generations: Vec<u32>,
    /// Recyclable slots (LIFO stack).
    free_list: Vec<u32>,
    /// Next never-used slot index.
    next_id: u32,
    /// Slots retired after exhausting their generations.
    retired: u32,
}

impl EntityAllocator {
    /// Creates a new empty allocator.
    pub fn new() -> Self {
        Self {
            alive: SparseIndex::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            next_id: 0,
            retired: 0,
        }
    }

    /// Allocates a new entity, reusing a recycled slot if available.
    ///
    /// # Panics
    ///
    /// Panics if the 32-bit slot space is exhausted.
    pub fn allocate(&mut self) -> Entity {
        let entity = if let Some(index) = self.free_list.pop() {
            Entity::new(index, self.generations[index as usize])
        } else {
            assert!(
                self.next_id < u32::MAX,
                "entity slot space exhausted ({} slots)",
                u32::MAX
            );
            let index = self.next_id;
            self.next_id += 1;
            self.generations.push(0);
            Entity::new(index, 0)
        };
        self.alive.insert(entity);
        entity
    }

    /// Allocates `count` entities at once, reusing recycled slots first.
    pub fn allocate_many(&mut self, count: u32) -> Vec<Entity> {
        let mut entities = Vec::with_capacity(count as usize);
        self.generations
            .reserve((count as usize).saturating_sub(self.free_list.len()));
        for _ in 0..count {
            entities.push(self.allocate());
        }
        entities
    }

    /// Deallocates an entity. Returns false if it is already dead, stale or null.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if self.alive.remove(entity).is_none() {
            return false;
        }

        let idx = entity.index() as usize;
        let next = entity.version().wrapping_add(1);
        self.generations[idx] = next;
        if next == u32::MAX {
            self.retired += 1;
            log::debug!("Retiring entity slot {idx}: generations exhausted");
        } else {
            self.free_list.push(entity.index());
        }
        true
    }

    /// Returns whether the entity is currently alive.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(entity)
    }

    /// Returns the number of alive entities.
    pub fn count(&self) -> usize {
        self.alive.len()
    }

    /// The live-entity set.
    pub fn alive(&self) -> &SparseIndex {
        &self.alive
    }

    /// Iterates over all currently alive entities.
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive.iter()
    }

    /// Number of slots waiting on the free list.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Number of slots retired after generation exhaustion.
    pub fn retired_count(&self) -> u32 {
        self.retired
    }

    /// Destroys every live entity. Generations are kept, so handles minted
    /// before the call stay stale afterwards.
    pub fn clear(&mut self) {
        let live: Vec<Entity> = self.alive.entities().to_vec();
        for entity in live {
            self.deallocate(entity);
        }
        self.alive.clear();
    }

    #[cfg(test)]
    pub(crate) fn force_generation(&mut self, index: u32, version: u32) {
        self.generations[index as usize] = version;
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_sequential() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        let e1 = alloc.allocate();
        let e2 = alloc.allocate();

        assert_eq!(e0, Entity::new(0, 0));
        assert_eq!(e1, Entity::new(1, 0));
        assert_eq!(e2, Entity::new(2, 0));
    }

    #[test]
    fn deallocate_makes_dead() {
        let mut alloc = EntityAllocator::new();
        let entity = alloc.allocate();
        assert!(alloc.is_alive(entity));
        assert!(alloc.deallocate(entity));
        assert!(!alloc.is_alive(entity));
        // Deallocating again returns false
        assert!(!alloc.deallocate(entity));
    }

    #[test]
    fn recycled_slot_bumps_version() {
        let mut alloc = EntityAllocator::new();
        let e0 = alloc.allocate();
        alloc.deallocate(e0);
        let e1 = alloc.allocate();

        assert_eq!(e1.index(), 0);
        assert_eq!(e1.version(), 1);
        assert_ne!(e0, e1);
        assert!(!alloc.is_alive(e0));
        assert!(alloc.is_alive(e1));
    }

    #[test]
    fn many_reuse_cycles_never_alias() {
        let mut alloc = EntityAllocator::new();
        let mut previous = Vec::new();
        for _ in 0..100 {
            let e = alloc.allocate();
            for old in &previous {
                assert_ne!(*old, e);
                assert!(!alloc.is_alive(*old));
            }
            alloc.deallocate(e);
            previous.push(e);
        }
        assert_eq!(alloc.free_count(), 1);
    }

    #[test]
    fn exhausted_slot_is_retired() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate();
        alloc.deallocate(e);
        alloc.force_generation(0, u32::MAX - 1);

        let last = alloc.allocate();
        assert_eq!(last, Entity::new(0, u32::MAX - 1));
        alloc.deallocate(last);
        assert_eq!(alloc.retired_count(), 1);

        // Slot 0 is gone for good; a fresh slot is minted instead.
        let fresh = alloc.allocate();
        assert_eq!(fresh, Entity::new(1, 0));
    }

    #[test]
    fn count_tracks_alive() {
        let mut alloc = EntityAllocator::new();
        assert_eq!(alloc.count(), 0);

        let e0 = alloc.allocate();
        let _e1 = alloc.allocate();
        assert_eq!(alloc.count(), 2);

        alloc.deallocate(e0);
        assert_eq!(alloc.count(), 1);
    }

    #[test]
    fn allocate_many_reuses_free_list() {
        let mut alloc = EntityAllocator::new();
        let originals: Vec<_> = (0..5).map(|_| alloc.allocate()).collect();

        alloc.deallocate(originals[1]);
        alloc.deallocate(originals[3]);

        let batch = alloc.allocate_many(4);
        assert_eq!(batch.len(), 4);
        assert_eq!(alloc.count(), 7);

        // LIFO reuse first, then fresh slots
        assert_eq!(batch[0], Entity::new(3, 1));
        assert_eq!(batch[1], Entity::new(1, 1));
        assert_eq!(batch[2], Entity::new(5, 0));
        assert_eq!(batch[3], Entity::new(6, 0));
    }

    #[test]
    fn clear_keeps_old_handles_stale() {
        let mut alloc = EntityAllocator::new();
        let old: Vec<_> = (0..3).map(|_| alloc.allocate()).collect();
        alloc.clear();
        assert_eq!(alloc.count(), 0);

        let fresh: Vec<_> = (0..3).map(|_| alloc.allocate()).collect();
        for f in &fresh {
            assert!(f.index() < 3);
            assert_eq!(f.version(), 1);
        }
        for o in &old {
            assert!(!alloc.is_alive(*o));
        }
    }

    #[test]
    fn null_entity_is_never_alive() {
        let mut alloc = EntityAllocator::new();
        alloc.allocate();
        assert!(!alloc.is_alive(Entity::NULL));
        assert!(!alloc.deallocate(Entity::NULL));
    }

    #[test]
    fn bits_round_trip_and_format() {
        let e = Entity::new(42, 7);
        assert_eq!(e.to_bits(), (7u64 << 32) | 42);
        assert_eq!(Entity::from_bits(e.to_bits()), e);
        assert_eq!(Entity::NULL.to_bits(), u64::MAX);
        assert_eq!(format!("{e:?}"), "Entity(42v7)");
        assert_eq!(format!("{}", Entity::NULL), "Entity(null)");
    }
}
