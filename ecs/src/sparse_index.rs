use crate::entity::Entity;

/// Number of slots per sparse page. Must be a power of two.
pub const PAGE_SIZE: usize = 4096;

const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();
const PAGE_MASK: usize = PAGE_SIZE - 1;

const _: () = assert!(PAGE_SIZE.is_power_of_two());

/// Sparse entry: where an entity lives in the packed array, and which
/// generation of the slot that is.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Slot {
    position: u32,
    version: u32,
}

impl Slot {
    const VACANT: Slot = Slot {
        position: u32::MAX,
        version: u32::MAX,
    };

    fn is_vacant(&self) -> bool {
        self.position == u32::MAX
    }
}

/// Paged sparse set mapping entities to dense, gap-free positions.
///
/// The sparse side is split into pages of [`PAGE_SIZE`] slots, allocated on
/// first use, so a handful of entities with very large slot indices does not
/// cost memory proportional to the largest index. The packed side is a
/// contiguous `Vec<Entity>` with no holes.
///
/// ## Invariants
///
/// - `packed[sparse[e].position] == e` for every contained `e`.
/// - `packed` holds exactly the contained entities.
///
/// Removal swaps the tail entity into the vacated position, so packed order
/// is **not** stable across removals.
pub struct SparseIndex {
    pages: Vec<Option<Box<[Slot]>>>,
    packed: Vec<Entity>,
}

#[inline]
fn page_of(index: u32) -> (usize, usize) {
    let index = index as usize;
    (index >> PAGE_SHIFT, index & PAGE_MASK)
}

impl SparseIndex {
    /// Creates a new empty index. No pages are allocated.
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            packed: Vec::new(),
        }
    }

    fn slot(&self, index: u32) -> Option<&Slot> {
        let (page, offset) = page_of(index);
        self.pages.get(page)?.as_ref().map(|p| &p[offset])
    }

    fn slot_mut(&mut self, index: u32) -> Option<&mut Slot> {
        let (page, offset) = page_of(index);
        self.pages.get_mut(page)?.as_mut().map(|p| &mut p[offset])
    }

    fn slot_or_alloc(&mut self, index: u32) -> &mut Slot {
        let (page, offset) = page_of(index);
        if page >= self.pages.len() {
            self.pages.resize_with(page + 1, || None);
        }
        let page = self.pages[page]
            .get_or_insert_with(|| vec![Slot::VACANT; PAGE_SIZE].into_boxed_slice());
        &mut page[offset]
    }

    /// Inserts `entity`, returning its packed position.
    ///
    /// Returns the existing position if the entity is already present.
    pub fn insert(&mut self, entity: Entity) -> usize {
        self.insert_full(entity).0
    }

    /// Like [`insert`](Self::insert), also reporting whether a new packed
    /// slot was appended (`true`) or an existing one reused (`false`).
    ///
    /// A slot still held by an older generation of the same index is taken
    /// over in place; the stale handle stops being contained.
    ///
    /// # Panics
    ///
    /// Panics when inserting [`Entity::NULL`].
    pub(crate) fn insert_full(&mut self, entity: Entity) -> (usize, bool) {
        assert!(!entity.is_null(), "cannot insert the null entity");

        let next_position = self.packed.len();
        let slot = self.slot_or_alloc(entity.index());
        if !slot.is_vacant() {
            let position = slot.position as usize;
            slot.version = entity.version();
            self.packed[position] = entity;
            return (position, false);
        }

        *slot = Slot {
            position: next_position as u32,
            version: entity.version(),
        };
        self.packed.push(entity);
        (next_position, true)
    }

    /// Returns whether `entity` (slot and version) is present.
    pub fn contains(&self, entity: Entity) -> bool {
        self.slot(entity.index())
            .is_some_and(|s| !s.is_vacant() && s.version == entity.version())
    }

    /// Removes `entity`, returning the packed position it vacated.
    ///
    /// The former tail entity (if any) now lives at that position.
    /// Returns `None` when the entity was not present.
    pub fn remove(&mut self, entity: Entity) -> Option<usize> {
        let position = self.try_packed_index(entity)?;

        self.packed.swap_remove(position);
        if let Some(&moved) = self.packed.get(position) {
            if let Some(slot) = self.slot_mut(moved.index()) {
                slot.position = position as u32;
            }
        }
        if let Some(slot) = self.slot_mut(entity.index()) {
            *slot = Slot::VACANT;
        }
        Some(position)
    }

    /// Returns the packed position of a contained entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not contained.
    pub fn packed_index(&self, entity: Entity) -> usize {
        self.try_packed_index(entity)
            .unwrap_or_else(|| panic!("invalid entity {entity}: not present in sparse index"))
    }

    /// Returns the packed position of `entity`, or `None` if absent.
    pub fn try_packed_index(&self, entity: Entity) -> Option<usize> {
        let slot = self.slot(entity.index())?;
        (!slot.is_vacant() && slot.version == entity.version()).then_some(slot.position as usize)
    }

    /// Returns the entity occupying slot `index`, whatever its version.
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        let slot = self.slot(index)?;
        (!slot.is_vacant()).then(|| self.packed[slot.position as usize])
    }

    /// Returns the number of contained entities.
    pub fn len(&self) -> usize {
        self.packed.len()
    }

    /// Returns whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    /// The packed array, in dense order.
    pub fn entities(&self) -> &[Entity] {
        &self.packed
    }

    /// Iterates over contained entities, back to front.
    ///
    /// Order is unspecified across removals.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Entity> + ExactSizeIterator + '_ {
        self.packed.iter().rev().copied()
    }

    /// Number of sparse pages currently allocated.
    pub fn page_count(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }

    /// Removes everything and releases all pages.
    pub fn clear(&mut self) {
        self.packed.clear();
        self.pages.clear();
    }

    /// Releases pages that no longer reference any contained entity.
    pub fn shrink_to_fit(&mut self) {
        for page in &mut self.pages {
            if page.as_ref().is_some_and(|p| p.iter().all(Slot::is_vacant)) {
                *page = None;
            }
        }
        while matches!(self.pages.last(), Some(None)) {
            self.pages.pop();
        }
        self.pages.shrink_to_fit();
        self.packed.shrink_to_fit();
    }
}

impl Default for SparseIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SparseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseIndex")
            .field("len", &self.packed.len())
            .field("pages", &self.page_count())
            .finish()
    }
}
