//! Generation-checked slot storage for runtime records.
//!
//! Task records and confined lanes live in arenas and are addressed by
//! [`ArenaIndex`]. A slot carries a generation counter that is bumped on
//! removal, so a stale index handed out before a removal never resolves to
//! the record that later reuses the slot.

use core::fmt;
use core::hash::{Hash, Hasher};

/// An index into an [`Arena`] paired with the slot generation it was issued for.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Builds an index from raw parts (tests and benchmarks).
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot number.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation the index was issued for.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

impl Hash for ArenaIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64((u64::from(self.index) << 32) | u64::from(self.generation));
    }
}

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with stable, generation-checked indices.
#[derive(Debug)]
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true when no slot is occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The index the next insertion will use.
    #[must_use]
    pub fn vacant_index(&self) -> ArenaIndex {
        match self.free.last() {
            Some(&slot) => ArenaIndex::new(slot, self.entries[slot as usize].generation),
            None => ArenaIndex::new(u32::try_from(self.entries.len()).unwrap_or(u32::MAX), 0),
        }
    }

    /// Inserts `value` and returns its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Inserts the value built by `f`, which receives the index the value will live at.
    ///
    /// Records that embed their own id are built in one step this way.
    pub fn insert_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        let idx = if let Some(slot) = self.free.pop() {
            ArenaIndex::new(slot, self.entries[slot as usize].generation)
        } else {
            let slot = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
            assert!(slot < u32::MAX, "arena slot space exhausted");
            self.entries.push(Entry {
                generation: 0,
                value: None,
            });
            ArenaIndex::new(slot, 0)
        };
        self.entries[idx.index as usize].value = Some(f(idx));
        self.len += 1;
        idx
    }

    /// Removes and returns the value at `index`, if the index is still live.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let entry = self.entries.get_mut(index.index as usize)?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index.index);
        self.len -= 1;
        Some(value)
    }

    /// Shared access to the value at `index`.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        self.entries
            .get(index.index as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    /// Exclusive access to the value at `index`.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        self.entries
            .get_mut(index.index as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    /// Returns true if `index` points at an occupied slot of the same generation.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates over occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.entries.iter().enumerate().filter_map(|(slot, entry)| {
            entry.value.as_ref().map(|value| {
                #[allow(clippy::cast_possible_truncation)]
                let idx = ArenaIndex::new(slot as u32, entry.generation);
                (idx, value)
            })
        })
    }

    /// Removes every value, bumping generations so outstanding indices go stale.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            if let Some(value) = entry.value.take() {
                entry.generation = entry.generation.wrapping_add(1);
                #[allow(clippy::cast_possible_truncation)]
                self.free.push(slot as u32);
                out.push(value);
            }
        }
        self.len = 0;
        out
    }
}
