//! Fixed-capacity slot arena with a free-list, replacing the reference
//! firmware's intrusive linked lists with a contiguous index-addressed
//! allocation. Shared by [`crate::ed::EdList`] and [`crate::twr::TwrPool`].

use thiserror::Error;

/// Arena errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error("arena is at full capacity ({0} slots)")]
    Full(usize),
    #[error("invalid slot index: {0}")]
    InvalidIndex(u16),
}

/// A fixed-size contiguous slot arena addressed by 16-bit index, sized once
/// at construction. Allocation past capacity fails rather than growing.
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u16>,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let free = (0..capacity as u16).rev().collect();
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a slot for `value`, returning its index. Fails if the arena
    /// is at capacity; allocation failure is non-fatal to the caller.
    pub fn insert(&mut self, value: T) -> Result<u16, ArenaError> {
        let index = self
            .free
            .pop()
            .ok_or(ArenaError::Full(self.slots.len()))?;
        self.slots[index as usize] = Some(value);
        Ok(index)
    }

    pub fn get(&self, index: u16) -> Option<&T> {
        self.slots.get(index as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, index: u16) -> Option<&mut T> {
        self.slots.get_mut(index as usize)?.as_mut()
    }

    /// Release a slot back to the free list. Only ever called from
    /// finalise/clear-equivalent paths, never from a hot insert/lookup path.
    pub fn remove(&mut self, index: u16) -> Result<T, ArenaError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(ArenaError::InvalidIndex(index))?;
        let value = slot.take().ok_or(ArenaError::InvalidIndex(index))?;
        self.free.push(index);
        Ok(value)
    }

    /// Drop every occupied slot, returning the arena to full free capacity.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.free = (0..self.slots.len() as u16).rev().collect();
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i as u16, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u16, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (i as u16, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let mut arena: Arena<u32> = Arena::with_capacity(2);
        let a = arena.insert(10).unwrap();
        let b = arena.insert(20).unwrap();
        assert_eq!(*arena.get(a).unwrap(), 10);
        assert_eq!(*arena.get(b).unwrap(), 20);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn full_arena_rejects_insert() {
        let mut arena: Arena<u32> = Arena::with_capacity(1);
        arena.insert(1).unwrap();
        assert_eq!(arena.insert(2), Err(ArenaError::Full(1)));
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let mut arena: Arena<u32> = Arena::with_capacity(1);
        let a = arena.insert(1).unwrap();
        arena.remove(a).unwrap();
        assert!(arena.is_empty());
        let b = arena.insert(2).unwrap();
        assert_eq!(b, a);
    }

    #[test]
    fn clear_resets_to_full_capacity() {
        let mut arena: Arena<u32> = Arena::with_capacity(4);
        arena.insert(1).unwrap();
        arena.insert(2).unwrap();
        arena.clear();
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.capacity(), 4);
        for _ in 0..4 {
            arena.insert(0).unwrap();
        }
    }
}
