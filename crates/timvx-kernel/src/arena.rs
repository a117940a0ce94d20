//! Append-only storage addressed by typed handles.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Index;

use crate::KernelError;

/// A typed index into an [`Arena`].
///
/// Graph tensors and nodes are referred to by handle; a handle from one
/// graph is meaningless in another.
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Zero-based position in the owning arena.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Append-only arena.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Empty arena.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a value and return its handle.
    pub fn append(&mut self, value: T) -> Result<Handle<T>, KernelError> {
        let index = next_index(self.data.len())?;
        self.data.push(value);
        Ok(Handle::new(index))
    }

    /// Value behind `handle`, if it belongs to this arena.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Iterate `(handle, &value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }
}

fn next_index(len: usize) -> Result<u32, KernelError> {
    u32::try_from(len).map_err(|_| KernelError::ArenaFull(len))
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_index() {
        let mut arena = Arena::new();
        let a = arena.append("a").unwrap();
        let b = arena.append("b").unwrap();
        assert_eq!(arena[a], "a");
        assert_eq!(arena[b], "b");
        assert_eq!(arena.len(), 2);
        assert_eq!(b.index(), 1);
    }

    #[test]
    fn foreign_handle_is_none() {
        let arena: Arena<u8> = Arena::new();
        assert!(arena.get(Handle::new(3)).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn handle_formatting() {
        let h: Handle<u8> = Handle::new(7);
        assert_eq!(format!("{h:?}"), "[7]");
        assert_eq!(h.to_string(), "#7");
    }

    #[test]
    fn iter_in_insertion_order() {
        let mut arena = Arena::new();
        arena.append(10).unwrap();
        arena.append(20).unwrap();
        let items: Vec<_> = arena.iter().map(|(h, v)| (h.index(), *v)).collect();
        assert_eq!(items, vec![(0, 10), (1, 20)]);
    }

    #[test]
    fn index_space_is_bounded() {
        assert_eq!(next_index(5).unwrap(), 5);
        let full = u32::MAX as usize + 1;
        assert!(matches!(next_index(full), Err(KernelError::ArenaFull(n)) if n == full));
    }
}
