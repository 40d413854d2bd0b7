use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Generational index into a [`Pool`]. The type parameter only tags which
/// pool the handle belongs to.
pub struct Handle<T> {
    pub slot: u32,
    pub generation: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    /// Reinterprets the handle for a different pool element type.
    pub fn cast<U>(self) -> Handle<U> {
        Handle::new(self.slot, self.generation)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.slot, self.generation)
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

/// Slot storage handing out [`Handle`]s. Released slots bump their
/// generation, so stale handles stop resolving instead of aliasing a new
/// occupant.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<u32>,
    generation: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            empty: Vec::with_capacity(initial_size),
            generation: vec![0; initial_size],
        };

        p.empty = (0..initial_size as u32).rev().collect();
        p.items.resize_with(initial_size, || None);
        p
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                self.items.push(None);
                self.generation.push(0);
                (self.items.len() - 1) as u32
            }
        };

        self.items[slot as usize] = Some(item);
        Handle::new(slot, self.generation[slot as usize])
    }

    /// Removes the occupant of `item`, returning it if the handle was live.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if self.generation.get(slot) != Some(&item.generation) {
            return None;
        }

        let value = self.items[slot].take()?;
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        self.empty.push(item.slot);
        Some(value)
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        let slot = item.slot as usize;
        if self.generation.get(slot) == Some(&item.generation) {
            self.items[slot].as_ref()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every occupant, yielding them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        for slot in 0..self.items.len() {
            if let Some(item) = self.items[slot].take() {
                self.generation[slot] = self.generation[slot].wrapping_add(1);
                self.empty.push(slot as u32);
                out.push(item);
            }
        }
        out
    }
}
