//! A registry of shared instances keyed by opaque, generation-checked
//! handles.
//!
//! This is what a bridge layer hands out instead of raw addresses: a
//! [`Handle`] packs a slot index and the slot's generation, and a handle
//! whose instance was removed never resolves again, even after the slot is
//! reused.

use core::fmt;
use core::marker::PhantomData;

use std::sync::Arc;

use crate::sys::*;


/// An opaque handle into a [`Registry`]
pub struct Handle<T> {
    index: u32,
    gen: u32,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Pack the handle into a single integer, for handing across an FFI
    /// boundary
    pub fn to_raw(self) -> u64 {
        (u64::from(self.gen) << 32) | u64::from(self.index)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            gen: (raw >> 32) as u32,
            _phantom: PhantomData,
        }
    }
}

// manual impls, we don't want to require T: Copy/Eq/etc
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.gen == other.gen
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // these really need to be in hex to be readable
        write!(f, "Handle(0x{:x})", self.to_raw())
    }
}


struct Slot<T> {
    // bumped every time the slot is vacated, starts at 1 so a zeroed
    // raw handle is never valid
    gen: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

/// Registry of shared instances
pub struct Registry<T> {
    inner: Mutex<Slots<T>>,
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                len: 0,
            }),
        }
    }

    pub fn insert(&self, value: Arc<T>) -> Handle<T> {
        let mut inner = lock(&self.inner);
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(Slot { gen: 1, value: None });
                u32::try_from(inner.slots.len() - 1)
                    .expect("registry exceeded u32::MAX slots")
            }
        };

        let slot = &mut inner.slots[index as usize];
        debug_assert!(slot.value.is_none());
        slot.value = Some(value);
        let gen = slot.gen;
        inner.len += 1;

        Handle {
            index: index,
            gen: gen,
            _phantom: PhantomData,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<Arc<T>> {
        let inner = lock(&self.inner);
        inner.slots.get(handle.index as usize)
            .filter(|slot| slot.gen == handle.gen)
            .and_then(|slot| slot.value.clone())
    }

    /// Remove an instance, the instance itself lives on until every other
    /// Arc is dropped
    pub fn remove(&self, handle: Handle<T>) -> Option<Arc<T>> {
        let mut inner = lock(&self.inner);
        let slot = inner.slots.get_mut(handle.index as usize)
            .filter(|slot| slot.gen == handle.gen)?;
        let value = slot.value.take()?;

        // skip 0 on wraparound
        slot.gen = slot.gen.wrapping_add(1).max(1);
        inner.free.push(handle.index);
        inner.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
