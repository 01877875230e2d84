//! Generational arena for reference-counted runtime objects.

use std::any::{Any, TypeId};
use std::fmt;

/// Handle to a heap-allocated object.
///
/// The generation detects reuse of a freed slot; the epoch detects handles
/// that survived the interpreter session which created them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    /// Index into ObjectHeap.slots
    pub index: u32,
    /// Generation for use-after-free detection
    pub generation: u32,
    /// Session that allocated the object
    pub epoch: u64,
    /// Rust TypeId of the stored object
    pub type_id: TypeId,
}

impl ObjectHandle {
    /// Create a new object handle.
    pub fn new(index: u32, generation: u32, epoch: u64, type_id: TypeId) -> Self {
        Self {
            index,
            generation,
            epoch,
            type_id,
        }
    }
}

/// Heap storage for runtime objects with generational indices.
///
/// Objects are reference counted. When the count reaches zero the slot is
/// emptied (dropping the object) and its generation incremented, so any
/// remaining handles are detected as stale.
pub struct ObjectHeap {
    epoch: u64,
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
}

struct HeapSlot {
    generation: u32,
    value: Option<Box<dyn Any + Send + Sync>>,
    ref_count: u32,
}

impl ObjectHeap {
    /// Create a new empty object heap for session `epoch`.
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Session this heap belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Allocate a new object with a reference count of one.
    pub fn allocate<T: Any + Send + Sync>(&mut self, value: T) -> ObjectHandle {
        let type_id = TypeId::of::<T>();
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);

        if let Some(index) = self.free_list.pop()
            && let Some(slot) = self.slots.get_mut(index as usize)
        {
            slot.value = Some(boxed);
            slot.ref_count = 1;
            return ObjectHandle::new(index, slot.generation, self.epoch, type_id);
        }

        let index = self.slots.len() as u32;
        self.slots.push(HeapSlot {
            generation: 0,
            value: Some(boxed),
            ref_count: 1,
        });
        ObjectHandle::new(index, 0, self.epoch, type_id)
    }

    fn slot(&self, handle: ObjectHandle) -> Option<&HeapSlot> {
        if handle.epoch != self.epoch {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    fn slot_mut(&mut self, handle: ObjectHandle) -> Option<&mut HeapSlot> {
        if handle.epoch != self.epoch {
            return None;
        }
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    /// True if the handle refers to a live object of this session.
    pub fn is_live(&self, handle: ObjectHandle) -> bool {
        self.slot(handle).is_some()
    }

    /// Get immutable reference to an object.
    ///
    /// Returns None if the handle is stale or the type doesn't match.
    pub fn get<T: Any>(&self, handle: ObjectHandle) -> Option<&T> {
        self.slot(handle)?.value.as_ref()?.downcast_ref::<T>()
    }

    /// Get mutable reference to an object.
    ///
    /// Returns None if the handle is stale or the type doesn't match.
    pub fn get_mut<T: Any>(&mut self, handle: ObjectHandle) -> Option<&mut T> {
        self.slot_mut(handle)?.value.as_mut()?.downcast_mut::<T>()
    }

    /// Increment reference count.
    pub fn add_ref(&mut self, handle: ObjectHandle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.ref_count = slot.ref_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Decrement reference count, free if zero.
    ///
    /// Returns true if the object was freed.
    pub fn release(&mut self, handle: ObjectHandle) -> bool {
        let Some(slot) = self.slot_mut(handle) else {
            return false;
        };
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count > 0 {
            return false;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        // Dropped after the slot is recycled so destructors see a consistent heap.
        drop(value);
        true
    }

    /// Get the reference count for an object.
    pub fn ref_count(&self, handle: ObjectHandle) -> Option<u32> {
        self.slot(handle).map(|slot| slot.ref_count)
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    /// Number of live objects of type `T`.
    pub fn count_of<T: Any>(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.value.as_ref())
            .filter(|value| value.is::<T>())
            .count()
    }

    /// Free every live object regardless of its reference count.
    ///
    /// Returns the number of objects freed.
    pub fn clear(&mut self) -> usize {
        let mut freed = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                slot.ref_count = 0;
                self.free_list.push(index as u32);
                freed.push(value);
            }
        }
        let count = freed.len();
        // Last allocated first, mirroring the layer release order of a record.
        while let Some(value) = freed.pop() {
            drop(value);
        }
        count
    }
}

impl fmt::Debug for ObjectHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeap")
            .field("epoch", &self.epoch)
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}

impl Drop for ObjectHeap {
    fn drop(&mut self) {
        self.clear();
    }
}
