//! Blocks of memory obtained from the system allocator.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    slice,
};

use crate::chunk::{align_up, ALIGNMENT};

/// A zero initialized, [`ALIGNMENT`] aligned block of memory.
pub(crate) struct Block {
    ptr: NonNull<u8>,
    capacity: usize,
}

impl Block {
    fn layout(capacity: usize) -> Option<Layout> {
        Layout::from_size_align(capacity, ALIGNMENT).ok()
    }

    /// The capacity a block needs for a payload of the given size.
    pub fn capacity_for(size: usize) -> usize {
        align_up(size.max(1))
    }

    fn fits(size: usize) -> bool {
        size <= isize::MAX as usize - ALIGNMENT
    }

    /// Allocate a block of at least `size` bytes.
    /// Returns `None` if the system is out of memory.
    pub fn new(size: usize) -> Option<Block> {
        if !Self::fits(size) {
            return None;
        }
        let capacity = Self::capacity_for(size);
        let layout = Self::layout(capacity)?;
        // Safety: layout is never zero sized.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).map(|ptr| Block { ptr, capacity })
    }

    /// Resize the block in place or move it, keeping its contents.
    /// Returns `false` and leaves the block untouched if the system is out of memory.
    pub fn realloc(&mut self, size: usize) -> bool {
        if !Self::fits(size) {
            return false;
        }
        let capacity = Self::capacity_for(size);
        if capacity == self.capacity {
            return true;
        }
        if Self::layout(capacity).is_none() {
            return false;
        }
        let Some(old_layout) = Self::layout(self.capacity) else {
            return false;
        };

        // Safety: ptr was allocated with old_layout and the new capacity is a valid, non zero size
        // for this alignment.
        let ptr = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, capacity) };
        let Some(ptr) = NonNull::new(ptr) else {
            return false;
        };

        if capacity > self.capacity {
            // Keep the whole block initialized.
            unsafe {
                ptr.as_ptr()
                    .add(self.capacity)
                    .write_bytes(0, capacity - self.capacity)
            };
        }
        self.ptr = ptr;
        self.capacity = capacity;
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safety: the whole block is allocated and initialized.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: the whole block is allocated and initialized.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(layout) = Self::layout(self.capacity) {
            // Safety: ptr was allocated with this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}
