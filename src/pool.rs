//! Fixed-capacity arena of nodes shared through reference-counted handles.
//!
//! All slots are allocated once, when the pool is created. A [`NodePtr`] is an index
//! into the arena plus a counter stored in the slot: cloning a handle increments the
//! counter, dropping it decrements. When the counter reaches zero the node is taken out
//! of its slot, its [`Recycle`] hook releases the handles the node owns, and the slot
//! returns to the free list. Releasing the root of a tree therefore frees the whole tree.
//!
//! Counters are not atomic: neither the pool nor its handles may cross threads.
use core::cell::{Cell, Ref, RefCell, RefMut};
use core::fmt;
use core::mem;
use std::rc::Rc;

/// Destruction hook of a pooled node.
pub trait Recycle {
    /// Called when the last handle to the node is dropped, before the slot is reused.
    /// Must release all the handles owned by the node.
    fn recycle(&mut self);
}

/// Arena of `capacity` nodes. Clones of the pool share the same slots.
pub struct NodePool<T: Recycle + Default> {
    inner: Rc<Inner<T>>,
}

/// Shared handle to a node in a [`NodePool`].
pub struct NodePtr<T: Recycle + Default> {
    pool: Rc<Inner<T>>,
    index: usize,
}

struct Inner<T> {
    slots: Box<[Slot<T>]>,
    free: RefCell<Vec<usize>>,
}

struct Slot<T> {
    refs: Cell<usize>,
    value: RefCell<T>,
}

impl<T: Recycle + Default> NodePool<T> {
    /// Creates a pool with a fixed number of slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                refs: Cell::new(0),
                value: RefCell::new(T::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        // lowest indices are handed out first
        let free = (0..capacity).rev().collect();
        NodePool {
            inner: Rc::new(Inner {
                slots,
                free: RefCell::new(free),
            }),
        }
    }

    /// Takes a free slot and stores the value in it.
    /// Returns `None` if all slots are taken.
    pub fn acquire(&self, value: T) -> Option<NodePtr<T>> {
        let index = self.inner.free.borrow_mut().pop()?;
        let slot = &self.inner.slots[index];
        *slot.value.borrow_mut() = value;
        slot.refs.set(1);
        Some(NodePtr {
            pool: self.inner.clone(),
            index,
        })
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Returns true if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.inner.free.borrow().len()
    }
}

impl<T: Recycle + Default> Clone for NodePool<T> {
    fn clone(&self) -> Self {
        NodePool {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Recycle + Default> fmt::Debug for NodePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePool({}/{})", self.len(), self.capacity())
    }
}

impl<T: Recycle + Default> NodePtr<T> {
    /// Immutably borrows the node.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.slot().value.borrow()
    }

    /// Mutably borrows the node.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.slot().value.borrow_mut()
    }

    /// Number of handles pointing to this node.
    pub fn ref_count(&self) -> usize {
        self.slot().refs.get()
    }

    /// Returns true if both handles point to the same node.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.pool, &b.pool) && a.index == b.index
    }

    fn slot(&self) -> &Slot<T> {
        &self.pool.slots[self.index]
    }
}

impl<T: Recycle + Default> Clone for NodePtr<T> {
    fn clone(&self) -> Self {
        let slot = self.slot();
        slot.refs.set(slot.refs.get() + 1);
        NodePtr {
            pool: self.pool.clone(),
            index: self.index,
        }
    }
}

impl<T: Recycle + Default> Drop for NodePtr<T> {
    fn drop(&mut self) {
        let slot = &self.pool.slots[self.index];
        let refs = slot.refs.get() - 1;
        slot.refs.set(refs);
        if refs == 0 {
            // Move the node out so the slot is not borrowed while children are released.
            let mut node = mem::take(&mut *slot.value.borrow_mut());
            node.recycle();
            drop(node);
            self.pool.free.borrow_mut().push(self.index);
        }
    }
}

impl<T: Recycle + Default> fmt::Debug for NodePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePtr(#{}, refs={})", self.index, self.ref_count())
    }
}
