use std::{
    borrow::Borrow,
    fmt,
    hash::{Hash, Hasher},
    ptr::NonNull,
    sync::atomic::{fence, Ordering::Acquire},
};

use super::control::{ControlBlock, Deleter};

/// A shared owning handle.
///
/// Every `Shared` links to one control block. Cloning makes a sibling that
/// links to the same block, dropping the last sibling destroys the object
/// (with the custom deleter, if there's one).
///
/// `Shared` has no method of its own that points a handle at another block.
/// Plain Rust assignment still works on a `mut` binding: `=`, `clone_from`
/// and `mem::swap` release the old block and count the new one like a drop
/// and a clone would.
pub struct Shared<T> {
    block: NonNull<ControlBlock<T>>,
}

/*
 * Same story as with Arc: sending a Shared shares T => T: Sync,
 * dropping the last Shared destroys T on whatever thread that happens => T: Send.
 * The deleter is Send by its type and is only ever run by the last owner.
 */
unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Takes over an already allocated object
    pub fn from_box(object: Box<T>) -> Self {
        Self {
            block: ControlBlock::create(object, None),
        }
    }

    /// Takes over an object, `deleter` runs instead of dropping it
    pub fn from_box_with<D>(object: Box<T>, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + Send + 'static,
    {
        Self {
            block: ControlBlock::create(object, Some(Box::new(deleter) as Deleter<T>)),
        }
    }

    /// Moves the object out of `slot` and under shared management.
    ///
    /// `slot` is `None` afterwards, it's the caller's sign that the ownership is gone.
    ///
    /// # Panics
    /// Don't call it with an empty slot, there's nothing to own.
    pub fn make_shared(slot: &mut Option<Box<T>>) -> Self {
        Self::from_box(Self::take_slot(slot))
    }

    /// [`Shared::make_shared`] with a custom deleter
    pub fn make_shared_with<D>(slot: &mut Option<Box<T>>, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + Send + 'static,
    {
        Self::from_box_with(Self::take_slot(slot), deleter)
    }

    fn take_slot(slot: &mut Option<Box<T>>) -> Box<T> {
        match slot.take() {
            Some(object) => object,
            None => panic!("make_shared called with an empty slot"),
        }
    }

    /// Takes over a raw pointer and nulls it.
    ///
    /// # Safety
    /// `*ptr` must come from [`Box::into_raw`] and must not be null,
    /// nothing else may free or use it as an owner afterwards.
    /// A null is only caught in debug builds.
    pub unsafe fn from_raw(ptr: &mut *mut T) -> Self {
        Self::from_box(Self::take_raw(ptr))
    }

    /// [`Shared::from_raw`] with a custom deleter
    ///
    /// # Safety
    /// Same as for [`Shared::from_raw`].
    pub unsafe fn from_raw_with<D>(ptr: &mut *mut T, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + Send + 'static,
    {
        Self::from_box_with(Self::take_raw(ptr), deleter)
    }

    unsafe fn take_raw(ptr: &mut *mut T) -> Box<T> {
        debug_assert!(!ptr.is_null(), "from_raw called with a null pointer");
        let raw = std::mem::replace(ptr, std::ptr::null_mut());
        Box::from_raw(raw)
    }

    fn block(&self) -> &ControlBlock<T> {
        // SAFETY: the block outlives every handle linked to it, and we're one
        unsafe { self.block.as_ref() }
    }

    /// The managed object, it stays under shared management
    pub fn get(&self) -> &T {
        // SAFETY: the object lives as long as its block, shared access only
        unsafe { self.block().object().as_ref() }
    }

    /// How many handles link to the block.
    ///
    /// Purely advisory once other threads hold siblings.
    pub fn count(this: &Self) -> usize {
        this.block().load()
    }

    /// Mutable access, only if `this` is the one and only owner
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        // &mut Self means no clone from `this` can happen meanwhile,
        // and siblings on other threads can only go down
        if Self::count(this) == 1 {
            // syncs with the Release decrements of the dropped siblings
            fence(Acquire);
            // SAFETY: the only owner, and it's borrowed mutably
            Some(unsafe { this.block().object().as_mut() })
        } else {
            None
        }
    }

    /// true if both are siblings
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    pub fn as_ptr(this: &Self) -> *const T {
        this.block().object().as_ptr()
    }
}

impl<T> Clone for Shared<T> {
    /// Count first, then link - the new owner can't be dropped uncounted
    fn clone(&self) -> Self {
        self.block().increment();
        Self { block: self.block }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if self.block().decrement() {
            // SAFETY: ours was the last link, see ControlBlock::decrement
            unsafe { ControlBlock::destroy(self.block) }
        }
    }
}

impl<T> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        self.get()
    }
}

impl<T> Borrow<T> for Shared<T> {
    fn borrow(&self) -> &T {
        self.get()
    }
}

impl<T> From<Box<T>> for Shared<T> {
    fn from(object: Box<T>) -> Self {
        Self::from_box(object)
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("object", self.get())
            .field("count", &Self::count(self))
            .finish()
    }
}

impl<T: fmt::Display> fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}

// comparisons look at the objects, not at the blocks, see ptr_eq for that
impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl<T: Eq> Eq for Shared<T> {}

impl<T: PartialOrd> PartialOrd for Shared<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.get().partial_cmp(other.get())
    }
}

impl<T: Ord> Ord for Shared<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.get().cmp(other.get())
    }
}

impl<T: Hash> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get().hash(state)
    }
}
