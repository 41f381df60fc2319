/*
 * The control block is the only thing all the sibling handles share.
 * It's allocated once per managed object, leaked from a Box and addressed
 * through NonNull, same as ArcData is. Handles never touch `object` directly
 * when it comes to ownership - the counter decides who tears it down.
 */

use std::{
    ptr::NonNull,
    sync::atomic::{
        fence, AtomicUsize,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use log::{error, trace};
use strum_macros::{Display, IntoStaticStr};

/// A custom destruction routine.
///
/// It receives the managed object and decides what to do with it:
/// drop it, recycle it, hand it back to someone else.
/// The default destruction doesn't happen once a deleter is given.
pub type Deleter<T> = Box<dyn FnOnce(Box<T>) + Send>;

/// Which way a block got torn down, for the log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
#[strum(serialize_all = "snake_case")]
pub(crate) enum Teardown {
    Deleter,
    Default,
}

pub(crate) struct ControlBlock<T> {
    /// live owners
    count: AtomicUsize,
    /// the managed object, came from Box::into_raw
    object: NonNull<T>,
    deleter: Option<Deleter<T>>,
}

impl<T> ControlBlock<T> {
    /// Makes a block with count 1 and leaks it, the caller becomes the first owner
    pub(crate) fn create(object: Box<T>, deleter: Option<Deleter<T>>) -> NonNull<Self> {
        let block = NonNull::from(Box::leak(Box::new(ControlBlock {
            count: AtomicUsize::new(1),
            // SAFETY: Box::into_raw never gives out a null
            object: unsafe { NonNull::new_unchecked(Box::into_raw(object)) },
            deleter,
        })));
        trace!("control block {block:p} created");
        block
    }

    pub(crate) fn object(&self) -> NonNull<T> {
        self.object
    }

    /// a snapshot, it could be stale the moment it's returned
    pub(crate) fn load(&self) -> usize {
        self.count.load(Relaxed)
    }

    /// Registers one more owner.
    /// Must happen before the new handle exists, so it can't be dropped uncounted.
    pub(crate) fn increment(&self) {
        // Relaxed is enough: the caller already owns a counted reference,
        // so the block can't go away underneath us
        if self.count.fetch_add(1, Relaxed) > usize::MAX / 2 {
            self.corrupted("overflow");
        }
    }

    /// Unregisters an owner, returns true if it was the last one.
    /// The caller is then the only one who may call `destroy`.
    pub(crate) fn decrement(&self) -> bool {
        // Release: every use of the object by this owner happens-before the teardown
        match self.count.fetch_sub(1, Release) {
            1 => {
                // pairs with the Release of all the other owners' decrements
                fence(Acquire);
                true
            }
            // somebody dropped an ownership twice, the object may be gone already
            0 => self.corrupted("went below zero"),
            _ => false,
        }
    }

    /// The counter can't be trusted anymore, neither can the object.
    /// Debug builds panic first, so the path is testable.
    #[cold]
    #[inline(never)]
    fn corrupted(&self, what: &str) -> ! {
        error!("control block {:p}: live count {what}", self);
        if cfg!(debug_assertions) {
            panic!("live count {what}");
        }
        std::process::abort();
    }

    /// Runs the deleter (or drops the object) and frees the block itself.
    ///
    /// # Safety
    /// `block` came from `create`, and `decrement` on it has just returned true.
    /// Nobody else holds a link to it anymore.
    pub(crate) unsafe fn destroy(block: NonNull<Self>) {
        let ControlBlock {
            object, deleter, ..
        } = *Box::from_raw(block.as_ptr());
        // SAFETY: the object came from Box::into_raw and nobody else has it
        let object = Box::from_raw(object.as_ptr());
        let teardown = match deleter {
            Some(deleter) => {
                deleter(object);
                Teardown::Deleter
            }
            None => {
                drop(object);
                Teardown::Default
            }
        };
        trace!("control block {block:p} torn down: {teardown}");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{atomic::AtomicBool, Arc};

    #[test]
    fn starts_with_one_owner() {
        let block = ControlBlock::create(Box::new(5), None);
        // SAFETY: the block is alive until destroy below
        let b = unsafe { block.as_ref() };
        assert_eq!(b.load(), 1);
        assert_eq!(unsafe { *b.object().as_ref() }, 5);
        assert!(b.decrement());
        unsafe { ControlBlock::destroy(block) };
    }

    #[test]
    fn only_the_last_decrement_reports_zero() {
        let block = ControlBlock::create(Box::new("x"), None);
        let b = unsafe { block.as_ref() };
        b.increment();
        b.increment();
        assert_eq!(b.load(), 3);
        assert!(!b.decrement());
        assert!(!b.decrement());
        assert_eq!(b.load(), 1);
        assert!(b.decrement());
        unsafe { ControlBlock::destroy(block) };
    }

    // the block is leaked in both, it's corrupted anyway
    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "live count went below zero")]
    fn decrement_past_zero_is_fatal() {
        let block = ControlBlock::create(Box::new(5), None);
        let b = unsafe { block.as_ref() };
        assert!(b.decrement());
        // an ownership released twice
        b.decrement();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "live count overflow")]
    fn increment_past_the_limit_is_fatal() {
        let block = ControlBlock::create(Box::new(5), None);
        let b = unsafe { block.as_ref() };
        b.count.store(usize::MAX / 2 + 1, Relaxed);
        b.increment();
    }

    #[test]
    fn deleter_replaces_default_destruction() {
        let dropped = Arc::new(AtomicBool::new(false));
        let called = Arc::new(AtomicBool::new(false));

        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Relaxed);
            }
        }

        let kept = Arc::new(std::sync::Mutex::new(None));
        let deleter: Deleter<Flag> = {
            let called = called.clone();
            let kept = kept.clone();
            Box::new(move |flag| {
                called.store(true, Relaxed);
                // hold on to it instead of dropping
                *kept.lock().unwrap() = Some(flag);
            })
        };
        let block = ControlBlock::create(Box::new(Flag(dropped.clone())), Some(deleter));
        assert!(unsafe { block.as_ref() }.decrement());
        unsafe { ControlBlock::destroy(block) };

        assert!(called.load(Relaxed));
        assert!(!dropped.load(Relaxed));

        // the object is ours now
        kept.lock().unwrap().take();
        assert!(dropped.load(Relaxed));
    }

    #[test]
    fn teardown_names() {
        use strum::IntoEnumIterator;

        assert_eq!(Teardown::Deleter.to_string(), "deleter");
        let name: &'static str = Teardown::Default.into();
        assert_eq!(name, "default");
        // log records tell the paths apart
        let names: Vec<&'static str> = Teardown::iter().map(Into::into).collect();
        assert_eq!(names, ["deleter", "default"]);
    }
}
