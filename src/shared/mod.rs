/*
 * Shared<T> is a thread-safe shared owner of a heap object, like Arc,
 * minus the weak pointers and plus a custom deleter.
 *
 * - control.rs: the block all the siblings link to - object, counter, deleter
 * - handle.rs: the handle itself - clone, drop, accessors
 */

mod control;

mod handle;

pub use control::Deleter;
pub use handle::Shared;

/*
 * takeaways:
 * - count goes up before the new handle exists, down when the handle drops
 * - only the 1 -> 0 decrement tears the block down, and it needs the Acquire fence
 * - a move is free, Rust doesn't leave an "empty" handle behind to drop
 * - no reseating: a handle is bound to its block for life
 */
