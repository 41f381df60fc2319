//! A reference-counted shared owning handle with an optional custom deleter.
//!
//! ```
//! use shared_p::Shared;
//!
//! let mut data = Some(Box::new(5));
//! let s = Shared::make_shared(&mut data);
//! assert!(data.is_none()); // ownership transferred
//! {
//!     let copy = s.clone();
//!     assert_eq!(Shared::count(&copy), 2);
//! } // copy is gone, s keeps the object alive
//! assert_eq!(*s.get(), 5);
//! ```

pub mod shared;

pub use shared::{Deleter, Shared};
