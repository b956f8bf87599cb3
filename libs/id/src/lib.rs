//! # rda-id
//!
//! Typed identifiers for the rda cluster service.
//!
//! Two families of identifiers exist:
//!
//! - **Local IDs** are generated by this service and use a prefixed format,
//!   `{prefix}_{ulid}` (`cls_01HV4Z2WQXKJNM8GPQY6VBKC3D`). Generation goes
//!   through a process-wide monotonic ULID generator, so two IDs minted by the
//!   same process never collide.
//! - **External IDs** are assigned by the worker pool or the service registry
//!   (compute instances, physical nodes). They are opaque strings; we only
//!   require them to be non-empty.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

use std::sync::{Mutex, PoisonError};

use ulid::Generator;

static GENERATOR: Mutex<Generator> = Mutex::new(Generator::new());

/// Returns a ULID that is strictly greater than every ULID previously returned
/// by this function in the current process.
///
/// Falls back to a plain random ULID if the generator overflows its random
/// component within one millisecond.
#[doc(hidden)]
pub fn next_ulid() -> Ulid {
    let mut generator = GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
    generator.generate().unwrap_or_else(|_| Ulid::new())
}
