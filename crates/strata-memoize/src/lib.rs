//! Memoization primitives for strata.
//!
//! [`Handle`] runs a deterministic computation at most once at a time and shares its outcome
//! with every caller. [`Store`] deduplicates handles by content key so successive snapshots
//! reuse each other's results. Cancellation is cooperative via [`CancellationToken`].

mod cancel;
mod handle;
mod store;

pub use cancel::{cancellable, Cancelled};
pub use handle::{Handle, HandleError, Outcome};
pub use store::Store;
pub use tokio_util::sync::CancellationToken;
