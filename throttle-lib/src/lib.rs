//! `throttle_lib` provides the coordination layer for bounded fan-out work
//! against a shared, capacity-limited endpoint.
//!
//! The crate contains four independent primitives:
//!
//! - [`Gate`]: admission control capping concurrently running operations
//! - [`KeyedLocks`]: one exclusive critical section per key, with locks
//!   created lazily and reclaimed when unused
//! - [`Pipeline`]: a bounded queue with backpressure drained by a fixed pool
//!   of consumers
//! - [`SnapshotCache`]: a read-mostly mapping replaced wholesale
//!
//! Every suspension point takes a [`CancelSignal`]. When it fires, the
//! suspended call fails with [`ErrorKind::Canceled`] and leaves all shared
//! state consistent.
//!
//! ```
//! use throttle_lib::{CancelSignal, ErrorKind, Gate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ErrorKind> {
//!     let gate = Gate::new(8)?;
//!     let signal = CancelSignal::new();
//!     let answer = gate.run(|_signal| async { Ok::<_, ErrorKind>(42) }, &signal).await?;
//!     assert_eq!(answer, 42);
//!     Ok(())
//! }
//! ```
//!
//! For the network side, [`ClientBuilder`] builds a pooled HTTP [`Client`]
//! whose [`Client::fetch`] is a ready-made cancellable operation.
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_crate_dependencies,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]

mod cache;
mod cancel;
mod client;
mod gate;
mod keyed;
mod pipeline;
mod stats;
mod types;

pub use crate::{
    cache::{Snapshot, SnapshotCache},
    cancel::CancelSignal,
    client::{
        Client, ClientBuilder, DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_USER_AGENT, Fetched,
        INDEX_PLACEHOLDER, expand_template,
    },
    gate::{Gate, Permit},
    keyed::{KeyedGuard, KeyedLocks},
    pipeline::{ConsumerReport, Consumers, Pipeline},
    stats::{InFlight, Tally, TallySnapshot},
    types::{ErrorKind, Result},
};
