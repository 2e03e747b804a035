//! Thread-safe poll set multiplexing many file descriptors over a single
//! blocking readiness wait.
//!
//! The set ([`PollSet`]) aggregates descriptors registered from any thread,
//! tracks a per-descriptor interest mask and callback, and drives one
//! blocking [`PollSet::update`] call at a time which dispatches readiness
//! notifications to the callbacks. Mutations performed while the poller is
//! blocked wake it through an internal self-pipe, so they take effect
//! without racing the blocked wait.
//!
//! The built-in readiness backend uses `poll(2)`; hosts offering a different
//! level-triggered primitive can plug it through the [`poller::Poll`] trait.
//! Readiness is level-triggered, and the set never reads from or writes to
//! the descriptors it watches (the wakeup pipe aside): it only reports.

#[macro_use]
extern crate amplify;

pub mod poller;
mod pollset;
mod registry;
mod waker;

pub use poller::Events;
pub use pollset::{Error, PollSet};
pub use registry::{IoCallback, Transport};
