// Library for thread-safe I/O multiplexing over a polled descriptor set.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::poller::{Events, Poll, PollFd, Poller};
use crate::registry::{Registry, Transport};
use crate::waker::{drain, Waker};

/// Errors returned by the poll set mutation API.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum Error {
    /// file descriptor {0} is not a valid descriptor number
    InvalidFd(RawFd),

    /// file descriptor {0} is already present in the poll set
    Duplicate(RawFd),

    /// file descriptor {0} is not present in the poll set
    Unknown(RawFd),
}

/// State owned by the polling thread: the readiness backend plus the cached
/// snapshot of the registry.
struct PollTable<P: Poll> {
    poller: P,
    fds: Vec<PollFd>,
    /// Registration serial of each snapshot slot, index-aligned with `fds`.
    tokens: Vec<u64>,
}

/// Thread-safe set of file descriptors multiplexed over a single blocking
/// readiness wait.
///
/// Descriptors are registered with [`PollSet::add`] together with a callback
/// and subscribed to events with [`PollSet::add_events`]; one thread drives
/// [`PollSet::update`], which blocks in the OS readiness primitive and
/// dispatches fired events to the callbacks. Any thread may mutate the set at
/// any time: every mutation pokes an internal self-pipe, kicking a currently
/// blocked `update` out of its wait so that it re-examines the set.
///
/// The set is driven through a shared reference; wrap it into an [`Arc`] to
/// use it from several threads. Dropping the set closes both ends of the
/// wakeup pipe and discards all registrations.
pub struct PollSet<P: Poll = Poller> {
    registry: Mutex<Registry>,
    table: Mutex<PollTable<P>>,
    waker: Waker,
}

impl PollSet<Poller> {
    /// Creates a poll set driven by the built-in `poll(2)` backend.
    ///
    /// Opens the wakeup pipe and registers its read end. Failure to create
    /// the pipe aborts the process: the set cannot operate without a way to
    /// interrupt a blocked [`PollSet::update`].
    pub fn new() -> Self { Self::with_poller(Poller::new()) }
}

impl Default for PollSet<Poller> {
    fn default() -> Self { PollSet::new() }
}

impl<P: Poll> PollSet<P> {
    /// As [`PollSet::new`], over a custom readiness backend.
    pub fn with_poller(poller: P) -> Self {
        let (waker, reader) = match Waker::new() {
            Ok(pair) => pair,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(target: "pollset", "Wakeup pipe creation failed: {err}");
                std::process::abort();
            }
        };

        let mut registry = Registry::new();
        let fd = reader.as_raw_fd();
        let registered = registry.insert(
            fd,
            Arc::new(move |events| {
                if events.contains(Events::READ) {
                    drain(&reader);
                }
            }),
            None,
        );
        debug_assert!(registered, "fresh registry cannot hold the wakeup fd");
        registry.add_events(fd, Events::READ);

        PollSet {
            registry: Mutex::new(registry),
            table: Mutex::new(PollTable {
                poller,
                fds: empty!(),
                tokens: empty!(),
            }),
            waker,
        }
    }

    /// Registers a descriptor with an empty interest mask; events of
    /// interest are subscribed separately with [`PollSet::add_events`].
    ///
    /// The callback runs on the thread driving [`PollSet::update`] and
    /// receives the set of fired events. `transport` is an opaque handle the
    /// set keeps alive for the duration of each callback invocation, even if
    /// the registration is deleted concurrently.
    pub fn add(
        &self,
        fd: RawFd,
        callback: impl Fn(Events) + Send + Sync + 'static,
        transport: Option<Transport>,
    ) -> Result<(), Error> {
        if fd < 0 {
            #[cfg(feature = "log")]
            log::debug!(target: "pollset", "Tried to add invalid fd {fd}");
            return Err(Error::InvalidFd(fd));
        }

        {
            let mut registry = self.registry();
            if !registry.insert(fd, Arc::new(callback), transport) {
                #[cfg(feature = "log")]
                log::debug!(target: "pollset", "Tried to add duplicate fd {fd}");
                return Err(Error::Duplicate(fd));
            }
        }
        self.waker.wake();

        Ok(())
    }

    /// Drops the registration of `fd`. A dispatch already snapshotted for
    /// the descriptor is suppressed (see [`PollSet::update`]).
    pub fn del(&self, fd: RawFd) -> Result<(), Error> {
        if fd < 0 {
            return Err(Error::Unknown(fd));
        }

        {
            let mut registry = self.registry();
            if !registry.remove(fd) {
                #[cfg(feature = "log")]
                log::debug!(target: "pollset", "Tried to delete fd {fd} which is not being tracked");
                return Err(Error::Unknown(fd));
            }
        }
        self.waker.wake();

        Ok(())
    }

    /// Subscribes `fd` to `events` in addition to its current interest.
    pub fn add_events(&self, fd: RawFd, events: Events) -> Result<(), Error> {
        {
            let mut registry = self.registry();
            if !registry.add_events(fd, events) {
                #[cfg(feature = "log")]
                log::debug!(target: "pollset", "Tried to add events {events} to fd {fd} which is not being tracked");
                return Err(Error::Unknown(fd));
            }
        }
        self.waker.wake();

        Ok(())
    }

    /// Removes `events` from the interest mask of `fd`.
    pub fn del_events(&self, fd: RawFd, events: Events) -> Result<(), Error> {
        {
            let mut registry = self.registry();
            if !registry.del_events(fd, events) {
                #[cfg(feature = "log")]
                log::debug!(target: "pollset", "Tried to delete events {events} from fd {fd} which is not being tracked");
                return Err(Error::Unknown(fd));
            }
        }
        self.waker.wake();

        Ok(())
    }

    /// Number of registered descriptors. The wakeup pipe's read end counts,
    /// so a freshly created set reports one.
    pub fn len(&self) -> usize { self.registry().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Whether `fd` is registered in the set.
    pub fn contains(&self, fd: RawFd) -> bool { self.registry().contains(fd) }

    /// Advisory wake: makes a currently blocked [`PollSet::update`] call
    /// return early. Never blocks; write failures are ignored.
    pub fn signal(&self) { self.waker.wake() }

    /// Blocks for at most `timeout` (indefinitely when `None`) waiting for
    /// readiness on the registered descriptors, then invokes the callback of
    /// every descriptor with fired events and returns.
    ///
    /// Callbacks run with no internal lock held and may re-enter any
    /// mutation method or [`PollSet::signal`]; they must not call `update`
    /// itself. The dispatched mask is `revents & (interest | CONDITIONS)`:
    /// [`Events::ERR`], [`Events::HUP`] and [`Events::NVAL`] are forwarded
    /// even when not subscribed.
    ///
    /// Must be called from at most one thread at a time; this is the
    /// caller's contract and is not enforced. Interruption of the wait by a
    /// signal returns silently; any other readiness-primitive error is
    /// logged and returned from, so that the caller decides whether to poll
    /// again.
    pub fn update(&self, timeout: Option<Duration>) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let PollTable { poller, fds, tokens } = &mut *table;

        self.registry().snapshot(fds, tokens);

        let count = match poller.poll(fds, timeout) {
            // Interruption by a signal is not an error; the caller just
            // polls again.
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return,
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(target: "pollset", "Poll failed with error: {err}");
                return;
            }
            Ok(count) => count,
        };
        if count == 0 {
            #[cfg(feature = "log")]
            log::trace!(target: "pollset", "Poll timed out with no events");
            return;
        }

        for index in 0..fds.len() {
            let revents = fds[index].revents;
            if revents.is_empty() {
                continue;
            }
            fds[index].revents = Events::NONE;

            let fd = fds[index].fd;
            let (callback, transport, interest) = {
                let registry = self.registry();
                match registry.get(fd) {
                    // Skips slots whose registration was deleted - or whose
                    // descriptor number was reused by a newer registration -
                    // between the snapshot and now.
                    Some(info) if info.token == tokens[index] => {
                        (info.callback.clone(), info.transport.clone(), info.interest)
                    }
                    _ => continue,
                }
            };

            let fired = revents & (interest | Events::CONDITIONS);
            if !fired.is_empty() {
                // The clones above pin the callback and the transport handle
                // for the duration of the invocation.
                callback(fired);
            }
            drop(transport);
        }
    }

    /// Critical sections never leave the registry in a torn state, so a lock
    /// poisoned by a panicking callback is recovered rather than propagated.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
