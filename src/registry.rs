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

use std::any::Any;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::poller::{Events, PollFd};

/// Callback invoked from the polling thread with the set of events which
/// fired for a registered descriptor.
///
/// Held by value in the registry and cloned out for each dispatch; a callback
/// capturing mutable state must synchronise that state internally.
pub type IoCallback = Arc<dyn Fn(Events) + Send + Sync>;

/// Opaque reference-counted handle associated with a registration.
///
/// The poll set never inspects the handle; it keeps it alive for the duration
/// of a callback invocation so that the object serving the descriptor cannot
/// be dropped from under a running callback by a concurrent deletion.
pub type Transport = Arc<dyn Any + Send + Sync>;

/// State tracked for a single registered descriptor.
pub(crate) struct SocketInfo {
    pub fd: RawFd,
    pub interest: Events,
    pub callback: IoCallback,
    pub transport: Option<Transport>,
    /// Registration serial, unique across the lifetime of the set. A
    /// descriptor number reused after a close can thereby be told apart from
    /// the registration present in an older snapshot.
    pub token: u64,
}

/// Mapping from descriptor to its registration, plus the dirty flag read by
/// the snapshot rebuild.
///
/// The registry performs no signalling on its own; the poll set wakes the
/// poller after every mutating call.
pub(crate) struct Registry {
    sockets: HashMap<RawFd, SocketInfo>,
    changed: bool,
    next_token: u64,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            sockets: empty!(),
            changed: false,
            next_token: 0,
        }
    }

    pub fn len(&self) -> usize { self.sockets.len() }

    pub fn contains(&self, fd: RawFd) -> bool { self.sockets.contains_key(&fd) }

    pub fn get(&self, fd: RawFd) -> Option<&SocketInfo> { self.sockets.get(&fd) }

    /// Inserts a new registration with an empty interest mask. Fails when the
    /// descriptor is already present, leaving the original entry untouched.
    pub fn insert(
        &mut self,
        fd: RawFd,
        callback: IoCallback,
        transport: Option<Transport>,
    ) -> bool {
        if self.sockets.contains_key(&fd) {
            return false;
        }
        let token = self.next_token;
        self.next_token += 1;
        self.sockets.insert(fd, SocketInfo {
            fd,
            interest: Events::NONE,
            callback,
            transport,
            token,
        });
        self.changed = true;
        true
    }

    pub fn remove(&mut self, fd: RawFd) -> bool {
        if self.sockets.remove(&fd).is_none() {
            return false;
        }
        self.changed = true;
        true
    }

    /// Widens the interest mask of a present registration.
    pub fn add_events(&mut self, fd: RawFd, events: Events) -> bool {
        match self.sockets.get_mut(&fd) {
            Some(info) => {
                info.interest |= events;
                // The snapshot stores the interest alongside the descriptor,
                // so a mask change requires a rebuild just as a membership
                // change does.
                self.changed = true;
                true
            }
            None => false,
        }
    }

    /// Narrows the interest mask of a present registration.
    pub fn del_events(&mut self, fd: RawFd, events: Events) -> bool {
        match self.sockets.get_mut(&fd) {
            Some(info) => {
                info.interest &= !events;
                self.changed = true;
                true
            }
            None => false,
        }
    }

    /// Copies the registration set into the flat array consumed by the
    /// readiness primitive, with all `revents` zeroed and with `tokens`
    /// index-aligned to the slots, then clears the dirty flag. No-op while
    /// the set is unchanged since the last call.
    pub fn snapshot(&mut self, fds: &mut Vec<PollFd>, tokens: &mut Vec<u64>) {
        if !self.changed {
            return;
        }

        fds.clear();
        tokens.clear();
        for info in self.sockets.values() {
            fds.push(PollFd::new(info.fd, info.interest));
            tokens.push(info.token);
        }

        self.changed = false;
    }
}
