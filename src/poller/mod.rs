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

mod poll;

use std::fmt::{self, Display, Formatter};
use std::io;
use std::ops;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub use poll::Poller;

/// Set of I/O event kinds which can be watched for - or reported on - a file
/// descriptor.
///
/// The numeric encoding matches the common POSIX `poll(2)` bit values, so on
/// hosts where the readiness primitive is the actual `poll` syscall the
/// translation performed by the backend is an identity.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
pub struct Events(u16);

impl Events {
    /// No events.
    pub const NONE: Events = Events(0x0000);
    /// There is data to read.
    pub const READ: Events = Events(0x0001);
    /// There is urgent data to read.
    pub const PRIORITY: Events = Events(0x0002);
    /// Writing will not block.
    pub const WRITE: Events = Events(0x0004);
    /// Error condition on the descriptor.
    pub const ERR: Events = Events(0x0008);
    /// The peer has hung up.
    pub const HUP: Events = Events(0x0010);
    /// The descriptor is not open.
    pub const NVAL: Events = Events(0x0020);

    /// Condition bits which a callback receives irrespective of the
    /// subscribed interest: the owner of the descriptor needs them for
    /// lifecycle decisions, and the OS reports them without them being
    /// requested.
    pub const CONDITIONS: Events = Events(Self::ERR.0 | Self::HUP.0 | Self::NVAL.0);

    pub fn is_empty(self) -> bool { self == Self::NONE }

    /// Checks that all bits of `other` are set in `self`.
    pub fn contains(self, other: Events) -> bool { self.0 & other.0 == other.0 }

    /// Checks that at least one bit of `other` is set in `self`.
    pub fn intersects(self, other: Events) -> bool { self.0 & other.0 != 0 }
}

impl ops::BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events { Events(self.0 | rhs.0) }
}

impl ops::BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) { self.0 |= rhs.0 }
}

impl ops::BitAnd for Events {
    type Output = Events;

    fn bitand(self, rhs: Events) -> Events { Events(self.0 & rhs.0) }
}

impl ops::BitAndAssign for Events {
    fn bitand_assign(&mut self, rhs: Events) { self.0 &= rhs.0 }
}

impl ops::Not for Events {
    type Output = Events;

    fn not(self) -> Events { Events(!self.0) }
}

impl Display for Events {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (flag, name) in [
            (Self::READ, "read"),
            (Self::PRIORITY, "priority"),
            (Self::WRITE, "write"),
            (Self::ERR, "err"),
            (Self::HUP, "hup"),
            (Self::NVAL, "nval"),
        ] {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One slot of the flat array handed to the OS readiness primitive.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct PollFd {
    /// Descriptor to wait on.
    pub fd: RawFd,
    /// Events the poll set is interested in for this descriptor.
    pub events: Events,
    /// Events reported by the last wait.
    pub revents: Events,
}

impl PollFd {
    pub fn new(fd: RawFd, events: Events) -> Self {
        PollFd {
            fd,
            events,
            revents: Events::NONE,
        }
    }
}

/// An OS readiness primitive: blocks on a flat array of descriptor slots
/// until at least one is ready, the timeout elapses, or a signal interrupts
/// the wait.
///
/// [`crate::PollSet`] is generic over this trait so that hosts lacking
/// `poll(2)` can drive the same set over whatever level-triggered readiness
/// primitive they provide. The built-in implementation is [`Poller`].
pub trait Poll: Send {
    /// Blocks for at most `timeout` (indefinitely when `None`, returning at
    /// once when zero), filling in the `revents` field of every slot on
    /// return.
    ///
    /// Returns the number of slots with non-zero `revents`; zero means the
    /// timeout elapsed. Interruption by a signal must be reported as an error
    /// of [`io::ErrorKind::Interrupted`] kind.
    fn poll(&mut self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize>;
}
