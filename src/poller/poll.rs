use std::io;
use std::time::Duration;

use crate::poller::{Events, Poll, PollFd};

const EVENT_BITS: [(Events, libc::c_short); 6] = [
    (Events::READ, libc::POLLIN),
    (Events::PRIORITY, libc::POLLPRI),
    (Events::WRITE, libc::POLLOUT),
    (Events::ERR, libc::POLLERR),
    (Events::HUP, libc::POLLHUP),
    (Events::NVAL, libc::POLLNVAL),
];

fn to_native(events: Events) -> libc::c_short {
    let mut native = 0;
    for (ours, bit) in EVENT_BITS {
        if events.contains(ours) {
            native |= bit;
        }
    }
    native
}

fn from_native(revents: libc::c_short) -> Events {
    let mut events = Events::NONE;
    for (ours, bit) in EVENT_BITS {
        if revents & bit != 0 {
            events |= ours;
        }
    }
    events
}

/// Readiness backend over the portable POSIX `poll(2)` syscall.
///
/// Keeps a scratch array of native `pollfd` structures which is rebuilt from
/// the portable slots on every wait, so the slots handed to the OS always
/// start with zeroed `revents`.
pub struct Poller {
    native: Vec<libc::pollfd>,
}

impl Poller {
    pub fn new() -> Self { Self { native: empty!() } }
}

impl Default for Poller {
    fn default() -> Self { Poller::new() }
}

impl Poll for Poller {
    fn poll(&mut self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        self.native.clear();
        self.native.extend(fds.iter().map(|slot| libc::pollfd {
            fd: slot.fd,
            events: to_native(slot.events),
            revents: 0,
        }));

        let timeout = match timeout {
            Some(duration) => duration.as_millis().try_into().unwrap_or(libc::c_int::MAX),
            None => -1,
        };

        // Blocking call
        let ret = unsafe {
            libc::poll(
                self.native.as_mut_ptr(),
                self.native.len() as libc::nfds_t,
                timeout,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        for (slot, native) in fds.iter_mut().zip(&self.native) {
            slot.revents = from_native(native.revents);
        }

        Ok(ret as usize)
    }
}
