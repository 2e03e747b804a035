use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;

/// Write side of the self-pipe used to kick the poller out of a blocking
/// wait. The read side is registered in the poll set with a [`drain`]
/// callback so that the pipe is emptied whenever it fires.
pub(crate) struct Waker {
    writer: UnixStream,
    /// Serialises signallers so that at most one wake byte is in flight from
    /// this side at a time; a signaller finding the lock busy relies on the
    /// byte already pending to wake the poller.
    lock: Mutex<()>,
}

impl Waker {
    /// Opens the wakeup channel with both ends non-blocking. Returns the
    /// waker holding the write side together with the read side, which the
    /// caller registers in the poll set.
    pub fn new() -> io::Result<(Waker, UnixStream)> {
        let (writer, reader) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        let waker = Waker {
            writer,
            lock: Mutex::new(()),
        };
        Ok((waker, reader))
    }

    /// Advisory wake: writes a single byte to the pipe, never blocking the
    /// caller. A write which would block means a wake byte is already
    /// pending, which suffices; all other errors are ignored as well, since
    /// the next signal or the poll timeout covers a lost wake.
    pub fn wake(&self) {
        if let Ok(_guard) = self.lock.try_lock() {
            let _ = (&self.writer).write(&[0x1]);
        }
    }
}

/// Empties the read side of the wakeup pipe so that subsequent wakes report
/// fresh readiness.
pub(crate) fn drain(mut reader: &UnixStream) {
    let mut buf = [0u8; 4096];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return,
        }
    }
}
