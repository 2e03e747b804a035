//! Threaded end-to-end scenarios driving the public poll set API over real
//! socketpairs.

use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as chan;
use pollset::poller::{Poll, PollFd, Poller};
use pollset::{Error, Events, PollSet};

fn socket_pair() -> (UnixStream, UnixStream) {
    let (local, remote) = UnixStream::pair().expect("socketpair");
    local.set_nonblocking(true).expect("nonblocking");
    (local, remote)
}

#[test]
fn basic_readiness() {
    let set = PollSet::new();
    let (local, mut remote) = socket_pair();
    let fd = local.as_raw_fd();
    let (tx, rx) = chan::unbounded();

    set.add(fd, move |events| tx.send(events).expect("report"), None)
        .expect("add");
    set.add_events(fd, Events::READ).expect("subscribe");

    remote.write_all(&[0xAA]).expect("write");
    set.update(Some(Duration::from_secs(1)));

    let events = rx.recv_timeout(Duration::from_secs(1)).expect("dispatched");
    assert!(events.contains(Events::READ));
    assert!(rx.try_recv().is_err(), "single dispatch per update");
}

#[test]
fn wake_before_timeout() {
    let set = Arc::new(PollSet::new());

    let poller = set.clone();
    let handle = thread::spawn(move || {
        let start = Instant::now();
        poller.update(None);
        start.elapsed()
    });

    thread::sleep(Duration::from_millis(50));
    let (local, _remote) = socket_pair();
    set.add(local.as_raw_fd(), |_| {}, None).expect("add");

    let elapsed = handle.join().expect("poller thread");
    assert!(elapsed < Duration::from_millis(500), "woken only after {elapsed:?}");
}

#[test]
fn signal_wakes_an_infinite_wait() {
    let set = Arc::new(PollSet::new());

    let poller = set.clone();
    let handle = thread::spawn(move || poller.update(None));

    thread::sleep(Duration::from_millis(50));
    set.signal();

    handle.join().expect("poller thread");
}

#[test]
fn remove_during_wait_suppresses_dispatch() {
    let set = Arc::new(PollSet::new());
    let (local, mut remote) = socket_pair();
    let fd = local.as_raw_fd();
    let (tx, rx) = chan::unbounded();

    set.add(fd, move |events| tx.send(events).expect("report"), None)
        .expect("add");
    set.add_events(fd, Events::READ).expect("subscribe");

    // Prime the snapshot so that the descriptor is part of the polled array.
    set.update(Some(Duration::ZERO));

    let poller = set.clone();
    let handle = thread::spawn(move || poller.update(None));

    thread::sleep(Duration::from_millis(50));
    set.del(fd).expect("del");
    remote.write_all(&[0x1]).expect("write");

    handle.join().expect("poller thread");
    assert!(rx.try_recv().is_err(), "no dispatch after deletion");
}

#[test]
fn reentrant_delete() {
    let set = Arc::new(PollSet::new());
    let (local, mut remote) = socket_pair();
    let fd = local.as_raw_fd();
    let (tx, rx) = chan::unbounded();

    let inner = set.clone();
    set.add(
        fd,
        move |events| {
            inner.del(fd).expect("re-entrant del");
            tx.send(events).expect("report");
        },
        None,
    )
    .expect("add");
    set.add_events(fd, Events::READ).expect("subscribe");

    remote.write_all(&[0x1]).expect("write");
    set.update(Some(Duration::from_secs(1)));
    rx.recv_timeout(Duration::from_secs(1)).expect("first dispatch");

    // The deletion took effect: the byte is still unread, yet the callback
    // is never invoked again.
    remote.write_all(&[0x1]).expect("write");
    set.update(Some(Duration::from_millis(100)));
    assert!(rx.try_recv().is_err(), "no dispatch after re-entrant delete");
    assert!(!set.contains(fd));
}

#[test]
fn reentrant_add() {
    let set = Arc::new(PollSet::new());
    let (local, mut remote) = socket_pair();
    let (second, mut second_remote) = socket_pair();
    let fd = local.as_raw_fd();
    let second_fd = second.as_raw_fd();
    let (tx, rx) = chan::unbounded();

    let inner = set.clone();
    let second_tx = tx.clone();
    set.add(
        fd,
        move |_| {
            let tx = second_tx.clone();
            if inner
                .add(second_fd, move |events| tx.send((second_fd, events)).expect("report"), None)
                .is_ok()
            {
                inner.add_events(second_fd, Events::READ).expect("subscribe");
            }
            inner.del_events(fd, Events::READ).expect("narrow");
        },
        None,
    )
    .expect("add");
    set.add_events(fd, Events::READ).expect("subscribe");

    remote.write_all(&[0x1]).expect("write");
    set.update(Some(Duration::from_secs(1)));

    // The registration made from inside the callback is polled on the next
    // update.
    second_remote.write_all(&[0x2]).expect("write");
    set.update(Some(Duration::from_secs(1)));

    let (fired_fd, events) = rx.recv_timeout(Duration::from_secs(1)).expect("dispatched");
    assert_eq!(fired_fd, second_fd);
    assert!(events.contains(Events::READ));
}

#[test]
fn duplicate_add_rejected() {
    let set = PollSet::new();
    let (local, mut remote) = socket_pair();
    let fd = local.as_raw_fd();
    let (tx1, rx1) = chan::unbounded();
    let (tx2, rx2) = chan::unbounded();

    set.add(fd, move |events| tx1.send(events).expect("report"), None)
        .expect("add");
    assert_eq!(
        set.add(fd, move |events| tx2.send(events).expect("report"), None),
        Err(Error::Duplicate(fd))
    );

    set.add_events(fd, Events::READ).expect("subscribe");
    remote.write_all(&[0x1]).expect("write");
    set.update(Some(Duration::from_secs(1)));

    assert!(
        rx1.recv_timeout(Duration::from_secs(1)).is_ok(),
        "original callback remains"
    );
    assert!(rx2.try_recv().is_err(), "rejected callback never runs");
}

#[test]
fn hangup_delivered_without_interest() {
    let set = PollSet::new();
    let (local, remote) = socket_pair();
    let fd = local.as_raw_fd();
    let (tx, rx) = chan::unbounded();

    // No events subscribed at all; the interest mask stays empty.
    set.add(fd, move |events| tx.send(events).expect("report"), None)
        .expect("add");

    drop(remote);
    set.update(Some(Duration::from_secs(1)));

    let events = rx.recv_timeout(Duration::from_secs(1)).expect("dispatched");
    assert!(events.contains(Events::HUP));
    assert!(!events.intersects(Events::READ | Events::WRITE));
}

#[test]
fn wakeup_pipe_is_drained() {
    let set = PollSet::new();

    set.signal();
    set.signal();
    set.signal();
    set.update(Some(Duration::from_millis(500)));

    // With the pipe drained, nothing is ready and the next update has to
    // run into its timeout.
    let start = Instant::now();
    set.update(Some(Duration::from_millis(100)));
    assert!(start.elapsed() >= Duration::from_millis(90), "wake bytes left in the pipe");
}

/// Backend wrapping [`Poller`] which runs a one-shot hook right after the
/// wait returns, while the dispatch phase is still ahead.
struct HookedPoll {
    inner: Poller,
    hook: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Poll for HookedPoll {
    fn poll(&mut self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        let count = self.inner.poll(fds, timeout)?;
        if let Some(hook) = self.hook.lock().expect("hook lock").take() {
            hook();
        }
        Ok(count)
    }
}

#[test]
fn narrowed_interest_is_not_dispatched() {
    let hook = Arc::new(Mutex::new(None));
    let set = Arc::new(PollSet::with_poller(HookedPoll {
        inner: Poller::new(),
        hook: hook.clone(),
    }));
    let (local, mut remote) = socket_pair();
    let fd = local.as_raw_fd();
    let (tx, rx) = chan::unbounded();

    set.add(fd, move |events| tx.send(events).expect("report"), None)
        .expect("add");
    set.add_events(fd, Events::READ).expect("subscribe");

    // Narrow the interest between the OS wait reporting readiness and the
    // dispatch phase acting on it.
    let narrowing = set.clone();
    *hook.lock().expect("hook lock") = Some(Box::new(move || {
        narrowing.del_events(fd, Events::READ).expect("narrow");
    }));

    remote.write_all(&[0x1]).expect("write");
    set.update(Some(Duration::from_secs(1)));

    assert!(rx.try_recv().is_err(), "readiness outside the interest mask dispatched");
}
