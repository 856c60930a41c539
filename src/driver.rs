//! A small tokio event loop for driving a [Channel].
//!
//! Channels never do I/O on their own. Callers with their own event loop
//! should watch [Channel::socket_descriptors] themselves; this is the loop
//! for everyone else.

use crate::channel::{Channel, Error};
use crate::resolver::{Resolver, Socket};

use futures::future::select_all;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{event, Level};

/// Upper bound on a single wait, in case the core reports no deadline.
const MAX_WAIT: Duration = Duration::from_secs(1);

struct Readiness {
    socket: Socket,
    readable: bool,
    writable: bool,
}

async fn ready(fd: &AsyncFd<BorrowedFd<'_>>, interest: Interest) -> io::Result<Readiness> {
    let guard = fd.ready(interest).await?;
    let ready = guard.ready();
    Ok(Readiness {
        socket: fd.get_ref().as_raw_fd(),
        readable: ready.is_readable() || ready.is_read_closed(),
        writable: ready.is_writable(),
    })
}

/// Waits until one of the sockets is ready, or `timeout` elapses.
///
/// Every descriptor must stay open until this returns. The channel is not
/// advanced while waiting, so its core cannot close them.
async fn wait(
    read: &[Socket],
    write: &[Socket],
    timeout: Duration,
) -> io::Result<Option<Readiness>> {
    let mut watched = vec![];
    for &socket in read.iter().chain(write.iter().filter(|s| !read.contains(s))) {
        let mut interest = if read.contains(&socket) {
            Interest::READABLE
        } else {
            Interest::WRITABLE
        };
        if read.contains(&socket) && write.contains(&socket) {
            interest = interest.add(Interest::WRITABLE);
        }
        // SAFETY: the core owns `socket` and keeps it open until it is next
        // advanced, which happens only after every registration is dropped.
        let fd = unsafe {
            AsyncFd::register_with_interest(BorrowedFd::borrow_raw(socket), interest)?
        };
        watched.push((fd, interest));
    }

    let sleep = tokio::time::sleep(timeout);
    if watched.is_empty() {
        sleep.await;
        return Ok(None);
    }

    let any_ready = select_all(
        watched
            .iter()
            .map(|(fd, interest)| Box::pin(ready(fd, *interest))),
    );
    tokio::select! {
        (result, _, _) = any_ready => result.map(Some),
        _ = sleep => Ok(None),
    }
}

/// Drives `channel` until every pending request has invoked its callback.
///
/// Returns immediately if nothing is pending.
pub async fn run_until_idle<R: Resolver>(channel: &mut Channel<R>) -> Result<(), Error> {
    while channel.pending() > 0 {
        let (read, write) = channel.socket_descriptors()?;
        let timeout = channel.next_timeout(Some(MAX_WAIT))?;
        event!(
            Level::TRACE,
            ?read,
            ?write,
            ?timeout,
            pending = channel.pending(),
            "waiting for activity"
        );

        match wait(&read, &write, timeout).await? {
            Some(ready) => channel.advance(
                ready.readable.then_some(ready.socket),
                ready.writable.then_some(ready.socket),
            )?,
            None => channel.advance(None, None)?,
        }
    }
    Ok(())
}
