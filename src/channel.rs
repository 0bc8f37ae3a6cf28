//! Stop channel between a worker and its execution context
//!
//! A one-directional socket pair created fresh for every start. The controller
//! keeps the [`StopSender`], the execution context waits on the [`StopReceiver`].
//! The only message is "stop now"; end-of-stream means the controller is gone.

use std::io::{self, Read};
use std::net::Shutdown;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

const STOP_MESSAGE: u8 = 1;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Result of waiting on the stop channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A stop message arrived
    Stop,
    /// The timeout elapsed without a message
    Elapsed,
    /// The sending side was closed
    Disconnected,
}

/// Create a fresh stop channel.
pub fn stop_channel() -> io::Result<(StopSender, StopReceiver)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.shutdown(Shutdown::Read)?;
    rx.shutdown(Shutdown::Write)?;
    Ok((StopSender { stream: tx }, StopReceiver { stream: rx }))
}

/// Whether a send error means the receiving side no longer exists.
pub fn is_disconnected(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
    )
}

#[derive(Debug)]
pub struct StopSender {
    stream: UnixStream,
}

impl StopSender {
    /// Send the stop message.
    ///
    /// Fails with a [`is_disconnected`] error once every copy of the receiving
    /// end has been closed.
    pub fn send(&self) -> io::Result<()> {
        let message = [STOP_MESSAGE];
        loop {
            // SAFETY: the buffer outlives the call and the descriptor is owned by `self.stream`.
            let sent = unsafe {
                libc::send(
                    self.stream.as_raw_fd(),
                    message.as_ptr().cast(),
                    message.len(),
                    SEND_FLAGS,
                )
            };
            if sent >= 0 {
                return Ok(());
            }

            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }
    }

    /// Close this process's copy of the descriptor without consuming the handle.
    ///
    /// Only for a freshly forked child, which leaves through `_exit` and never
    /// drops the handle it inherited.
    pub(crate) fn close_inherited(&self) {
        // SAFETY: the handle is never used or dropped again in this process.
        unsafe {
            libc::close(self.stream.as_raw_fd());
        }
    }
}

#[derive(Debug)]
pub struct StopReceiver {
    stream: UnixStream,
}

impl StopReceiver {
    /// Wait up to `timeout` for a stop message.
    ///
    /// A zero timeout checks for a pending message without blocking.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<WaitOutcome> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let poll_timeout = match deadline {
                Some(deadline) => poll_timeout_ms(deadline.saturating_duration_since(Instant::now())),
                None => -1,
            };

            let mut pollfd = libc::pollfd {
                fd: self.stream.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: exactly one valid pollfd is passed.
            let ready = unsafe { libc::poll(&mut pollfd, 1, poll_timeout) };

            if ready < 0 {
                let error = io::Error::last_os_error();
                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(error);
            }
            if ready == 0 {
                return Ok(WaitOutcome::Elapsed);
            }

            let mut buf = [0u8; 1];
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(WaitOutcome::Disconnected),
                Ok(_) => return Ok(WaitOutcome::Stop),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if is_disconnected(&error) => return Ok(WaitOutcome::Disconnected),
                Err(error) => return Err(error),
            }
        }
    }
}

/// Milliseconds for `poll(2)`, rounded up so a wait never ends early.
fn poll_timeout_ms(remaining: Duration) -> libc::c_int {
    let mut millis = remaining.as_millis();
    if remaining.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout_ms(Duration::ZERO), 0);
        assert_eq!(poll_timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(poll_timeout_ms(Duration::from_millis(20)), 20);
        assert_eq!(poll_timeout_ms(Duration::from_micros(20_500)), 21);
        assert_eq!(poll_timeout_ms(Duration::MAX), libc::c_int::MAX);
    }

    #[test]
    fn test_wait_elapses_without_message() {
        let (_tx, mut rx) = stop_channel().unwrap();

        let started = Instant::now();
        let outcome = rx.wait(Duration::from_millis(50)).unwrap();

        assert_eq!(outcome, WaitOutcome::Elapsed);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_timeout_does_not_block() {
        let (_tx, mut rx) = stop_channel().unwrap();

        let started = Instant::now();
        assert_eq!(rx.wait(Duration::ZERO).unwrap(), WaitOutcome::Elapsed);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_buffered_stop_is_observed() {
        let (tx, mut rx) = stop_channel().unwrap();
        tx.send().unwrap();

        assert_eq!(rx.wait(Duration::ZERO).unwrap(), WaitOutcome::Stop);
        // the message is consumed
        assert_eq!(rx.wait(Duration::ZERO).unwrap(), WaitOutcome::Elapsed);
    }

    #[test]
    fn test_stop_wakes_a_blocked_wait() {
        let (tx, mut rx) = stop_channel().unwrap();

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            tx.send().unwrap();
            tx
        });

        let started = Instant::now();
        assert_eq!(rx.wait(Duration::from_secs(30)).unwrap(), WaitOutcome::Stop);
        assert!(started.elapsed() < Duration::from_secs(30));
        sender.join().unwrap();
    }

    #[test]
    fn test_dropped_sender_disconnects() {
        let (tx, mut rx) = stop_channel().unwrap();
        drop(tx);

        assert_eq!(
            rx.wait(Duration::from_secs(30)).unwrap(),
            WaitOutcome::Disconnected
        );
    }

    #[test]
    fn test_send_after_receiver_dropped_is_disconnected() {
        let (tx, rx) = stop_channel().unwrap();
        drop(rx);

        let err = tx.send().unwrap_err();
        assert!(is_disconnected(&err), "unexpected error kind: {err:?}");
    }
}
