//! Byte-stream endpoint to the VM's monitor console.
//!
//! A `Channel` knows nothing about the command protocol; it only moves bytes
//! over the underlying socket and reports peer closure. One auxiliary file
//! descriptor can ride along a write via `SCM_RIGHTS` (used for descriptor
//! handoff, e.g. migration targets).

use std::io::IoSlice;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::time::Duration;

use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::UnixStream;

use crate::errors::{MonitorError, MonitorResult};

/// Outcome of waiting for console input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// Data is available to read.
    Ready,
    /// The peer closed the channel.
    Closed,
    /// The wait bound elapsed with no data.
    TimedOut,
}

/// An open console endpoint.
pub(crate) struct Channel {
    stream: UnixStream,
}

impl Channel {
    /// Connect to the console socket at `path`.
    pub(crate) async fn connect(path: &Path) -> MonitorResult<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            MonitorError::connection(format!("connect to {}: {e}", path.display()))
        })?;
        Ok(Self { stream })
    }

    /// Wrap an already-connected stream (reconnect/attach path, tests).
    pub(crate) fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Write all of `bytes` to the console.
    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> MonitorResult<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| MonitorError::connection(format!("write: {e}")))
    }

    /// Write all of `bytes`, attaching `fd` to the first transmitted chunk.
    ///
    /// The descriptor is associated with the write via `SCM_RIGHTS`; any
    /// remainder the kernel did not accept in that chunk is flushed with
    /// plain writes.
    pub(crate) async fn write_all_with_fd(
        &mut self,
        bytes: &[u8],
        fd: BorrowedFd<'_>,
    ) -> MonitorResult<()> {
        let sock = self.stream.as_raw_fd();
        let raw = fd.as_raw_fd();
        let sent = self
            .stream
            .async_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(bytes)];
                let fds = [raw];
                let cmsg = [ControlMessage::ScmRights(&fds)];
                sendmsg::<()>(sock, &iov, &cmsg, MsgFlags::empty(), None)
                    .map_err(std::io::Error::from)
            })
            .await
            .map_err(|e| MonitorError::connection(format!("sendmsg: {e}")))?;
        if sent < bytes.len() {
            self.write_all(&bytes[sent..]).await?;
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes. Returns 0 on graceful peer close.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> MonitorResult<usize> {
        self.stream
            .read(buf)
            .await
            .map_err(|e| MonitorError::connection(format!("read: {e}")))
    }

    /// Block until data is available, the peer closes, or `bound` elapses.
    ///
    /// `None` waits without bound (foreground migration policy).
    pub(crate) async fn wait_for_input(
        &self,
        bound: Option<Duration>,
    ) -> MonitorResult<WaitStatus> {
        let ready = match bound {
            Some(limit) => {
                match tokio::time::timeout(limit, self.stream.ready(Interest::READABLE)).await {
                    Ok(res) => res.map_err(|e| MonitorError::connection(format!("wait: {e}")))?,
                    Err(_) => return Ok(WaitStatus::TimedOut),
                }
            }
            None => self
                .stream
                .ready(Interest::READABLE)
                .await
                .map_err(|e| MonitorError::connection(format!("wait: {e}")))?,
        };
        // Readable data wins over half-close: drain what the peer sent
        // before reporting closure.
        if ready.is_readable() {
            Ok(WaitStatus::Ready)
        } else if ready.is_read_closed() {
            Ok(WaitStatus::Closed)
        } else {
            Ok(WaitStatus::Ready)
        }
    }

    /// Shut down the write half, signalling we are done with the console.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
