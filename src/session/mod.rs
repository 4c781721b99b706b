//! Monitor session lifecycle: open/attach, close, secret-resolver
//! registration, the raw channel surface, and the background EOF watch.
//!
//! One `Session` owns one console channel. All command traffic is funnelled
//! through the dispatcher in [`dispatch`], which serializes commands behind
//! an async mutex; a spawned watcher task observes the channel whenever no
//! command owns it and fires the EOF notifier at most once per session.

pub(crate) mod dispatch;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::sync::Notify;

use crate::channel::{Channel, WaitStatus};
use crate::errors::{MonitorError, MonitorResult};
use crate::hooks::{ConnectRef, EofNotifier, Secret, SecretResolver, VmRef};
use self::dispatch::ChannelIo;

/// Tunables for the console protocol.
///
/// The reply terminator and these bounds are console-specific policy, kept
/// configurable rather than hard-coded as universal constants.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Longest quiet interval tolerated while awaiting a reply.
    pub reply_timeout: Duration,
    /// Wait bound for foreground (`background = false`) migration commands;
    /// `None` blocks until the hypervisor completes the migration.
    pub migrate_timeout: Option<Duration>,
    /// Cap on accumulated reply bytes before the exchange is abandoned as a
    /// protocol violation.
    pub max_reply_bytes: usize,
    /// Polling interval of the background EOF watch.
    pub watch_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(30),
            migrate_timeout: None,
            max_reply_bytes: 1024 * 1024,
            watch_interval: Duration::from_millis(150),
        }
    }
}

/// Whether `open` establishes a fresh console or reattaches to one that is
/// already past its greeting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Fresh console: consume the greeting banner up to the first prompt.
    Create,
    /// Reconnect to an existing console; the banner was consumed long ago.
    Attach,
}

#[derive(Default)]
struct LinkState {
    closed: bool,
    close_is_error: bool,
    eof_fired: bool,
    shutdown: bool,
}

pub(crate) struct SessionInner {
    pub(crate) vm: VmRef,
    pub(crate) cfg: MonitorConfig,
    pub(crate) io: tokio::sync::Mutex<ChannelIo>,
    /// Pinged whenever a dispatcher wants the channel or link state changed,
    /// so the watcher yields promptly.
    pub(crate) wake: Notify,
    state: parking_lot::Mutex<LinkState>,
    eof: Box<dyn EofNotifier>,
    resolver: parking_lot::RwLock<Option<Arc<dyn SecretResolver>>>,
}

impl SessionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Record that the channel is gone. Safe to call repeatedly; the first
    /// call wins the error classification.
    pub(crate) fn note_disconnect(&self, with_error: bool) {
        {
            let mut s = self.state.lock();
            if !s.closed {
                s.closed = true;
                s.close_is_error = with_error;
            }
        }
        self.wake.notify_waiters();
    }

    /// Fire the EOF notifier if it has not fired and the owner has not
    /// already closed the session.
    fn fire_eof(&self) {
        let with_error = {
            let mut s = self.state.lock();
            if s.eof_fired || s.shutdown {
                return;
            }
            s.eof_fired = true;
            s.close_is_error
        };
        if with_error {
            tracing::warn!("monitor channel closed unexpectedly");
        } else {
            tracing::info!("monitor channel closed");
        }
        self.eof.closed(&self.vm, with_error);
    }
}

enum Probe {
    /// A dispatcher asked for the channel; stand back.
    Yield,
    /// Nothing happened within the poll interval.
    Quiet,
    Closed { with_error: bool },
}

async fn probe(io: &mut ChannelIo, bound: Duration) -> Probe {
    match io.chan.wait_for_input(Some(bound)).await {
        Ok(WaitStatus::TimedOut) => Probe::Quiet,
        Ok(WaitStatus::Closed) => Probe::Closed {
            with_error: !io.pending.is_empty(),
        },
        Ok(WaitStatus::Ready) => {
            let mut chunk = [0u8; 512];
            match io.chan.read(&mut chunk).await {
                // Partial unconsumed output at close time means the peer
                // died mid-sentence rather than shutting down cleanly.
                Ok(0) => Probe::Closed {
                    with_error: !io.pending.is_empty(),
                },
                Ok(n) => {
                    io.pending.extend_from_slice(&chunk[..n]);
                    tracing::trace!(bytes = n, "buffered unsolicited console output");
                    Probe::Quiet
                }
                Err(_) => Probe::Closed { with_error: true },
            }
        }
        Err(_) => Probe::Closed { with_error: true },
    }
}

/// Background watcher: observes the channel only when it can take the
/// dispatch lock itself, so the notifier can never fire concurrently with an
/// in-flight command.
async fn watch(inner: Arc<SessionInner>) {
    let interval = inner.cfg.watch_interval;
    loop {
        let closed = {
            let s = inner.state.lock();
            if s.shutdown {
                return;
            }
            s.closed
        };
        if closed {
            // Closure detected by a dispatcher; wait until it (and any
            // callers queued behind it) have released the channel before
            // notifying.
            drop(inner.io.lock().await);
            inner.fire_eof();
            return;
        }
        let Ok(mut io) = inner.io.try_lock() else {
            // A command is in flight.
            tokio::select! {
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep(interval) => {}
            }
            continue;
        };
        let outcome = tokio::select! {
            _ = inner.wake.notified() => Probe::Yield,
            res = probe(&mut io, interval) => res,
        };
        drop(io);
        match outcome {
            Probe::Yield | Probe::Quiet => {}
            Probe::Closed { with_error } => {
                inner.note_disconnect(with_error);
                inner.fire_eof();
                return;
            }
        }
    }
}

/// An administrative session with one running VM's monitor console.
///
/// Cheap to share behind an `Arc`; all operations take `&self` and are
/// serialized internally. Dropping the session without calling
/// [`Session::close`] releases the channel without firing the EOF notifier.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open the console socket at `path` with default [`MonitorConfig`].
    pub async fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        vm: VmRef,
        notifier: impl EofNotifier,
    ) -> MonitorResult<Self> {
        Self::open_with_config(path, mode, vm, notifier, MonitorConfig::default()).await
    }

    /// Open the console socket at `path`.
    pub async fn open_with_config(
        path: impl AsRef<Path>,
        mode: OpenMode,
        vm: VmRef,
        notifier: impl EofNotifier,
        cfg: MonitorConfig,
    ) -> MonitorResult<Self> {
        let chan = Channel::connect(path.as_ref()).await?;
        Self::start(chan, mode, vm, Box::new(notifier), cfg).await
    }

    /// Bind a session to an already-connected stream (pty-style transports,
    /// pre-established sockets).
    pub async fn attach_stream(
        stream: UnixStream,
        mode: OpenMode,
        vm: VmRef,
        notifier: impl EofNotifier,
        cfg: MonitorConfig,
    ) -> MonitorResult<Self> {
        Self::start(Channel::from_stream(stream), mode, vm, Box::new(notifier), cfg).await
    }

    async fn start(
        chan: Channel,
        mode: OpenMode,
        vm: VmRef,
        eof: Box<dyn EofNotifier>,
        cfg: MonitorConfig,
    ) -> MonitorResult<Self> {
        let mut io = ChannelIo::new(chan);
        if mode == OpenMode::Create {
            dispatch::consume_greeting(&mut io, &cfg).await?;
        }
        let inner = Arc::new(SessionInner {
            vm,
            cfg,
            io: tokio::sync::Mutex::new(io),
            wake: Notify::new(),
            state: parking_lot::Mutex::new(LinkState::default()),
            eof,
            resolver: parking_lot::RwLock::new(None),
        });
        tokio::spawn(watch(Arc::clone(&inner)));
        tracing::info!(?mode, "monitor session open");
        Ok(Session { inner })
    }

    /// The opaque VM reference this session was opened with.
    pub fn vm(&self) -> &VmRef {
        &self.inner.vm
    }

    /// Register the resolver consulted for disk passphrases. Replaces any
    /// previously registered resolver.
    pub fn register_secret_resolver(&self, resolver: impl SecretResolver) {
        *self.inner.resolver.write() = Some(Arc::new(resolver));
    }

    /// Resolve the secret protecting the disk image at `path` through the
    /// registered resolver. Resolver errors propagate unchanged.
    pub fn disk_secret(&self, conn: &ConnectRef, path: &str) -> MonitorResult<Secret> {
        let resolver = self.inner.resolver.read().clone();
        match resolver {
            Some(r) => r.disk_secret(conn, &self.inner.vm, path),
            None => Err(MonitorError::NotFound(format!(
                "no secret resolver registered for {path}"
            ))),
        }
    }

    /// Write raw bytes to the console, outside any command framing.
    pub async fn write(&self, bytes: &[u8]) -> MonitorResult<()> {
        self.inner.wake.notify_waiters();
        let mut io = self.inner.io.lock().await;
        io.chan.write_all(bytes).await
    }

    /// Write raw bytes with an auxiliary descriptor attached to the write.
    pub async fn write_with_fd(
        &self,
        bytes: &[u8],
        fd: std::os::fd::BorrowedFd<'_>,
    ) -> MonitorResult<()> {
        self.inner.wake.notify_waiters();
        let mut io = self.inner.io.lock().await;
        io.chan.write_all_with_fd(bytes, fd).await
    }

    /// Read raw bytes from the console. Returns 0 on graceful peer close.
    pub async fn read(&self, buf: &mut [u8]) -> MonitorResult<usize> {
        self.inner.wake.notify_waiters();
        let mut io = self.inner.io.lock().await;
        io.chan.read(buf).await
    }

    /// Wait until console data is available, bounded by the configured reply
    /// timeout.
    pub async fn wait_for_input(&self) -> MonitorResult<WaitStatus> {
        self.inner.wake.notify_waiters();
        let io = self.inner.io.lock().await;
        io.chan
            .wait_for_input(Some(self.inner.cfg.reply_timeout))
            .await
    }

    /// Release the channel. The EOF notifier does not fire for an
    /// owner-initiated close.
    pub async fn close(self) {
        {
            self.inner.state.lock().shutdown = true;
        }
        self.inner.wake.notify_waiters();
        if let Ok(mut io) = self.inner.io.try_lock() {
            io.chan.shutdown().await;
        }
        tracing::info!("monitor session closed");
    }

    pub(crate) fn inner(&self) -> &SessionInner {
        &self.inner
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        {
            let mut s = self.inner.state.lock();
            if s.shutdown {
                return;
            }
            s.shutdown = true;
        }
        self.inner.wake.notify_waiters();
    }
}
