//! Shared test harness: a scripted fake console speaking the text-monitor
//! framing over a socketpair.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use monlite::{MonitorConfig, OpenMode, Session, VmRef};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Banner a freshly created console prints before its first prompt.
pub const GREETING: &str = "QEMU 0.10.6 monitor - type 'help' for more information\r\n(qemu) ";

/// How the fake console answers one received command line.
pub enum Script {
    /// Echo, reply text (possibly empty), prompt.
    Reply(String),
    /// Like `Reply`, but the console stays quiet for the pause first.
    ReplyAfter(Duration, String),
    /// Echo, reply text, then the password sub-prompt and no command prompt.
    AskPassword(String),
    /// Echo plus partial reply text, then close the connection.
    CloseAfter(String),
    /// Say nothing at all and keep the connection open.
    Silent,
}

impl Script {
    pub fn ok() -> Script {
        Script::Reply(String::new())
    }

    pub fn text(t: impl Into<String>) -> Script {
        Script::Reply(t.into())
    }
}

/// Handle on a spawned fake console; `log` records every command line the
/// console received, in order.
pub struct FakeConsole {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl FakeConsole {
    /// Spawn a console task answering via `script`. Returns the client end
    /// of the socketpair and the console handle.
    pub fn spawn<F>(mut script: F) -> (UnixStream, FakeConsole)
    where
        F: FnMut(&str) -> Script + Send + 'static,
    {
        let (client, mut server) = UnixStream::pair().expect("socketpair");
        let log = Arc::new(Mutex::new(Vec::new()));
        let task_log = Arc::clone(&log);
        tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            'outer: loop {
                let mut chunk = [0u8; 256];
                let n = match server.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);
                while let Some(pos) = buf.iter().position(|&b| b == b'\r') {
                    let line = String::from_utf8_lossy(&buf[..pos]).into_owned();
                    buf.drain(..=pos);
                    task_log.lock().unwrap().push(line.clone());

                    let mut out = Vec::new();
                    out.extend_from_slice(line.as_bytes());
                    out.extend_from_slice(b"\r\n");
                    let action = script(&line);
                    if let Script::ReplyAfter(delay, _) = &action {
                        tokio::time::sleep(*delay).await;
                    }
                    match action {
                        Script::Reply(text) | Script::ReplyAfter(_, text) => {
                            if !text.is_empty() {
                                out.extend_from_slice(text.replace('\n', "\r\n").as_bytes());
                                out.extend_from_slice(b"\r\n");
                            }
                            out.extend_from_slice(b"(qemu) ");
                        }
                        Script::AskPassword(text) => {
                            if !text.is_empty() {
                                out.extend_from_slice(text.replace('\n', "\r\n").as_bytes());
                                out.extend_from_slice(b"\r\n");
                            }
                            out.extend_from_slice(b"Password: ");
                        }
                        Script::CloseAfter(text) => {
                            out.extend_from_slice(text.as_bytes());
                            let _ = server.write_all(&out).await;
                            return;
                        }
                        Script::Silent => continue,
                    }
                    if server.write_all(&out).await.is_err() {
                        break 'outer;
                    }
                }
            }
        });
        (client, FakeConsole { log })
    }

    /// Snapshot of the command lines received so far.
    pub fn lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

/// Short bounds so failure paths do not stall the suite.
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        reply_timeout: Duration::from_secs(2),
        migrate_timeout: Some(Duration::from_secs(2)),
        max_reply_bytes: 64 * 1024,
        watch_interval: Duration::from_millis(25),
    }
}

/// Session bound to a fake console, with a no-op EOF notifier.
pub async fn session_with<F>(script: F) -> (Session, FakeConsole)
where
    F: FnMut(&str) -> Script + Send + 'static,
{
    session_with_notifier(script, |_: &VmRef, _| {}).await
}

/// Session bound to a fake console with a caller-supplied EOF notifier.
pub async fn session_with_notifier<F, N>(script: F, notifier: N) -> (Session, FakeConsole)
where
    F: FnMut(&str) -> Script + Send + 'static,
    N: monlite::EofNotifier,
{
    init_logging();
    let (client, fake) = FakeConsole::spawn(script);
    let session = Session::attach_stream(
        client,
        OpenMode::Attach,
        VmRef::new(String::from("test-vm")),
        notifier,
        test_config(),
    )
    .await
    .expect("attach");
    (session, fake)
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or ~2 seconds elapse.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
