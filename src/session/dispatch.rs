//! Serialized command dispatch and reply framing.
//!
//! The console is a single request/response byte stream with no tagging, so
//! replies must be consumed strictly in send order. `Session::dispatch` takes
//! the channel mutex for the whole exchange: write the command line (with an
//! optional attached descriptor), accumulate bytes until the prompt marks the
//! reply complete, then parse.

use std::os::fd::BorrowedFd;

use crate::channel::{Channel, WaitStatus};
use crate::errors::{MonitorError, MonitorResult};
use crate::hooks::Secret;
use crate::session::{MonitorConfig, Session, SessionInner};

/// Console prompt that terminates every complete reply.
pub(crate) const REPLY_PROMPT: &str = "(qemu) ";

/// Sub-prompt printed when a command wants a passphrase before completing.
pub(crate) const PASSWORD_PROMPT: &str = "Password: ";

const READ_CHUNK: usize = 1024;

/// The channel plus bytes received outside any command exchange (stale or
/// unsolicited console output), consumed ahead of the next reply.
pub(crate) struct ChannelIo {
    pub(crate) chan: Channel,
    pub(crate) pending: Vec<u8>,
}

impl ChannelIo {
    pub(crate) fn new(chan: Channel) -> Self {
        Self {
            chan,
            pending: Vec::new(),
        }
    }
}

/// Which wait bound applies while the reply accumulates.
#[derive(Clone, Copy, Debug)]
enum WaitPolicy {
    /// The ordinary reply timeout.
    Reply,
    /// The (possibly unbounded) foreground-migration timeout.
    Migration,
}

/// One monitor request: a command line, an optional descriptor to attach to
/// the write, and framing options. Lives only for the duration of a dispatch.
pub(crate) struct Command<'a> {
    line: String,
    fd: Option<BorrowedFd<'a>>,
    extra_terminator: Option<&'static str>,
    wait: WaitPolicy,
    sensitive: bool,
}

impl<'a> Command<'a> {
    pub(crate) fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            fd: None,
            extra_terminator: None,
            wait: WaitPolicy::Reply,
            sensitive: false,
        }
    }

    /// Attach a descriptor to the command's write via `SCM_RIGHTS`.
    pub(crate) fn with_fd(mut self, fd: BorrowedFd<'a>) -> Self {
        self.fd = Some(fd);
        self
    }

    /// Also accept the passphrase sub-prompt as a reply terminator.
    pub(crate) fn with_password_prompt(mut self) -> Self {
        self.extra_terminator = Some(PASSWORD_PROMPT);
        self
    }

    /// Wait under the foreground-migration bound instead of the reply bound.
    pub(crate) fn migration_wait(mut self) -> Self {
        self.wait = WaitPolicy::Migration;
        self
    }

    /// Redact the line from logs (passphrases, passwords).
    fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// A parsed reply: echo and terminator stripped, CRLF normalised.
pub(crate) struct Reply {
    text: String,
    wants_password: bool,
}

impl Reply {
    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    /// The console stopped at the passphrase sub-prompt instead of the
    /// command prompt.
    pub(crate) fn wants_password(&self) -> bool {
        self.wants_password
    }
}

#[cfg(test)]
impl Reply {
    pub(crate) fn for_tests(text: &str) -> Self {
        Self {
            text: text.to_string(),
            wants_password: false,
        }
    }
}

/// How the follow-up passphrase is obtained when the console asks for one.
pub(crate) enum SecretSource<'a> {
    /// No passphrase is available; a prompt fails the operation.
    Refuse,
    /// Resolved before the command was sent (protected media change).
    Provided(&'a Secret),
    /// Literal password text (VNC password entry).
    Password(&'a str),
    /// Resolved from the encrypted-disk path named in the reply (resume of
    /// a guest with encrypted storage).
    FromReply(&'a (dyn Fn(&str) -> MonitorResult<Secret> + Send + Sync)),
}

impl Session {
    /// Dispatch one command and parse its reply. At most one command is in
    /// flight per session; concurrent callers queue on the channel mutex.
    pub(crate) async fn dispatch(&self, cmd: Command<'_>) -> MonitorResult<Reply> {
        self.dispatch_secure(cmd, SecretSource::Refuse).await
    }

    /// Dispatch a command that may stop at a passphrase sub-prompt, keeping
    /// the channel lock across the passphrase follow-up so no other command
    /// can interleave.
    pub(crate) async fn dispatch_secure(
        &self,
        cmd: Command<'_>,
        secret: SecretSource<'_>,
    ) -> MonitorResult<Reply> {
        let inner = self.inner();
        // Pull the watcher off the channel before queueing on the lock.
        inner.wake.notify_waiters();
        let mut io = inner.io.lock().await;
        if inner.is_closed() {
            return Err(MonitorError::connection("session channel is closed"));
        }
        let reply = exchange(inner, &mut io, &cmd).await?;
        if !reply.wants_password {
            return Ok(reply);
        }
        let pass = match secret {
            SecretSource::Refuse => {
                let verb = cmd.line.split_whitespace().next().unwrap_or("command");
                return Err(MonitorError::failed(
                    verb,
                    "console requested a passphrase but none was available",
                ));
            }
            SecretSource::Password(p) => p.to_string(),
            SecretSource::Provided(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
            SecretSource::FromReply(lookup) => {
                let path = encrypted_disk_path(reply.text()).ok_or_else(|| {
                    MonitorError::protocol(format!(
                        "cannot locate encrypted disk path in reply '{}'",
                        reply.text()
                    ))
                })?;
                tracing::debug!(path = %path, "resolving passphrase for encrypted disk");
                let s = lookup(path)?;
                String::from_utf8_lossy(s.as_bytes()).into_owned()
            }
        };
        let mut follow = Command::new(pass).sensitive();
        let reply = exchange(inner, &mut io, &follow).await;
        // The passphrase buffer is scrubbed whether or not the exchange
        // succeeded.
        scrub_line(&mut follow);
        reply
    }
}

/// Overwrite a spent secret-bearing command line in place.
fn scrub_line(cmd: &mut Command<'_>) {
    let mut spent = std::mem::take(&mut cmd.line).into_bytes();
    spent.fill(0);
}

/// Discard buffered bytes through the last reply prompt. Anything a prompt
/// already terminated can only be a reply whose caller gave up on it.
fn drop_stale_replies(buf: &mut Vec<u8>) {
    let prompt = REPLY_PROMPT.as_bytes();
    if let Some(pos) = buf.windows(prompt.len()).rposition(|w| w == prompt) {
        buf.drain(..pos + prompt.len());
    }
}

async fn exchange(
    inner: &SessionInner,
    io: &mut ChannelIo,
    cmd: &Command<'_>,
) -> MonitorResult<Reply> {
    if cmd.sensitive {
        tracing::debug!(command = "<redacted>", "sending monitor command");
    } else {
        tracing::debug!(command = %cmd.line, "sending monitor command");
    }
    let mut wire = cmd.line.clone().into_bytes();
    wire.push(b'\r');
    let written = match cmd.fd {
        Some(fd) => io.chan.write_all_with_fd(&wire, fd).await,
        None => io.chan.write_all(&wire).await,
    };
    if cmd.sensitive {
        wire.fill(0);
    }
    if let Err(e) = written {
        inner.note_disconnect(true);
        return Err(e);
    }

    let bound = match cmd.wait {
        WaitPolicy::Reply => Some(inner.cfg.reply_timeout),
        WaitPolicy::Migration => inner.cfg.migrate_timeout,
    };
    let mut buf = std::mem::take(&mut io.pending);
    // Parked bytes ending in a prompt are a complete reply to a command that
    // already timed out; they pair with no live caller.
    drop_stale_replies(&mut buf);
    loop {
        if let Some(reply) = extract_reply(&buf, &cmd.line, cmd.extra_terminator, !cmd.sensitive) {
            tracing::trace!(bytes = buf.len(), "reply complete");
            return Ok(reply);
        }
        if buf.len() > inner.cfg.max_reply_bytes {
            return Err(MonitorError::protocol(format!(
                "reply exceeded {} bytes without terminating",
                inner.cfg.max_reply_bytes
            )));
        }
        let status = match io.chan.wait_for_input(bound).await {
            Ok(s) => s,
            Err(e) => {
                inner.note_disconnect(true);
                return Err(e);
            }
        };
        match status {
            WaitStatus::TimedOut => {
                // Keep whatever arrived; the session stays open and the
                // caller decides whether to abandon it.
                io.pending = buf;
                return Err(MonitorError::Timeout);
            }
            WaitStatus::Closed => {
                inner.note_disconnect(true);
                return Err(MonitorError::connection("channel closed while awaiting reply"));
            }
            WaitStatus::Ready => {
                let mut chunk = [0u8; READ_CHUNK];
                let n = match io.chan.read(&mut chunk).await {
                    Ok(n) => n,
                    Err(e) => {
                        inner.note_disconnect(true);
                        return Err(e);
                    }
                };
                if n == 0 {
                    inner.note_disconnect(true);
                    return Err(MonitorError::connection(
                        "channel closed while awaiting reply",
                    ));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// Swallow the greeting banner of a freshly created console, up to and
/// including its first prompt.
pub(crate) async fn consume_greeting(io: &mut ChannelIo, cfg: &MonitorConfig) -> MonitorResult<()> {
    let mut buf = Vec::new();
    loop {
        if String::from_utf8_lossy(&buf).ends_with(REPLY_PROMPT) {
            tracing::trace!(bytes = buf.len(), "console greeting consumed");
            return Ok(());
        }
        if buf.len() > cfg.max_reply_bytes {
            return Err(MonitorError::protocol("greeting banner never terminated"));
        }
        match io.chan.wait_for_input(Some(cfg.reply_timeout)).await? {
            WaitStatus::TimedOut => return Err(MonitorError::Timeout),
            WaitStatus::Closed => {
                return Err(MonitorError::connection("channel closed during greeting"));
            }
            WaitStatus::Ready => {
                let mut chunk = [0u8; READ_CHUNK];
                let n = io.chan.read(&mut chunk).await?;
                if n == 0 {
                    return Err(MonitorError::connection("channel closed during greeting"));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// `require_echo` refuses a terminator until the command's own echo has been
/// seen, so a late reply to an earlier command cannot be mistaken for this
/// one. Passphrase lines are not echoed by the console, so sensitive
/// exchanges pass `false`.
fn extract_reply(buf: &[u8], cmd_line: &str, extra: Option<&str>, require_echo: bool) -> Option<Reply> {
    let text = String::from_utf8_lossy(buf);
    let text = text.as_ref();
    if require_echo && !text.contains(cmd_line) {
        return None;
    }
    let (body, wants_password) = if let Some(stripped) = text.strip_suffix(REPLY_PROMPT) {
        (stripped, false)
    } else if let Some(term) = extra {
        (text.strip_suffix(term)?, true)
    } else {
        return None;
    };
    Some(Reply {
        text: strip_echo(body, cmd_line),
        wants_password,
    })
}

/// Drop everything through the echoed command line, tolerating stale output
/// buffered ahead of the echo, then normalise line endings.
fn strip_echo(body: &str, cmd_line: &str) -> String {
    let after = match body.find(cmd_line) {
        Some(pos) => {
            let rest = &body[pos + cmd_line.len()..];
            match rest.find('\n') {
                Some(nl) => &rest[nl + 1..],
                None => "",
            }
        }
        None => match body.find('\n') {
            Some(nl) => &body[nl + 1..],
            None => body,
        },
    };
    after.replace("\r\n", "\n").trim_end().to_string()
}

/// Pick the quoted image path out of a "('<path>' ...) is encrypted" notice.
fn encrypted_disk_path(text: &str) -> Option<&str> {
    let marker = text.find("is encrypted")?;
    let head = &text[..marker];
    let end = head.rfind('\'')?;
    let start = head[..end].rfind('\'')?;
    Some(&head[start + 1..end])
}
