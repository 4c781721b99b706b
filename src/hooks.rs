//! Caller-supplied callbacks and the opaque references passed through them.
//!
//! The session never interprets the VM or connection references; they exist
//! so the orchestration layer can recover its own context when a callback
//! fires. Both are cheaply cloneable type-erased handles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::errors::MonitorResult;

/// Opaque reference to the VM a session is bound to.
///
/// Handed back unchanged to the EOF notifier and the secret resolver.
#[derive(Clone)]
pub struct VmRef(Arc<dyn Any + Send + Sync>);

impl VmRef {
    /// Wrap an arbitrary caller value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Recover the wrapped value, if it has type `T`.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VmRef(..)")
    }
}

/// Opaque reference to the external connection context a secret resolver
/// needs to locate its backend.
#[derive(Clone)]
pub struct ConnectRef(Arc<dyn Any + Send + Sync>);

impl ConnectRef {
    /// Wrap an arbitrary caller value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Recover the wrapped value, if it has type `T`.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for ConnectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectRef(..)")
    }
}

/// Secret material for unlocking protected disk images.
///
/// Ownership transfers to whoever requested the lookup; the buffer is
/// scrubbed when dropped.
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    /// Take ownership of raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        // Best-effort scrub; keeps passphrases out of freed heap pages.
        self.bytes.fill(0);
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} bytes)", self.bytes.len())
    }
}

/// Notified at most once per session when the channel closes outside of an
/// owner-initiated close.
///
/// `with_error` distinguishes a crash or protocol violation from an orderly
/// guest shutdown. Never invoked while a command holds the channel.
pub trait EofNotifier: Send + Sync + 'static {
    /// The channel closed; `vm` is the reference the session was opened with.
    fn closed(&self, vm: &VmRef, with_error: bool);
}

impl<F> EofNotifier for F
where
    F: Fn(&VmRef, bool) + Send + Sync + 'static,
{
    fn closed(&self, vm: &VmRef, with_error: bool) {
        self(vm, with_error)
    }
}

/// Resolves a (connection, VM, path) tuple to secret bytes.
///
/// Invoked synchronously from within whichever typed operation needs the
/// secret, before (or while) that operation's command is on the wire. The
/// session never stores or derives secret material itself; resolver errors
/// propagate to the caller unchanged.
pub trait SecretResolver: Send + Sync + 'static {
    /// Look up the secret protecting the disk image at `path`.
    fn disk_secret(&self, conn: &ConnectRef, vm: &VmRef, path: &str) -> MonitorResult<Secret>;
}

impl<F> SecretResolver for F
where
    F: Fn(&ConnectRef, &VmRef, &str) -> MonitorResult<Secret> + Send + Sync + 'static,
{
    fn disk_secret(&self, conn: &ConnectRef, vm: &VmRef, path: &str) -> MonitorResult<Secret> {
        self(conn, vm, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_ref_downcast() {
        let vm = VmRef::new(String::from("guest-7"));
        assert_eq!(vm.downcast_ref::<String>().unwrap(), "guest-7");
        assert!(vm.downcast_ref::<u64>().is_none());
    }

    #[test]
    fn test_secret_debug_redacts() {
        let secret = Secret::new(b"hunter2".to_vec());
        assert_eq!(format!("{:?}", secret), "Secret(7 bytes)");
    }
}
