//! monlite — typed control-channel client for a hypervisor's text monitor
//! console.
//!
//! A hypervisor-management layer administers one running VM process through
//! a raw, line-oriented request/response console. This crate turns that
//! channel into a typed administrative API: power control, memory
//! ballooning, media changes, USB/PCI hot-plug, host-network attach,
//! migration control, and memory snapshotting.
//!
//! One [`Session`] owns one console. Commands are serialized internally —
//! the console has no request tagging, so replies must be consumed in send
//! order — and a background watcher distinguishes expected closure (guest
//! shutdown) from failure (process crash), reporting it through the
//! session's [`EofNotifier`] exactly once.
//!
//! ```no_run
//! use monlite::{OpenMode, Session, VmRef};
//!
//! # async fn demo() -> monlite::MonitorResult<()> {
//! let session = Session::open(
//!     "/var/run/vm-7.monitor",
//!     OpenMode::Create,
//!     VmRef::new("vm-7"),
//!     |_vm: &VmRef, with_error: bool| {
//!         eprintln!("console closed (error: {with_error})");
//!     },
//! )
//! .await?;
//!
//! session.set_balloon(512 * 1024).await?;
//! let threads = session.cpu_info().await?;
//! println!("vCPU threads: {threads:?}");
//! session.close().await;
//! # Ok(()) }
//! ```

#![warn(missing_docs)]

mod channel;
mod errors;
mod hooks;
mod ops;
mod session;

pub use channel::WaitStatus;
pub use errors::{MonitorError, MonitorResult};
pub use hooks::{ConnectRef, EofNotifier, Secret, SecretResolver, VmRef};
pub use ops::block::BlockStats;
pub use ops::migrate::{MigrationCounters, MigrationInfo, MigrationStatus};
pub use ops::pci::{HostPciAddress, PciAddress};
pub use ops::usb::{UsbAddress, UsbMatch};
pub use session::{MonitorConfig, OpenMode, Session};
