//! Guest memory snapshotting to host files.

use crate::errors::MonitorResult;
use crate::ops::check_reply;
use crate::session::Session;
use crate::session::dispatch::Command;

impl Session {
    /// Dump `length` bytes of guest virtual memory starting at `offset` into
    /// the host file at `path` (`memsave`).
    ///
    /// The window is not bounds-checked against the guest's actual memory
    /// size here; the hypervisor enforces it.
    pub async fn save_virtual_memory(
        &self,
        offset: u64,
        length: u64,
        path: &str,
    ) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("memsave {offset} {length} \"{path}\"")))
            .await?;
        check_reply("memsave", &reply)
    }

    /// Dump `length` bytes of guest physical memory starting at `offset`
    /// into the host file at `path` (`pmemsave`).
    pub async fn save_physical_memory(
        &self,
        offset: u64,
        length: u64,
        path: &str,
    ) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("pmemsave {offset} {length} \"{path}\"")))
            .await?;
        check_reply("pmemsave", &reply)
    }
}
