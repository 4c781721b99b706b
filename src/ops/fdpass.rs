//! Descriptor handoff: lend the hypervisor a host file descriptor under a
//! symbolic name, and retract it.
//!
//! The name is a caller-chosen token correlated across the send/close pair;
//! uniqueness is hypervisor policy, not validated here.

use std::os::fd::BorrowedFd;

use crate::errors::MonitorResult;
use crate::ops::check_reply;
use crate::session::Session;
use crate::session::dispatch::Command;

impl Session {
    /// Hand `fd` to the hypervisor as `fdname` (`getfd`). The descriptor
    /// rides the command's write via `SCM_RIGHTS`.
    pub async fn send_file_handle(&self, fdname: &str, fd: BorrowedFd<'_>) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("getfd {fdname}")).with_fd(fd))
            .await?;
        check_reply("getfd", &reply)
    }

    /// Retract the descriptor previously sent as `fdname` (`closefd`).
    pub async fn close_file_handle(&self, fdname: &str) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("closefd {fdname}")))
            .await?;
        check_reply("closefd", &reply)
    }
}
