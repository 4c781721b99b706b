//! Guest execution control: CPU start/stop, powerdown, CPU enumeration, and
//! display password entry.

use crate::errors::MonitorResult;
use crate::hooks::ConnectRef;
use crate::ops::check_reply;
use crate::session::Session;
use crate::session::dispatch::{Command, SecretSource};

impl Session {
    /// Resume guest CPU execution (`cont`).
    ///
    /// Resuming a guest with encrypted storage can stop at a passphrase
    /// prompt; the path the console names is resolved through the registered
    /// secret resolver, with `conn` passed through as its backend context.
    pub async fn start_cpus(&self, conn: &ConnectRef) -> MonitorResult<()> {
        let lookup = |path: &str| self.disk_secret(conn, path);
        let reply = self
            .dispatch_secure(
                Command::new("cont").with_password_prompt(),
                SecretSource::FromReply(&lookup),
            )
            .await?;
        check_reply("cont", &reply)
    }

    /// Pause guest CPU execution (`stop`).
    pub async fn stop_cpus(&self) -> MonitorResult<()> {
        let reply = self.dispatch(Command::new("stop")).await?;
        check_reply("stop", &reply)
    }

    /// Request an ACPI powerdown. Fire-and-acknowledge: returns once the
    /// console accepts the request, not when the guest finishes shutting
    /// down.
    pub async fn system_powerdown(&self) -> MonitorResult<()> {
        let reply = self.dispatch(Command::new("system_powerdown")).await?;
        check_reply("system_powerdown", &reply)
    }

    /// Host thread ids backing the virtual CPUs, one per vCPU in order.
    /// An empty list is valid: the console reported no CPUs.
    pub async fn cpu_info(&self) -> MonitorResult<Vec<u32>> {
        let reply = self.dispatch(Command::new("info cpus")).await?;
        check_reply("info cpus", &reply)?;
        Ok(parse_cpu_threads(reply.text()))
    }

    /// Set the VNC server password. The password crosses the channel in the
    /// clear; channel confidentiality is the transport's concern.
    pub async fn set_vnc_password(&self, password: &str) -> MonitorResult<()> {
        let reply = self
            .dispatch_secure(
                Command::new("change vnc password").with_password_prompt(),
                SecretSource::Password(password),
            )
            .await?;
        check_reply("change vnc password", &reply)
    }
}

fn parse_cpu_threads(text: &str) -> Vec<u32> {
    text.lines()
        .filter(|line| line.contains("CPU #"))
        .filter_map(|line| crate::ops::number_after(line, "thread_id="))
        .filter_map(|tid| u32::try_from(tid).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_threads() {
        let text = "* CPU #0: pc=0x00000000fffffff0 thread_id=26460\n  CPU #1: pc=0x00000000fffffff0 (halted) thread_id=26461";
        assert_eq!(parse_cpu_threads(text), vec![26460, 26461]);
    }

    #[test]
    fn test_parse_cpu_threads_empty() {
        assert!(parse_cpu_threads("").is_empty());
    }
}
