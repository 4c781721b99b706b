//! Memory ballooning.
//!
//! Balloon sizes cross this API in KiB; the console speaks MiB on the wire
//! and the conversion happens here.

use crate::errors::{MonitorError, MonitorResult};
use crate::ops::check_reply;
use crate::session::Session;
use crate::session::dispatch::Command;

impl Session {
    /// Current balloon size in KiB (`info balloon`).
    pub async fn balloon_info(&self) -> MonitorResult<u64> {
        let reply = self.dispatch(Command::new("info balloon")).await?;
        check_reply("info balloon", &reply)?;
        parse_balloon(reply.text()).ok_or_else(|| {
            MonitorError::protocol(format!("unparseable balloon info '{}'", reply.text()))
        })
    }

    /// Ask the in-guest balloon driver for a new target size, in KiB.
    ///
    /// Whether a target of 0 or one below the guest's working minimum is
    /// honoured is hypervisor policy; no validation happens here.
    pub async fn set_balloon(&self, target_kib: u64) -> MonitorResult<()> {
        let target_mib = target_kib / 1024;
        let reply = self
            .dispatch(Command::new(format!("balloon {target_mib}")))
            .await?;
        check_reply("balloon", &reply)
    }
}

fn parse_balloon(text: &str) -> Option<u64> {
    crate::ops::number_after(text, "balloon: actual=").map(|mib| mib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_balloon() {
        assert_eq!(parse_balloon("balloon: actual=512"), Some(512 * 1024));
        assert_eq!(parse_balloon("garbage"), None);
    }
}
