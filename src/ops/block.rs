//! Block devices: per-device I/O statistics and removable-media changes.

use crate::errors::{MonitorError, MonitorResult};
use crate::hooks::ConnectRef;
use crate::ops::check_reply;
use crate::session::Session;
use crate::session::dispatch::{Command, SecretSource};

/// I/O counters for one block device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStats {
    /// Completed read requests.
    pub rd_req: u64,
    /// Bytes read.
    pub rd_bytes: u64,
    /// Completed write requests.
    pub wr_req: u64,
    /// Bytes written.
    pub wr_bytes: u64,
    /// Failed requests, when the console reports them.
    pub errs: Option<u64>,
}

impl Session {
    /// I/O statistics for the named device (`info blockstats`).
    ///
    /// A device the console does not list yields [`MonitorError::NotFound`].
    pub async fn block_stats(&self, devname: &str) -> MonitorResult<BlockStats> {
        let reply = self.dispatch(Command::new("info blockstats")).await?;
        check_reply("info blockstats", &reply)?;
        parse_block_stats(reply.text(), devname)
            .ok_or_else(|| MonitorError::NotFound(format!("block device '{devname}'")))
    }

    /// Eject removable media from the named device.
    pub async fn eject_media(&self, devname: &str) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("eject {devname}")))
            .await?;
        check_reply("eject", &reply)
    }

    /// Insert new media into the named device.
    ///
    /// `protected` marks an encrypted image: the passphrase is resolved
    /// through the registered secret resolver before the command goes out,
    /// and a resolver failure means the command is never sent. The caller
    /// knows protection status from the disk's definition; this layer does
    /// not probe the image.
    pub async fn change_media(
        &self,
        conn: &ConnectRef,
        devname: &str,
        newmedia: &str,
        protected: bool,
    ) -> MonitorResult<()> {
        let cmd = Command::new(format!("change {devname} {newmedia}")).with_password_prompt();
        let reply = if protected {
            let secret = self.disk_secret(conn, newmedia)?;
            self.dispatch_secure(cmd, SecretSource::Provided(&secret))
                .await?
        } else {
            self.dispatch(cmd).await?
        };
        check_reply("change", &reply)
    }
}

fn parse_block_stats(text: &str, devname: &str) -> Option<BlockStats> {
    let prefix = format!("{devname}:");
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(&prefix))?;
    let mut stats = BlockStats::default();
    for token in line[prefix.len()..].split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let Ok(value) = value.parse::<u64>() else {
            continue;
        };
        match key {
            "rd_bytes" => stats.rd_bytes = value,
            "wr_bytes" => stats.wr_bytes = value,
            "rd_operations" => stats.rd_req = value,
            "wr_operations" => stats.wr_req = value,
            "errs" => stats.errs = Some(value),
            _ => {}
        }
    }
    Some(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "vda: rd_bytes=45056 wr_bytes=2048 rd_operations=11 wr_operations=2\nide1-cd0: rd_bytes=0 wr_bytes=0 rd_operations=0 wr_operations=0";

    #[test]
    fn test_parse_block_stats() {
        let stats = parse_block_stats(REPLY, "vda").unwrap();
        assert_eq!(stats.rd_bytes, 45056);
        assert_eq!(stats.wr_bytes, 2048);
        assert_eq!(stats.rd_req, 11);
        assert_eq!(stats.wr_req, 2);
        assert_eq!(stats.errs, None);
    }

    #[test]
    fn test_parse_block_stats_unknown_device() {
        assert!(parse_block_stats(REPLY, "vdz").is_none());
        // "vd" must not match the "vda:" line
        assert!(parse_block_stats(REPLY, "vd").is_none());
    }

    #[test]
    fn test_parse_block_stats_errs_field() {
        let stats = parse_block_stats("vda: rd_bytes=1 wr_bytes=2 rd_operations=3 wr_operations=4 errs=5", "vda").unwrap();
        assert_eq!(stats.errs, Some(5));
    }
}
