//! Migration control and the status state machine.
//!
//! The tracker holds no state of its own: every call re-queries the console
//! and re-parses. Transitions run INACTIVE → ACTIVE → {COMPLETED, ERROR,
//! CANCELLED}; polling after a terminal state simply re-observes it until a
//! new migration returns the console to ACTIVE.

use std::fmt;

use crate::errors::{MonitorError, MonitorResult};
use crate::ops::{check_reply, number_after};
use crate::session::Session;
use crate::session::dispatch::Command;

/// Where a migration currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Nothing running: never started, or a prior terminal state already
    /// consumed.
    Inactive,
    /// Transfer in progress.
    Active,
    /// Finished successfully.
    Completed,
    /// Failed.
    Error,
    /// Cancelled by request.
    Cancelled,
}

impl MigrationStatus {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Byte counters of an in-flight or completed migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationCounters {
    /// Bytes already moved to the destination.
    pub transferred: u64,
    /// Bytes still to move.
    pub remaining: u64,
    /// Total bytes in the transfer set.
    pub total: u64,
}

/// One observation of migration state.
///
/// Counters are present only for [`MigrationStatus::Active`] and
/// [`MigrationStatus::Completed`]; other states report them as unavailable
/// rather than stale or zero.
#[derive(Clone, Copy, Debug)]
pub struct MigrationInfo {
    /// Parsed state.
    pub status: MigrationStatus,
    /// Byte counters, when the state carries them.
    pub counters: Option<MigrationCounters>,
}

impl Session {
    /// Cap migration bandwidth, in MiB/s.
    pub async fn set_migration_speed(&self, mib_per_sec: u64) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("migrate_set_speed {mib_per_sec}m")))
            .await?;
        check_reply("migrate_set_speed", &reply)
    }

    /// Query and parse current migration state (`info migrate`).
    pub async fn migration_status(&self) -> MonitorResult<MigrationInfo> {
        let reply = self.dispatch(Command::new("info migrate")).await?;
        // The status text itself may contain words like "failed", so the
        // generic failure classifier does not apply here.
        if reply.text().contains("unknown command") {
            return Err(MonitorError::failed("info migrate", reply.text()));
        }
        parse_migration_info(reply.text())
    }

    /// Migrate to another host over TCP.
    ///
    /// With `background = false` the call blocks until the hypervisor
    /// completes the migration (under the configured foreground-migration
    /// bound); with `background = true` it returns once the migration is
    /// accepted, and progress is polled via [`Session::migration_status`].
    pub async fn migrate_to_host(
        &self,
        background: bool,
        hostname: &str,
        port: u16,
    ) -> MonitorResult<()> {
        self.migrate(background, &format!("tcp:{hostname}:{port}"))
            .await
    }

    /// Migrate into a command's stdin, optionally appending to `target`.
    pub async fn migrate_to_command(
        &self,
        background: bool,
        argv: &[&str],
        target: &str,
    ) -> MonitorResult<()> {
        let mut dest = format!("exec:{}", argv.join(" "));
        if !target.is_empty() && target != "-" {
            dest.push_str(" >> ");
            dest.push_str(target);
        }
        self.migrate(background, &format!("\"{dest}\"")).await
    }

    /// Migrate to a Unix socket on this host.
    pub async fn migrate_to_unix(&self, background: bool, unixfile: &str) -> MonitorResult<()> {
        self.migrate(background, &format!("unix:{unixfile}")).await
    }

    /// Cancel a running migration. A no-op success when none is active.
    pub async fn migrate_cancel(&self) -> MonitorResult<()> {
        let reply = self.dispatch(Command::new("migrate_cancel")).await?;
        check_reply("migrate_cancel", &reply)
    }

    async fn migrate(&self, background: bool, dest: &str) -> MonitorResult<()> {
        let line = if background {
            format!("migrate -d {dest}")
        } else {
            format!("migrate {dest}")
        };
        let mut cmd = Command::new(line);
        if !background {
            cmd = cmd.migration_wait();
        }
        tracing::debug!(background, dest = %dest, "starting migration");
        let reply = self.dispatch(cmd).await?;
        check_reply("migrate", &reply)
    }
}

fn parse_migration_info(text: &str) -> MonitorResult<MigrationInfo> {
    let Some(word) = text
        .lines()
        .find_map(|l| l.trim().strip_prefix("Migration status: "))
    else {
        // No status line at all: no migration has ever run.
        return Ok(MigrationInfo {
            status: MigrationStatus::Inactive,
            counters: None,
        });
    };
    let status = MigrationStatus::parse(word.trim()).ok_or_else(|| {
        MonitorError::protocol(format!("unexpected migration status '{}'", word.trim()))
    })?;
    let counters = match status {
        MigrationStatus::Active => Some(parse_counters(text).ok_or_else(|| {
            MonitorError::protocol("migration active but transfer counters missing")
        })?),
        MigrationStatus::Completed => parse_counters(text),
        _ => None,
    };
    Ok(MigrationInfo { status, counters })
}

/// The console reports counters in kbytes; scaled to bytes here. Rounding
/// in the console can briefly put transferred past total, so total is
/// clamped up to keep `transferred <= total`.
fn parse_counters(text: &str) -> Option<MigrationCounters> {
    let transferred = number_after(text, "transferred ram: ")? * 1024;
    let remaining = number_after(text, "remaining ram: ")? * 1024;
    let total = number_after(text, "total ram: ")? * 1024;
    Some(MigrationCounters {
        transferred,
        remaining,
        total: total.max(transferred),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_status_line_is_inactive() {
        let info = parse_migration_info("").unwrap();
        assert_eq!(info.status, MigrationStatus::Inactive);
        assert!(info.counters.is_none());
    }

    #[test]
    fn test_parse_active_with_counters() {
        let text = "Migration status: active\ntransferred ram: 1024 kbytes\nremaining ram: 2048 kbytes\ntotal ram: 3072 kbytes";
        let info = parse_migration_info(text).unwrap();
        assert_eq!(info.status, MigrationStatus::Active);
        let c = info.counters.unwrap();
        assert_eq!(c.transferred, 1024 * 1024);
        assert_eq!(c.remaining, 2048 * 1024);
        assert_eq!(c.total, 3072 * 1024);
        assert!(c.transferred <= c.total);
    }

    #[test]
    fn test_parse_active_without_counters_is_protocol_error() {
        let err = parse_migration_info("Migration status: active").unwrap_err();
        assert!(matches!(err, MonitorError::Protocol(_)));
    }

    #[test]
    fn test_parse_completed_tolerates_missing_counters() {
        let info = parse_migration_info("Migration status: completed").unwrap();
        assert_eq!(info.status, MigrationStatus::Completed);
        assert!(info.counters.is_none());
    }

    #[test]
    fn test_parse_clamps_rounding_overshoot() {
        let text = "Migration status: active\ntransferred ram: 3073 kbytes\nremaining ram: 0 kbytes\ntotal ram: 3072 kbytes";
        let c = parse_migration_info(text).unwrap().counters.unwrap();
        assert!(c.transferred <= c.total);
    }

    #[test]
    fn test_parse_unknown_status_word() {
        let err = parse_migration_info("Migration status: sideways").unwrap_err();
        assert!(matches!(err, MonitorError::Protocol(_)));
    }

    #[test]
    fn test_parse_cancelled() {
        let info = parse_migration_info("Migration status: cancelled").unwrap();
        assert_eq!(info.status, MigrationStatus::Cancelled);
        assert!(info.counters.is_none());
    }
}
