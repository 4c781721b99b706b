//! Host network attach/detach.
//!
//! The network descriptor string is an opaque blob handed through to the
//! console unparsed; its format belongs to the configuration layer.

use crate::errors::MonitorResult;
use crate::ops::check_reply;
use crate::session::Session;
use crate::session::dispatch::Command;

impl Session {
    /// Attach a host network described by `netstr`.
    pub async fn add_host_network(&self, netstr: &str) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("host_net_add {netstr}")))
            .await?;
        check_reply("host_net_add", &reply)
    }

    /// Detach the host network `netname` on the given VLAN.
    pub async fn remove_host_network(&self, vlan: i32, netname: &str) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("host_net_remove {vlan} {netname}")))
            .await?;
        check_reply("host_net_remove", &reply)
    }
}
