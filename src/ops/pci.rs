//! PCI hot-plug: host device passthrough, disk and NIC attach, removal.
//!
//! Attach operations return the guest-assigned address parsed out of the
//! console reply; success is never reported with an incomplete address.

use std::fmt;

use crate::errors::{MonitorError, MonitorResult};
use crate::ops::{check_reply, number_after};
use crate::session::Session;
use crate::session::dispatch::Command;

/// Guest PCI address assigned by the hypervisor on attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PciAddress {
    /// PCI domain.
    pub domain: u32,
    /// Bus within the domain.
    pub bus: u32,
    /// Slot on the bus.
    pub slot: u32,
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:02x}:{:02x}", self.domain, self.bus, self.slot)
    }
}

/// Host PCI device address for passthrough, including the function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostPciAddress {
    /// PCI domain on the host.
    pub domain: u32,
    /// Host bus.
    pub bus: u32,
    /// Host slot.
    pub slot: u32,
    /// Function within the slot.
    pub function: u32,
}

impl fmt::Display for HostPciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.function
        )
    }
}

impl Session {
    /// Pass a host PCI device through to the guest.
    ///
    /// The console command has no syntax for a host PCI domain, so only
    /// domain 0 devices can be passed through.
    pub async fn add_pci_host_device(&self, host: HostPciAddress) -> MonitorResult<PciAddress> {
        if host.domain != 0 {
            return Err(MonitorError::failed(
                "pci_add host",
                format!("host PCI domain {:04x} cannot be addressed", host.domain),
            ));
        }
        self.pci_add(
            "pci_add host",
            format!(
                "pci_add pci_addr=auto host host={:02x}:{:02x}.{:x}",
                host.bus, host.slot, host.function
            ),
        )
        .await
    }

    /// Attach a disk image as a PCI storage device on the given bus kind
    /// (e.g. `virtio`, `scsi`).
    pub async fn add_pci_disk(&self, path: &str, bus: &str) -> MonitorResult<PciAddress> {
        self.pci_add(
            "pci_add storage",
            format!("pci_add pci_addr=auto storage file={path},if={bus}"),
        )
        .await
    }

    /// Attach a NIC described by an opaque configuration string.
    pub async fn add_pci_network(&self, nicstr: &str) -> MonitorResult<PciAddress> {
        self.pci_add("pci_add nic", format!("pci_add pci_addr=auto nic {nicstr}"))
            .await
    }

    /// Detach the guest PCI device at `addr`. An address the guest does not
    /// have yields [`MonitorError::NotFound`].
    pub async fn remove_pci_device(&self, addr: PciAddress) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!(
                "pci_del pci_addr={:04x}:{:02x}:{:02x}",
                addr.domain, addr.bus, addr.slot
            )))
            .await?;
        check_reply("pci_del", &reply)
    }

    async fn pci_add(&self, op: &'static str, line: String) -> MonitorResult<PciAddress> {
        let reply = self.dispatch(Command::new(line)).await?;
        check_reply(op, &reply)?;
        parse_guest_address(reply.text()).ok_or_else(|| {
            MonitorError::failed(op, format!("no guest address in reply '{}'", reply.text()))
        })
    }
}

/// Attach replies carry `domain <d>, bus <b>, slot <s>` in decimal.
fn parse_guest_address(text: &str) -> Option<PciAddress> {
    let domain = number_after(text, "domain ")?;
    let bus = number_after(text, "bus ")?;
    let slot = number_after(text, "slot ")?;
    Some(PciAddress {
        domain: u32::try_from(domain).ok()?,
        bus: u32::try_from(bus).ok()?,
        slot: u32::try_from(slot).ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guest_address() {
        let addr = parse_guest_address("OK domain 0, bus 0, slot 4, function 0").unwrap();
        assert_eq!(
            addr,
            PciAddress {
                domain: 0,
                bus: 0,
                slot: 4
            }
        );
    }

    #[test]
    fn test_parse_guest_address_incomplete() {
        assert!(parse_guest_address("OK domain 0, bus 0").is_none());
        assert!(parse_guest_address("").is_none());
    }

    #[test]
    fn test_address_display() {
        let addr = PciAddress {
            domain: 0,
            bus: 0,
            slot: 10,
        };
        assert_eq!(addr.to_string(), "0000:00:0a");
        let host = HostPciAddress {
            domain: 0,
            bus: 6,
            slot: 18,
            function: 1,
        };
        assert_eq!(host.to_string(), "0000:06:12.1");
    }
}
