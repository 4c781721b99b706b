//! USB hot-plug.
//!
//! Host devices are addressed either exactly (bus, device) or by a
//! (vendor, product) match pattern. The address shapes are distinct types
//! so an ill-formed address cannot be constructed.

use crate::errors::MonitorResult;
use crate::ops::check_reply;
use crate::session::Session;
use crate::session::dispatch::Command;

/// Exact physical USB device address on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsbAddress {
    /// Host USB bus number.
    pub bus: u32,
    /// Device number on that bus.
    pub dev: u32,
}

/// Vendor/product match pattern for host USB devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsbMatch {
    /// USB vendor id.
    pub vendor: u16,
    /// USB product id.
    pub product: u16,
}

impl Session {
    /// Attach a host file as a USB mass-storage device.
    pub async fn add_usb_disk(&self, path: &str) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!("usb_add disk:{path}")))
            .await?;
        check_reply("usb_add", &reply)
    }

    /// Pass through the host USB device at an exact bus address.
    pub async fn add_usb_device(&self, addr: UsbAddress) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!(
                "usb_add host:{:03}.{:03}",
                addr.bus, addr.dev
            )))
            .await?;
        check_reply("usb_add", &reply)
    }

    /// Pass through the host USB device matching a vendor/product pair.
    ///
    /// Zero matching devices is [`crate::MonitorError::NotFound`]; two or
    /// more is [`crate::MonitorError::Ambiguous`] rather than silently
    /// picking one.
    pub async fn add_usb_device_match(&self, pattern: UsbMatch) -> MonitorResult<()> {
        let reply = self
            .dispatch(Command::new(format!(
                "usb_add host:{:04x}:{:04x}",
                pattern.vendor, pattern.product
            )))
            .await?;
        check_reply("usb_add", &reply)
    }
}
