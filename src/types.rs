//! ## Types
//!
//! The different types used across the crate
//!

use rusb::{Direction, TransferType};

/// USB device address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAddr {
    /// USB bus number
    pub bus: u8,
    /// USB device number
    pub device: u8,
}

/// USB device identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceId {
    /// USB Id Vendor
    pub vendor_id: u16,
    /// USB Id Product
    pub product_id: u16,
}

/// USB device info
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub address: DeviceAddr,
}

/// ### Device Mode
///
/// A collection of the configuration, interface and interface number. Also if the interface has a kernel driver attached.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    /// The USB configuration number
    pub config_number: u8,
    /// The interface number specific to the configuration
    pub interface_number: u8,
    /// The setting number specific to the interface
    pub setting_number: u8,
    /// If the device has a kernel driver. Important for returning control to the OS (on Linux).
    pub has_kernel_driver: bool,
}

/// ### Endpoint
///
/// Properties of an endpoint.
///
#[derive(Clone, Copy, Debug)]
pub struct Endpoint {
    /// Address of the endpoint on the interface, direction bit included
    pub address: u8,
    /// The maximal size a packet can have on this endpoint
    pub max_packet_size: u16,
    /// The transfer type of the endpoint (for USBTMC, Bulk or Interrupt)
    pub transfer_type: TransferType,
    /// The direction of the endpoint (for USBTMC, In or Out)
    pub direction: Direction,
}

/// ### Bulk Endpoints
///
/// The mandatory endpoint pair of a USBTMC interface.
///
#[derive(Clone, Copy, Debug)]
pub struct BulkEndpoints {
    /// The mandatory BULK OUT endpoint
    pub bulk_out: Endpoint,
    /// The mandatory BULK IN endpoint
    pub bulk_in: Endpoint,
}

/// ### Instrument Info
///
/// Identification strings of an attached instrument, as read from its
/// string descriptors at attach time.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

bitflags::bitflags! {
    /// Interface capability bits from the GET_CAPABILITIES response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceCapabilities: u8 {
        const LISTEN_ONLY = 0b0000_0001;
        const TALK_ONLY = 0b0000_0010;
        const INDICATOR_PULSE = 0b0000_0100;
    }

    /// Device capability bits from the GET_CAPABILITIES response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceCapabilities: u8 {
        const BULK_IN_TERM_CHAR = 0b0000_0001;
    }
}

/// ### Capabilities
///
/// The four capability bytes of a GET_CAPABILITIES response, kept
/// verbatim. Decoded views are available for the bits this driver
/// cares about.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub interface_capabilities: u8,
    pub device_capabilities: u8,
    pub usb488_interface_capabilities: u8,
    pub usb488_device_capabilities: u8,
}

impl Capabilities {
    pub fn interface(&self) -> InterfaceCapabilities {
        InterfaceCapabilities::from_bits_truncate(self.interface_capabilities)
    }

    pub fn device(&self) -> DeviceCapabilities {
        DeviceCapabilities::from_bits_truncate(self.device_capabilities)
    }

    /// Can accept a control command for pulse
    pub fn accepts_indicator_pulse_request(&self) -> bool {
        self.interface().contains(InterfaceCapabilities::INDICATOR_PULSE)
    }

    /// Only sends data to the controller
    pub fn is_talk_only(&self) -> bool {
        self.interface().contains(InterfaceCapabilities::TALK_ONLY)
    }

    /// Only accepts data from the controller
    pub fn is_listen_only(&self) -> bool {
        self.interface().contains(InterfaceCapabilities::LISTEN_ONLY)
    }

    /// When returning data, it can terminate on a term character
    pub fn supports_bulk_in_term_char(&self) -> bool {
        self.device().contains(DeviceCapabilities::BULK_IN_TERM_CHAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_views() {
        let caps = Capabilities {
            interface_capabilities: 0b0000_0110,
            device_capabilities: 0b0000_0001,
            usb488_interface_capabilities: 0,
            usb488_device_capabilities: 0,
        };
        assert!(caps.accepts_indicator_pulse_request());
        assert!(caps.is_talk_only());
        assert!(!caps.is_listen_only());
        assert!(caps.supports_bulk_in_term_char());
    }
}
