//! ## Initialization
//!
//! A set of functions to help initialize a connection to an instrument.
//!

use crate::{
    constants::usb::*,
    error::{Error, Result},
    types::{BulkEndpoints, DeviceAddr, DeviceId, DeviceInfo, DeviceMode, Endpoint, InstrumentInfo},
};

use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Direction, TransferType, UsbContext};

/// ### Device Filter
///
/// Selects which of the attached USBTMC devices to open.
///
pub trait DeviceFilter {
    fn apply_filter<T: UsbContext>(
        &self,
        device: &Device<T>,
        device_desc: &DeviceDescriptor,
    ) -> bool;
}

/// Get first found TMC device
impl DeviceFilter for () {
    fn apply_filter<T: UsbContext>(
        &self,
        _device: &Device<T>,
        _device_desc: &DeviceDescriptor,
    ) -> bool {
        true
    }
}

/// Get TMC device by USB device address
impl DeviceFilter for DeviceAddr {
    fn apply_filter<T: UsbContext>(
        &self,
        device: &Device<T>,
        _device_desc: &DeviceDescriptor,
    ) -> bool {
        self.bus == device.bus_number() && self.device == device.address()
    }
}

/// Get TMC device by USB identifiers
impl DeviceFilter for DeviceId {
    fn apply_filter<T: UsbContext>(
        &self,
        _device: &Device<T>,
        device_desc: &DeviceDescriptor,
    ) -> bool {
        self.vendor_id == device_desc.vendor_id() && self.product_id == device_desc.product_id()
    }
}

/// Get TMC device by USB identifiers (idVendor, idProduct)
impl DeviceFilter for (u16, u16) {
    fn apply_filter<T: UsbContext>(
        &self,
        _device: &Device<T>,
        device_desc: &DeviceDescriptor,
    ) -> bool {
        self.0 == device_desc.vendor_id() && self.1 == device_desc.product_id()
    }
}

/// Get TMC device by info (both USB identifiers and address)
impl DeviceFilter for DeviceInfo {
    fn apply_filter<T: UsbContext>(
        &self,
        device: &Device<T>,
        device_desc: &DeviceDescriptor,
    ) -> bool {
        self.id.apply_filter(device, device_desc) && self.address.apply_filter(device, device_desc)
    }
}

/// Allow apply filter by reference
impl<T: DeviceFilter> DeviceFilter for &T {
    fn apply_filter<X: UsbContext>(
        &self,
        device: &Device<X>,
        device_desc: &DeviceDescriptor,
    ) -> bool {
        (**self).apply_filter(device, device_desc)
    }
}

fn is_tmc_device<T: UsbContext>(device: &Device<T>, device_desc: &DeviceDescriptor) -> bool {
    (0..device_desc.num_configurations()).any(move |config_no| {
        if let Ok(config_desc) = device.config_descriptor(config_no) {
            config_desc.interfaces().any(|interface| {
                interface.descriptors().any(|interface_desc| {
                    interface_desc.class_code() == USBTMC_CLASS_CODE
                        && interface_desc.sub_class_code() == USBTMC_SUBCLASS_CODE
                })
            })
        } else {
            false
        }
    })
}

/// ### List Devices
///
/// List all TMC devices visible through a libusb context.
///
pub fn list_devices<T: UsbContext>(context: &mut T) -> Result<Vec<DeviceInfo>> {
    Ok(context
        .devices()?
        .iter()
        .filter_map(|device| {
            let device_desc = device.device_descriptor().ok()?;
            if is_tmc_device(&device, &device_desc) {
                Some(DeviceInfo {
                    id: DeviceId {
                        vendor_id: device_desc.vendor_id(),
                        product_id: device_desc.product_id(),
                    },
                    address: DeviceAddr {
                        bus: device.bus_number(),
                        device: device.address(),
                    },
                })
            } else {
                None
            }
        })
        .collect())
}

/// ### Open Device
///
/// Open the first TMC device accepted by the filter.
///
pub fn open_device<T: UsbContext>(
    context: &mut T,
    filter: impl DeviceFilter,
) -> Result<(Device<T>, DeviceHandle<T>)> {
    let devices = context.devices()?;

    for device in devices.iter() {
        if let Ok(device_desc) = device.device_descriptor() {
            if is_tmc_device(&device, &device_desc) && filter.apply_filter(&device, &device_desc) {
                if let Ok(handle) = device.open() {
                    return Ok((device, handle));
                }
            }
        }
    }

    Err(Error::DeviceNotFound)
}

/// ### Get USBTMC Mode
///
/// Get the device mode (configuration, interface and interface setting) that is compatible with USBTMC.
///
pub fn get_usbtmc_mode(device: &Device<Context>) -> Result<DeviceMode> {
    let device_desc = device.device_descriptor()?;

    for n in 0..device_desc.num_configurations() {
        let config_desc = device.config_descriptor(n)?;
        for interface in config_desc.interfaces() {
            for interface_desc in interface.descriptors() {
                if interface_desc.class_code() == USBTMC_CLASS_CODE
                    && interface_desc.sub_class_code() == USBTMC_SUBCLASS_CODE
                {
                    return Ok(DeviceMode {
                        config_number: config_desc.number(),
                        interface_number: interface_desc.interface_number(),
                        setting_number: interface_desc.setting_number(),
                        has_kernel_driver: false,
                    });
                }
            }
        }
    }

    Err(Error::DeviceIncompatible)
}

/// ### Detach Kernel Driver
///
/// If the interface uses a kernel driver, detach it for the duration of the session.
///
pub fn detach_kernel_driver(
    mode: &mut DeviceMode,
    handle: &mut DeviceHandle<Context>,
) -> Result<()> {
    mode.has_kernel_driver = match handle.kernel_driver_active(mode.interface_number) {
        Ok(true) => {
            handle.detach_kernel_driver(mode.interface_number)?;
            true
        }
        _ => false,
    };

    Ok(())
}

/// ### Get Endpoints
///
/// Resolve the bulk endpoint pair from the interface's current setting,
/// taking the first BULK endpoint of each direction.
///
pub fn get_endpoints(mode: &DeviceMode, device: &Device<Context>) -> Result<BulkEndpoints> {
    let config_desc = device.config_descriptor(mode.config_number - 1)?;
    let interface = config_desc
        .interfaces()
        .find(|interface| interface.number() == mode.interface_number)
        .ok_or(Error::InterfaceNotFound)?;
    let interface_desc = interface
        .descriptors()
        .find(|desc| desc.setting_number() == mode.setting_number)
        .ok_or(Error::InterfaceSettingNotFound)?;

    let mut bulk_out: Option<Endpoint> = None;
    let mut bulk_in: Option<Endpoint> = None;
    for endpoint in interface_desc.endpoint_descriptors() {
        if endpoint.transfer_type() != TransferType::Bulk {
            continue;
        }
        let found = Endpoint {
            address: endpoint.address(),
            max_packet_size: endpoint.max_packet_size(),
            transfer_type: endpoint.transfer_type(),
            direction: endpoint.direction(),
        };
        match endpoint.direction() {
            Direction::Out if bulk_out.is_none() => bulk_out = Some(found),
            Direction::In if bulk_in.is_none() => bulk_in = Some(found),
            _ => {}
        }
    }

    Ok(BulkEndpoints {
        bulk_out: bulk_out.ok_or(Error::BulkOutEndpointNotFound)?,
        bulk_in: bulk_in.ok_or(Error::BulkInEndpointNotFound)?,
    })
}

/// ### Instrument Info
///
/// Read the instrument's identification strings. Missing string
/// descriptors come back empty rather than failing the attach.
///
pub fn instrument_info(
    device: &Device<Context>,
    handle: &DeviceHandle<Context>,
) -> InstrumentInfo {
    let descriptor = match device.device_descriptor() {
        Ok(descriptor) => descriptor,
        Err(_) => return InstrumentInfo::default(),
    };
    InstrumentInfo {
        manufacturer: handle
            .read_manufacturer_string_ascii(&descriptor)
            .unwrap_or_default(),
        product: handle
            .read_product_string_ascii(&descriptor)
            .unwrap_or_default(),
        serial_number: handle
            .read_serial_number_string_ascii(&descriptor)
            .unwrap_or_default(),
    }
}
