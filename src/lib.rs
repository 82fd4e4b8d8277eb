//! # USBTMC Host Driver
//!
//! Host-side driver for USB Test and Measurement Class instruments
//! (bInterfaceClass 0xFE, bInterfaceSubClass 0x03): oscilloscopes,
//! signal generators, multimeters and anything else speaking SCPI over
//! USBTMC.
//!
//! A [`UsbtmcDriver`] owns the registry of attached instruments. Each
//! instrument is a [`Session`] offering a byte-oriented surface where
//! `write` delivers a command, `read` retrieves a response, and
//! [`ControlRequest`] covers the out-of-band operations (clear, abort,
//! capability query, attribute get/set).
//!
//! ```no_run
//! use usbtmc_host::UsbtmcDriver;
//!
//! let mut driver = UsbtmcDriver::new()?;
//! let minor = driver.attach((0x0957, 0x0588))?;
//!
//! let session = driver.session(minor)?;
//! let mut session = session.lock().unwrap();
//! session.write(b"*IDN?\n")?;
//!
//! let mut response = [0u8; 256];
//! let n = session.read(&mut response)?;
//! println!("{}", String::from_utf8_lossy(&response[..n]));
//! # Ok::<(), usbtmc_host::Error>(())
//! ```
//!

mod attr;
mod constants;
mod error;
mod init;
mod io;
mod registry;
mod session;
mod types;
mod communication {
    pub mod bulk;
    pub mod control;
}

use std::sync::{Arc, Mutex};

use rusb::Context;

use registry::Registry;

pub use attr::{
    Attribute, AttributeDescriptor, ReadMode, ATTR_VAL_FREAD, ATTR_VAL_OFF, ATTR_VAL_ON,
    ATTR_VAL_READ,
};
pub use error::{Error, ErrorKind, Result};
pub use init::DeviceFilter;
pub use io::{UsbHandle, UsbIo};
pub use registry::EnumerationReader;
pub use session::{ControlReply, ControlRequest, Session};
pub use types::{
    BulkEndpoints, Capabilities, DeviceAddr, DeviceCapabilities, DeviceId, DeviceInfo, Endpoint,
    InstrumentInfo, InterfaceCapabilities,
};

/// ### UsbtmcDriver
///
/// Owns the libusb context and the registry mapping minor numbers to
/// attached instruments. Attach opens a device, claims its USBTMC
/// interface and assigns the first free minor number; detach releases
/// everything again.
///
pub struct UsbtmcDriver {
    context: Context,
    registry: Registry<UsbHandle>,
}

impl UsbtmcDriver {
    pub fn new() -> Result<UsbtmcDriver> {
        Ok(UsbtmcDriver {
            context: Context::new()?,
            registry: Registry::new(),
        })
    }

    /// ### Attach
    ///
    /// Open the first TMC device accepted by `filter` and register it.
    /// Returns the minor number the instrument now answers under.
    ///
    /// #### Arguments
    /// - `filter` -> which device to open: `()` for the first one found,
    ///   `(vid, pid)`, a [`DeviceAddr`] or a [`DeviceInfo`]
    ///
    pub fn attach(&mut self, filter: impl DeviceFilter) -> Result<u8> {
        // OPEN THE DEVICE
        // ==========
        let (device, mut handle) = init::open_device(&mut self.context, filter)?;
        let address = DeviceAddr {
            bus: device.bus_number(),
            device: device.address(),
        };
        if self.registry.contains_address(address) {
            return Err(Error::AlreadyAttached);
        }

        // GET THE DEVICE MODE AND ENDPOINTS
        // ==========
        let mut mode = init::get_usbtmc_mode(&device)?;
        init::detach_kernel_driver(&mut mode, &mut handle)?;
        let endpoints = init::get_endpoints(&mode, &device)?;

        // CONFIGURE DEVICE
        // ==========
        handle.set_active_configuration(mode.config_number)?;
        handle.claim_interface(mode.interface_number)?;
        handle.set_alternate_setting(mode.interface_number, mode.setting_number)?;

        // REGISTER THE SESSION
        // ==========
        let info = init::instrument_info(&device, &handle);
        log::debug!(
            "new device attached: {} / {} / {}",
            info.manufacturer,
            info.product,
            info.serial_number
        );
        let session = Session::new(
            UsbHandle::new(handle, mode),
            &endpoints,
            self.registry.count_handle(),
        );
        self.registry.insert(session, info, address)
    }

    /// ### Attach All
    ///
    /// Attach every TMC device on the bus that is not registered yet.
    /// Returns the minor numbers claimed. Devices that fail to open
    /// are skipped with a warning.
    ///
    pub fn attach_all(&mut self) -> Result<Vec<u8>> {
        let mut minors = Vec::new();
        for found in init::list_devices(&mut self.context)? {
            if self.registry.contains_address(found.address) {
                continue;
            }
            match self.attach(found) {
                Ok(minor) => minors.push(minor),
                Err(err) => log::warn!(
                    "skipping device {:04x}:{:04x}: {err}",
                    found.id.vendor_id,
                    found.id.product_id
                ),
            }
        }
        Ok(minors)
    }

    /// Release the instrument at `minor` and free its slot.
    pub fn detach(&mut self, minor: u8) -> Result<()> {
        self.registry.remove(minor)
    }

    /// The session of the instrument at `minor`. Calls on a session
    /// are serialized through the mutex.
    pub fn session(&self, minor: u8) -> Result<Arc<Mutex<Session<UsbHandle>>>> {
        self.registry.session(minor)
    }

    /// List all TMC devices currently visible on the bus.
    pub fn list_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        init::list_devices(&mut self.context)
    }

    /// Count of currently attached instruments.
    pub fn num_instruments(&self) -> usize {
        self.registry.num_instruments()
    }

    /// ### Enumeration
    ///
    /// Snapshot the attached instruments as a tab-separated listing,
    /// one row per instrument.
    ///
    pub fn enumeration(&self) -> EnumerationReader {
        self.registry.listing()
    }

    /// Identification strings of the instrument at `minor`.
    pub fn instrument_data(&self, minor: u8) -> Result<InstrumentInfo> {
        self.registry.instrument_data(minor)
    }

    /// ### Control
    ///
    /// Dispatch an out-of-band request against the instrument at
    /// `minor`. Registry-scoped requests resolve here; everything else
    /// is forwarded to the session.
    ///
    pub fn control(&self, minor: u8, request: ControlRequest) -> Result<ControlReply> {
        if let ControlRequest::InstrumentData(target) = request {
            return Ok(ControlReply::Instrument(
                self.registry.instrument_data(target)?,
            ));
        }
        let session = self.registry.session(minor)?;
        let mut session = session.lock().unwrap();
        session.control(request)
    }
}
