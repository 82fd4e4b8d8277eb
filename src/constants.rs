//! ## Constants
//!
//! Various constants used throughout the crate.
//!

#[allow(unused)]
pub mod usb {
    /// The class code for usbtmc
    pub const USBTMC_CLASS_CODE: u8 = 0xFE;
    /// The subclass code for usbtmc
    pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;
}

#[allow(unused)]
pub mod misc {
    use std::time::Duration;

    /// Integer representation of the driver version code (1.1)
    pub const USBTMC_VERSION: i32 = 110;
    /// The default timeout applied to every bulk and control call
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    /// The size in bytes of a USBTMC header in a bulk transfer
    pub const HEADER_SIZE: usize = 12;
    /// Size of the per-session staging buffer for framed message chunks
    pub const SIZE_IO_BUFFER: usize = 2048;
    /// Headroom kept below the buffer size when requesting an IN transfer
    pub const ALIGNMENT_SLACK: usize = 3;
    /// Number of registry slots; slot 0 is reserved for the registry itself
    pub const MINOR_NUMBERS: usize = 16;
    /// Cap on bulk in read cycles while draining during clear/abort
    pub const MAX_READS_TO_CLEAR_BULK_IN: usize = 10;
    /// Default termination character (using NI-VISA default '\n')
    pub const DEFAULT_TERM_CHAR: u8 = b'\n';
    /// Instrument identification strings are cut off beyond this many bytes
    pub const MAX_INSTRUMENT_STRING: usize = 199;
}

#[allow(unused)]
pub mod usbtmc_status {
    /// Success
    pub const STATUS_SUCCESS: u8 = 0x01;
    /// The device has received a split transaction CHECK_STATUS request and the request is being processed
    pub const STATUS_PENDING: u8 = 0x02;
    /// Failure; an INITIATE_ABORT_BULK_IN answered this way has no transfer in progress
    pub const STATUS_FAILED: u8 = 0x81;
}

#[allow(unused)]
pub mod control_requests {
    pub const INITIATE_ABORT_BULK_OUT: u8 = 1;
    pub const CHECK_ABORT_BULK_OUT_STATUS: u8 = 2;
    pub const INITIATE_ABORT_BULK_IN: u8 = 3;
    pub const CHECK_ABORT_BULK_IN_STATUS: u8 = 4;
    pub const INITIATE_CLEAR: u8 = 5;
    pub const CHECK_CLEAR_STATUS: u8 = 6;
    pub const GET_CAPABILITIES: u8 = 7;
    pub const INDICATOR_PULSE: u8 = 64;
}

#[allow(unused)]
pub mod bulk_msg_id {
    pub const DEV_DEP_MSG_OUT: u8 = 1;
    pub const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
    pub const DEV_DEP_MSG_IN: u8 = 2;
}
