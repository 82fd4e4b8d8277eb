//! ## Session
//!
//! Per-instrument context and the byte-stream surface built on top of
//! it. A session owns the claimed USB handle, the bulk endpoint pair,
//! the transaction tag state and a scratch buffer for staging one
//! framed chunk. Operations take `&mut self`, so a host that shares a
//! session across threads wraps it in a mutex and thereby serializes
//! calls.
//!

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::attr::{self, Attribute, AttributeDescriptor, ReadMode, ATTR_VAL_OFF, ATTR_VAL_ON};
use crate::communication::{bulk, control};
use crate::constants::misc::{
    DEFAULT_TERM_CHAR, DEFAULT_TIMEOUT, MINOR_NUMBERS, SIZE_IO_BUFFER, USBTMC_VERSION,
};
use crate::error::{Error, Result};
use crate::io::UsbIo;
use crate::types::{BulkEndpoints, Capabilities, InstrumentInfo};

/// ### Control Request
///
/// The out-of-band operations a session accepts, one variant per
/// request with its typed argument.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    SetAttribute(AttributeDescriptor),
    GetAttribute(Attribute),
    ClearOutHalt,
    ClearInHalt,
    Clear,
    AbortBulkOut,
    AbortBulkIn,
    GetCapabilities,
    IndicatorPulse,
    ResetConf,
    /// Identification strings of the instrument at the given minor
    /// number; resolved by the registry, not by a session.
    InstrumentData(u8),
}

/// Reply carrying whatever a [`ControlRequest`] produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    Attribute(AttributeDescriptor),
    Capabilities(Capabilities),
    Instrument(InstrumentInfo),
}

/// ### Session
///
/// State of one attached instrument. Created at attach time, destroyed
/// at disconnect; the scratch buffer lives and dies with it.
///
pub struct Session<T: UsbIo> {
    pub(crate) io: T,
    pub(crate) bulk_out_addr: u8,
    pub(crate) bulk_in_addr: u8,
    pub(crate) bulk_in_max_packet: u16,
    pub(crate) btag: u8,
    pub(crate) last_out_btag: u8,
    pub(crate) last_in_btag: u8,
    pub(crate) timeout: Duration,
    pub(crate) term_char_enabled: bool,
    pub(crate) term_char: u8,
    pub(crate) add_nl_on_read: bool,
    pub(crate) rem_nl_on_write: bool,
    pub(crate) auto_abort: bool,
    pub(crate) read_mode: ReadMode,
    pub(crate) eof: bool,
    pub(crate) io_buffer: Box<[u8]>,
    pub(crate) instrument_count: Arc<AtomicUsize>,
}

impl<T: UsbIo> Session<T> {
    /// Build a session over resolved endpoints with default settings.
    pub fn new(io: T, endpoints: &BulkEndpoints, instrument_count: Arc<AtomicUsize>) -> Session<T> {
        Session {
            io,
            bulk_out_addr: endpoints.bulk_out.address,
            bulk_in_addr: endpoints.bulk_in.address,
            bulk_in_max_packet: endpoints.bulk_in.max_packet_size,
            btag: 1,
            last_out_btag: 0,
            last_in_btag: 0,
            timeout: DEFAULT_TIMEOUT,
            term_char_enabled: false,
            term_char: DEFAULT_TERM_CHAR,
            add_nl_on_read: false,
            rem_nl_on_write: false,
            auto_abort: false,
            read_mode: ReadMode::Fread,
            eof: false,
            io_buffer: vec![0u8; SIZE_IO_BUFFER].into_boxed_slice(),
            instrument_count,
        }
    }

    /// Hand out the current transaction tag and advance it, wrapping
    /// past 255 back to 1. The tag is recorded for a later abort of
    /// the OUT transaction it goes out with.
    pub(crate) fn next_btag(&mut self) -> u8 {
        let tag = self.btag;
        self.btag = self.btag.wrapping_add(1);
        if self.btag == 0 {
            self.btag = 1;
        }
        self.last_out_btag = tag;
        tag
    }

    /// ### Write
    ///
    /// Deliver a command message to the instrument. Returns the number
    /// of bytes consumed from `data`.
    ///
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        bulk::write_message(self, data)
    }

    /// ### Read
    ///
    /// Retrieve a response message into `out`. Returns the number of
    /// bytes read; zero signals EOF under fread mode.
    ///
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        bulk::read_message(self, out)
    }

    /// Random access has no meaning on an instrument.
    pub fn seek(&mut self, _position: u64) -> Result<u64> {
        Err(Error::SeekNotSupported)
    }

    /// ### Control
    ///
    /// Dispatch an out-of-band operation.
    ///
    pub fn control(&mut self, request: ControlRequest) -> Result<ControlReply> {
        match request {
            ControlRequest::SetAttribute(descriptor) => {
                self.set_attribute(descriptor)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::GetAttribute(attribute) => {
                Ok(ControlReply::Attribute(self.get_attribute(attribute)))
            }
            ControlRequest::ClearOutHalt => {
                control::clear_out_halt(self)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::ClearInHalt => {
                control::clear_in_halt(self)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::Clear => {
                control::clear(self)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::AbortBulkOut => {
                control::abort_bulk_out(self)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::AbortBulkIn => {
                control::abort_bulk_in(self)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::GetCapabilities => {
                Ok(ControlReply::Capabilities(control::get_capabilities(self)?))
            }
            ControlRequest::IndicatorPulse => {
                control::indicator_pulse(self)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::ResetConf => {
                control::reset_configuration(self)?;
                Ok(ControlReply::Done)
            }
            ControlRequest::InstrumentData(_) => Err(Error::RegistryRequest("INSTRUMENT_DATA")),
        }
    }

    /// ### Set Attribute
    ///
    /// Change one of the writable tunables. Unknown values and
    /// read-only attributes are rejected.
    ///
    pub fn set_attribute(&mut self, descriptor: AttributeDescriptor) -> Result<()> {
        let AttributeDescriptor { attribute, value } = descriptor;
        match attribute {
            Attribute::AutoAbortOnError => {
                self.auto_abort = attr::as_switch(attribute, value)?;
            }
            Attribute::ReadMode => {
                self.read_mode = ReadMode::from_value(value)
                    .ok_or(Error::InvalidAttributeValue { attribute, value })?;
            }
            Attribute::Timeout => {
                if value < 0 {
                    return Err(Error::InvalidAttributeValue { attribute, value });
                }
                self.timeout = Duration::from_millis(value as u64);
            }
            Attribute::TermCharEnabled => {
                self.term_char_enabled = attr::as_switch(attribute, value)?;
            }
            Attribute::TermChar => {
                if !(0..=255).contains(&value) {
                    return Err(Error::InvalidAttributeValue { attribute, value });
                }
                self.term_char = value as u8;
            }
            Attribute::AddNlOnRead => {
                self.add_nl_on_read = attr::as_switch(attribute, value)?;
            }
            Attribute::RemNlOnWrite => {
                self.rem_nl_on_write = attr::as_switch(attribute, value)?;
            }
            read_only => return Err(Error::ReadOnlyAttribute(read_only)),
        }
        Ok(())
    }

    /// ### Get Attribute
    ///
    /// Read any attribute, writable or derived.
    ///
    pub fn get_attribute(&self, attribute: Attribute) -> AttributeDescriptor {
        let value = match attribute {
            Attribute::AutoAbortOnError => switch_value(self.auto_abort),
            Attribute::ReadMode => self.read_mode.value(),
            Attribute::Timeout => millis_value(self.timeout),
            Attribute::NumInstruments => {
                self.instrument_count.load(Ordering::Relaxed) as i32
            }
            Attribute::MinorNumbers => MINOR_NUMBERS as i32,
            Attribute::SizeIoBuffer => SIZE_IO_BUFFER as i32,
            Attribute::DefaultTimeout => millis_value(DEFAULT_TIMEOUT),
            Attribute::DebugMode => switch_value(log::log_enabled!(log::Level::Debug)),
            Attribute::Version => USBTMC_VERSION,
            Attribute::TermCharEnabled => switch_value(self.term_char_enabled),
            Attribute::TermChar => self.term_char as i32,
            Attribute::AddNlOnRead => switch_value(self.add_nl_on_read),
            Attribute::RemNlOnWrite => switch_value(self.rem_nl_on_write),
        };
        AttributeDescriptor { attribute, value }
    }

    /// Set a new timeout for every bulk and control call.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Clear the device's input and output buffers.
    pub fn clear(&mut self) -> Result<()> {
        control::clear(self)
    }

    /// Abort the most recent bulk out transfer.
    pub fn abort_bulk_out(&mut self) -> Result<()> {
        control::abort_bulk_out(self)
    }

    /// Abort the most recent bulk in transfer.
    pub fn abort_bulk_in(&mut self) -> Result<()> {
        control::abort_bulk_in(self)
    }

    /// Query the device's optional capabilities.
    pub fn get_capabilities(&mut self) -> Result<Capabilities> {
        control::get_capabilities(self)
    }

    /// Flash the device's activity indicator.
    pub fn indicator_pulse(&mut self) -> Result<()> {
        control::indicator_pulse(self)
    }

    pub fn clear_out_halt(&mut self) -> Result<()> {
        control::clear_out_halt(self)
    }

    pub fn clear_in_halt(&mut self) -> Result<()> {
        control::clear_in_halt(self)
    }

    pub fn reset_configuration(&mut self) -> Result<()> {
        control::reset_configuration(self)
    }
}

fn switch_value(on: bool) -> i32 {
    if on {
        ATTR_VAL_ON
    } else {
        ATTR_VAL_OFF
    }
}

fn millis_value(duration: Duration) -> i32 {
    duration.as_millis().try_into().unwrap_or(i32::MAX)
}
