//! ## Registry
//!
//! Process-wide bookkeeping of attached instruments. Each instrument
//! occupies one minor number; number 0 is reserved for the registry
//! itself, whose read surface is the enumeration listing.
//!

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::constants::misc::{MAX_INSTRUMENT_STRING, MINOR_NUMBERS};
use crate::error::{Error, Result};
use crate::io::UsbIo;
use crate::session::Session;
use crate::types::{DeviceAddr, InstrumentInfo};

pub(crate) struct Slot<T: UsbIo> {
    pub session: Arc<Mutex<Session<T>>>,
    pub info: InstrumentInfo,
    pub address: DeviceAddr,
}

/// ### Registry
///
/// Maps minor numbers to attached sessions. Mutated only at attach and
/// disconnect; the instrument count is shared with every session so the
/// NumInstruments attribute reflects the registry.
///
pub(crate) struct Registry<T: UsbIo> {
    slots: Vec<Option<Slot<T>>>,
    count: Arc<AtomicUsize>,
}

impl<T: UsbIo> Registry<T> {
    pub fn new() -> Registry<T> {
        Registry {
            slots: (0..MINOR_NUMBERS).map(|_| None).collect(),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared attached-instrument counter, handed to new sessions.
    pub fn count_handle(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }

    pub fn num_instruments(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Claim the first free minor number for a freshly opened session.
    pub fn insert(
        &mut self,
        session: Session<T>,
        info: InstrumentInfo,
        address: DeviceAddr,
    ) -> Result<u8> {
        let minor = self.slots[1..]
            .iter()
            .position(Option::is_none)
            .map(|n| n + 1)
            .ok_or(Error::NoFreeMinor)?;
        self.slots[minor] = Some(Slot {
            session: Arc::new(Mutex::new(session)),
            info,
            address,
        });
        self.count.fetch_add(1, Ordering::Relaxed);
        log::debug!("instrument attached at minor number {minor}");
        Ok(minor as u8)
    }

    /// Free the slot of a disconnected instrument.
    pub fn remove(&mut self, minor: u8) -> Result<()> {
        let slot = self
            .slots
            .get_mut(minor as usize)
            .and_then(Option::take)
            .ok_or(Error::NoSuchInstrument(minor))?;
        drop(slot);
        self.count.fetch_sub(1, Ordering::Relaxed);
        log::debug!("instrument at minor number {minor} detached");
        Ok(())
    }

    pub fn session(&self, minor: u8) -> Result<Arc<Mutex<Session<T>>>> {
        self.slot(minor).map(|slot| slot.session.clone())
    }

    /// Identification strings of the instrument at `minor`, each cut
    /// off beyond [`MAX_INSTRUMENT_STRING`] bytes.
    pub fn instrument_data(&self, minor: u8) -> Result<InstrumentInfo> {
        let info = &self.slot(minor)?.info;
        Ok(InstrumentInfo {
            manufacturer: truncated(&info.manufacturer),
            product: truncated(&info.product),
            serial_number: truncated(&info.serial_number),
        })
    }

    pub fn contains_address(&self, address: DeviceAddr) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.address == address)
    }

    /// Snapshot the attached instruments as the enumeration listing.
    pub fn listing(&self) -> EnumerationReader {
        let mut table = String::from("Minor Number\tManufacturer\tProduct\tSerial Number\n");
        for (minor, slot) in self.slots.iter().enumerate().skip(1) {
            if let Some(slot) = slot {
                table.push_str(&format!(
                    "{minor:03}\t{}\t{}\t{}\n",
                    slot.info.manufacturer, slot.info.product, slot.info.serial_number
                ));
            }
        }
        EnumerationReader {
            table: table.into_bytes(),
            consumed: false,
        }
    }

    fn slot(&self, minor: u8) -> Result<&Slot<T>> {
        self.slots
            .get(minor as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::NoSuchInstrument(minor))
    }
}

/// ### Enumeration Reader
///
/// Read surface of minor number 0. The listing must be taken with one
/// read; once read, further reads report end of file until the reader
/// is obtained anew. Writing to it is not permitted.
///
pub struct EnumerationReader {
    table: Vec<u8>,
    consumed: bool,
}

impl EnumerationReader {
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        if self.consumed {
            return 0;
        }
        self.consumed = true;
        let n = self.table.len().min(out.len());
        out[..n].copy_from_slice(&self.table[..n]);
        n
    }

    pub fn write(&mut self, _data: &[u8]) -> Result<usize> {
        Err(Error::EnumerationReadOnly)
    }
}

fn truncated(s: &str) -> String {
    if s.len() <= MAX_INSTRUMENT_STRING {
        return s.to_string();
    }
    let mut end = MAX_INSTRUMENT_STRING;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
