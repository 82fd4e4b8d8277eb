//! ## Attributes
//!
//! Named tunables exposed for get/set by the owning host, plus the
//! read-only values derived from the driver configuration.
//!

use crate::error::Error;

/// Attribute value meaning "off" for the boolean tunables.
pub const ATTR_VAL_OFF: i32 = 0;
/// Attribute value meaning "on" for the boolean tunables.
pub const ATTR_VAL_ON: i32 = 1;
/// Read mode value selecting buffered-reader EOF emulation.
pub const ATTR_VAL_FREAD: i32 = 1;
/// Read mode value selecting plain read semantics.
pub const ATTR_VAL_READ: i32 = 2;

/// ### Attribute
///
/// The closed set of attribute ids understood by [`SET_ATTRIBUTE` and
/// `GET_ATTRIBUTE`](crate::ControlRequest). The first seven are writable;
/// the rest are derived read-only values.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Attribute {
    /// Run the matching abort procedure when a bulk transfer fails
    AutoAbortOnError = 0,
    /// EOF emulation style, [`ATTR_VAL_FREAD`] or [`ATTR_VAL_READ`]
    ReadMode = 1,
    /// Per-call timeout in milliseconds
    Timeout = 2,
    /// Count of currently attached instruments (read-only)
    NumInstruments = 3,
    /// Registry slot capacity (read-only)
    MinorNumbers = 4,
    /// Size of the per-session staging buffer (read-only)
    SizeIoBuffer = 5,
    /// Default per-call timeout in milliseconds (read-only)
    DefaultTimeout = 6,
    /// Whether debug logging is currently enabled (read-only)
    DebugMode = 7,
    /// Integer driver version code (read-only)
    Version = 8,
    /// Ask the device to terminate IN transfers on the term character
    TermCharEnabled = 9,
    /// The termination character, 0..=255
    TermChar = 10,
    /// Append a newline to each complete read
    AddNlOnRead = 11,
    /// Strip a trailing newline from each write
    RemNlOnWrite = 12,
}

impl Attribute {
    pub fn is_writable(self) -> bool {
        use Attribute::*;
        matches!(
            self,
            AutoAbortOnError | ReadMode | Timeout | TermCharEnabled | TermChar
                | AddNlOnRead | RemNlOnWrite
        )
    }
}

impl TryFrom<i32> for Attribute {
    type Error = Error;

    fn try_from(id: i32) -> Result<Attribute, Error> {
        use Attribute::*;
        Ok(match id {
            0 => AutoAbortOnError,
            1 => ReadMode,
            2 => Timeout,
            3 => NumInstruments,
            4 => MinorNumbers,
            5 => SizeIoBuffer,
            6 => DefaultTimeout,
            7 => DebugMode,
            8 => Version,
            9 => TermCharEnabled,
            10 => TermChar,
            11 => AddNlOnRead,
            12 => RemNlOnWrite,
            other => return Err(Error::UnknownAttribute(other)),
        })
    }
}

/// ### Attribute Descriptor
///
/// A tagged pair of attribute id and signed 32-bit value, as exchanged
/// by the attribute get/set control requests.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub attribute: Attribute,
    pub value: i32,
}

impl AttributeDescriptor {
    pub fn new(attribute: Attribute, value: i32) -> AttributeDescriptor {
        AttributeDescriptor { attribute, value }
    }
}

/// ### Read Mode
///
/// Selects the EOF contract of [`Session::read`](crate::Session::read).
/// Under `Fread` a short read arms a one-shot zero-length result so
/// buffered readers that iterate until a short result stop retrying.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    #[default]
    Fread,
    Read,
}

impl ReadMode {
    pub fn from_value(value: i32) -> Option<ReadMode> {
        match value {
            ATTR_VAL_FREAD => Some(ReadMode::Fread),
            ATTR_VAL_READ => Some(ReadMode::Read),
            _ => None,
        }
    }

    pub fn value(self) -> i32 {
        match self {
            ReadMode::Fread => ATTR_VAL_FREAD,
            ReadMode::Read => ATTR_VAL_READ,
        }
    }
}

/// Interpret an on/off attribute value.
pub(crate) fn as_switch(attribute: Attribute, value: i32) -> Result<bool, Error> {
    match value {
        ATTR_VAL_OFF => Ok(false),
        ATTR_VAL_ON => Ok(true),
        _ => Err(Error::InvalidAttributeValue { attribute, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_ids_round_trip() {
        for id in 0..=12 {
            let attribute = Attribute::try_from(id).unwrap();
            assert_eq!(attribute as i32, id);
        }
        assert!(matches!(
            Attribute::try_from(13),
            Err(Error::UnknownAttribute(13))
        ));
        assert!(matches!(
            Attribute::try_from(-1),
            Err(Error::UnknownAttribute(-1))
        ));
    }

    #[test]
    fn switch_values() {
        assert!(!as_switch(Attribute::AutoAbortOnError, ATTR_VAL_OFF).unwrap());
        assert!(as_switch(Attribute::AutoAbortOnError, ATTR_VAL_ON).unwrap());
        assert!(as_switch(Attribute::AutoAbortOnError, 2).is_err());
    }

    #[test]
    fn read_mode_values() {
        assert_eq!(ReadMode::from_value(ATTR_VAL_FREAD), Some(ReadMode::Fread));
        assert_eq!(ReadMode::from_value(ATTR_VAL_READ), Some(ReadMode::Read));
        assert_eq!(ReadMode::from_value(0), None);
        assert_eq!(ReadMode::default(), ReadMode::Fread);
    }
}
