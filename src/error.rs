//! ## USBTMC Errors
//!
//! The errors used throughout the crate.
//!

use crate::attr::Attribute;

/// Broad classification of a failure, independent of the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An underlying bulk or control call failed (timeout, stall, disconnect)
    Transport,
    /// The device answered with an unexpected status byte, or a drain loop gave up
    Protocol,
    /// Bad attribute, value, minor number or control request
    InvalidArgument,
    /// The operation has no meaning for instruments
    NotSupported,
    /// Out of sessions or memory
    Resource,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("usb transport error: {0}")]
    Transport(#[from] rusb::Error),
    #[error("{request} returned status {status:#04x}")]
    UnexpectedStatus { request: &'static str, status: u8 },
    #[error("{request} still pending after {cycles} status checks")]
    StillPending { request: &'static str, cycles: usize },
    #[error("could not clear device buffer within {cycles} read cycles")]
    DrainLimit { cycles: usize },
    #[error("bulk in transfer shorter than a message header ({actual} bytes)")]
    ShortInHeader { actual: usize },
    #[error("no matching usbtmc device found")]
    DeviceNotFound,
    #[error("device is not compatible with USBTMC")]
    DeviceIncompatible,
    #[error("specified interface not found")]
    InterfaceNotFound,
    #[error("specified interface setting not found")]
    InterfaceSettingNotFound,
    #[error("bulk out endpoint not found")]
    BulkOutEndpointNotFound,
    #[error("bulk in endpoint not found")]
    BulkInEndpointNotFound,
    #[error("device is already attached")]
    AlreadyAttached,
    #[error("no free minor number available")]
    NoFreeMinor,
    #[error("no instrument attached at minor number {0}")]
    NoSuchInstrument(u8),
    #[error("unknown attribute id {0}")]
    UnknownAttribute(i32),
    #[error("value {value} is not valid for attribute {attribute:?}")]
    InvalidAttributeValue { attribute: Attribute, value: i32 },
    #[error("attribute {0:?} is read-only")]
    ReadOnlyAttribute(Attribute),
    #[error("{0} must be dispatched through the registry")]
    RegistryRequest(&'static str),
    #[error("seeking is not meaningful on an instrument")]
    SeekNotSupported,
    #[error("the enumeration listing does not accept writes")]
    EnumerationReadOnly,
}

impl Error {
    /// Map a concrete failure onto its broad classification.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            Transport(_) => ErrorKind::Transport,
            UnexpectedStatus { .. } | StillPending { .. } | DrainLimit { .. }
            | ShortInHeader { .. } => ErrorKind::Protocol,
            DeviceNotFound | DeviceIncompatible | InterfaceNotFound
            | InterfaceSettingNotFound | BulkOutEndpointNotFound
            | BulkInEndpointNotFound => ErrorKind::Transport,
            AlreadyAttached | NoFreeMinor => ErrorKind::Resource,
            NoSuchInstrument(_) | UnknownAttribute(_) | InvalidAttributeValue { .. }
            | ReadOnlyAttribute(_) | RegistryRequest(_) => ErrorKind::InvalidArgument,
            SeekNotSupported | EnumerationReadOnly => ErrorKind::NotSupported,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
