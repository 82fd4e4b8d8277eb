//! ## Control
//!
//! The synchronous control-request procedures: the two abort dialogs,
//! device clear, and the single-shot requests. Each dialog follows the
//! initiate / poll / recover sequence the class defines, with every
//! drain loop bounded so a wedged device cannot hang the host.
//!

use rusb::{Direction, Recipient, RequestType};

use crate::constants::control_requests;
use crate::constants::misc::MAX_READS_TO_CLEAR_BULK_IN;
use crate::constants::usbtmc_status::{STATUS_FAILED, STATUS_PENDING, STATUS_SUCCESS};
use crate::error::{Error, Result};
use crate::io::UsbIo;
use crate::session::Session;
use crate::types::Capabilities;

fn endpoint_request_type() -> u8 {
    rusb::request_type(Direction::In, RequestType::Class, Recipient::Endpoint)
}

fn interface_request_type() -> u8 {
    rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface)
}

/// Read bulk in until the device sends a short packet. `cycles` carries
/// the running count across drain rounds of one procedure.
fn drain_bulk_in<T: UsbIo>(session: &mut Session<T>, cycles: &mut usize) -> Result<()> {
    let max_size = session.bulk_in_max_packet as usize;
    loop {
        let actual = session.io.bulk_in(
            session.bulk_in_addr,
            &mut session.io_buffer,
            session.timeout,
        )?;
        *cycles += 1;
        if actual < max_size {
            return Ok(());
        }
        if *cycles >= MAX_READS_TO_CLEAR_BULK_IN {
            return Err(Error::DrainLimit { cycles: *cycles });
        }
    }
}

/// ### Abort Bulk Out
///
/// Abort the last bulk out transfer and restore synchronization.
///
/// Initiates the abort for the most recent OUT transaction tag, polls
/// the device until it reports completion, then clears the endpoint
/// halt the abort leaves behind.
///
pub(crate) fn abort_bulk_out<T: UsbIo>(session: &mut Session<T>) -> Result<()> {
    let request_type = endpoint_request_type();

    // INITIATE
    // ==========
    let mut status = [0u8; 2];
    session.io.control_in(
        request_type,
        control_requests::INITIATE_ABORT_BULK_OUT,
        session.last_out_btag as u16,
        session.bulk_out_addr as u16,
        &mut status,
        session.timeout,
    )?;
    log::debug!("INITIATE_ABORT_BULK_OUT returned {:#04x}", status[0]);
    if status[0] != STATUS_SUCCESS {
        return Err(Error::UnexpectedStatus {
            request: "INITIATE_ABORT_BULK_OUT",
            status: status[0],
        });
    }

    // CHECK STATUS
    // ==========
    let mut check = [0u8; 8];
    let mut checks = 0;
    loop {
        session.io.control_in(
            request_type,
            control_requests::CHECK_ABORT_BULK_OUT_STATUS,
            0,
            session.bulk_out_addr as u16,
            &mut check,
            session.timeout,
        )?;
        checks += 1;
        match check[0] {
            STATUS_SUCCESS => break,
            STATUS_PENDING if checks < MAX_READS_TO_CLEAR_BULK_IN => continue,
            STATUS_PENDING => {
                return Err(Error::StillPending {
                    request: "CHECK_ABORT_BULK_OUT_STATUS",
                    cycles: checks,
                })
            }
            other => {
                return Err(Error::UnexpectedStatus {
                    request: "CHECK_ABORT_BULK_OUT_STATUS",
                    status: other,
                })
            }
        }
    }

    session.io.clear_halt(session.bulk_out_addr)
}

/// ### Abort Bulk In
///
/// Abort the last bulk in transfer and restore synchronization.
///
/// A device that answers the initiation with FAILED has no transfer in
/// progress and an empty FIFO, which already is the state this
/// procedure establishes. Otherwise the FIFO is drained and the device
/// polled, draining again whenever it reports queued data.
///
pub(crate) fn abort_bulk_in<T: UsbIo>(session: &mut Session<T>) -> Result<()> {
    let request_type = endpoint_request_type();

    // INITIATE
    // ==========
    let mut status = [0u8; 2];
    session.io.control_in(
        request_type,
        control_requests::INITIATE_ABORT_BULK_IN,
        session.last_in_btag as u16,
        session.bulk_in_addr as u16,
        &mut status,
        session.timeout,
    )?;
    log::debug!("INITIATE_ABORT_BULK_IN returned {:#04x}", status[0]);
    match status[0] {
        STATUS_FAILED => return Ok(()),
        STATUS_SUCCESS => {}
        other => {
            return Err(Error::UnexpectedStatus {
                request: "INITIATE_ABORT_BULK_IN",
                status: other,
            })
        }
    }

    // DRAIN AND CHECK STATUS
    // ==========
    let mut cycles = 0;
    drain_bulk_in(session, &mut cycles)?;

    let mut check = [0u8; 8];
    let mut checks = 0;
    loop {
        session.io.control_in(
            request_type,
            control_requests::CHECK_ABORT_BULK_IN_STATUS,
            0,
            session.bulk_in_addr as u16,
            &mut check,
            session.timeout,
        )?;
        checks += 1;
        match check[0] {
            STATUS_SUCCESS => return Ok(()),
            STATUS_PENDING => {
                // bmAbortBulkIn bit 0 flags data left to read off
                if check[1] & 0x01 == 1 {
                    drain_bulk_in(session, &mut cycles)?;
                }
                if checks >= MAX_READS_TO_CLEAR_BULK_IN {
                    return Err(Error::StillPending {
                        request: "CHECK_ABORT_BULK_IN_STATUS",
                        cycles: checks,
                    });
                }
            }
            other => {
                return Err(Error::UnexpectedStatus {
                    request: "CHECK_ABORT_BULK_IN_STATUS",
                    status: other,
                })
            }
        }
    }
}

/// ### Clear
///
/// Clear the device's input and output buffers.
///
/// Polls CHECK_CLEAR_STATUS until the device finishes, reading pending
/// data off the bulk in endpoint whenever the status reports some, and
/// finally clears the bulk out halt.
///
pub(crate) fn clear<T: UsbIo>(session: &mut Session<T>) -> Result<()> {
    let request_type = interface_request_type();

    // INITIATE
    // ==========
    let mut status = [0u8; 1];
    session.io.control_in(
        request_type,
        control_requests::INITIATE_CLEAR,
        0,
        0,
        &mut status,
        session.timeout,
    )?;
    log::debug!("INITIATE_CLEAR returned {:#04x}", status[0]);
    if status[0] != STATUS_SUCCESS {
        return Err(Error::UnexpectedStatus {
            request: "INITIATE_CLEAR",
            status: status[0],
        });
    }

    // CHECK STATUS
    // ==========
    let mut check = [0u8; 2];
    let mut cycles = 0;
    let mut checks = 0;
    loop {
        session.io.control_in(
            request_type,
            control_requests::CHECK_CLEAR_STATUS,
            0,
            0,
            &mut check,
            session.timeout,
        )?;
        checks += 1;
        match check[0] {
            STATUS_SUCCESS => break,
            STATUS_PENDING => {
                // bmClear bit 0 flags data left to read off
                if check[1] & 0x01 == 1 {
                    drain_bulk_in(session, &mut cycles)?;
                }
                if checks >= MAX_READS_TO_CLEAR_BULK_IN {
                    return Err(Error::StillPending {
                        request: "CHECK_CLEAR_STATUS",
                        cycles: checks,
                    });
                }
            }
            other => {
                return Err(Error::UnexpectedStatus {
                    request: "CHECK_CLEAR_STATUS",
                    status: other,
                })
            }
        }
    }

    session.io.clear_halt(session.bulk_out_addr)
}

/// ### Get Capabilities
///
/// Ask the device for its optional capabilities. The four capability
/// bytes are returned verbatim.
///
pub(crate) fn get_capabilities<T: UsbIo>(session: &mut Session<T>) -> Result<Capabilities> {
    let mut buffer = [0u8; 0x18];
    session.io.control_in(
        interface_request_type(),
        control_requests::GET_CAPABILITIES,
        0,
        0,
        &mut buffer,
        session.timeout,
    )?;
    if buffer[0] != STATUS_SUCCESS {
        return Err(Error::UnexpectedStatus {
            request: "GET_CAPABILITIES",
            status: buffer[0],
        });
    }
    log::debug!(
        "capabilities: interface {:#04x} device {:#04x} usb488 {:#04x}/{:#04x}",
        buffer[4],
        buffer[5],
        buffer[14],
        buffer[15]
    );

    Ok(Capabilities {
        interface_capabilities: buffer[4],
        device_capabilities: buffer[5],
        usb488_interface_capabilities: buffer[14],
        usb488_device_capabilities: buffer[15],
    })
}

/// ### Indicator Pulse
///
/// Turn on the device's activity indicator for identification. This
/// capability is optional; check GET_CAPABILITIES when in doubt.
///
pub(crate) fn indicator_pulse<T: UsbIo>(session: &mut Session<T>) -> Result<()> {
    let mut status = [0u8; 1];
    session.io.control_in(
        interface_request_type(),
        control_requests::INDICATOR_PULSE,
        0,
        0,
        &mut status,
        session.timeout,
    )?;
    if status[0] != STATUS_SUCCESS {
        return Err(Error::UnexpectedStatus {
            request: "INDICATOR_PULSE",
            status: status[0],
        });
    }
    Ok(())
}

/// Clear any halt on the bulk out endpoint.
pub(crate) fn clear_out_halt<T: UsbIo>(session: &mut Session<T>) -> Result<()> {
    session.io.clear_halt(session.bulk_out_addr)
}

/// Clear any halt on the bulk in endpoint. If a read transaction went
/// wrong, the bulk in abort is usually the better choice.
pub(crate) fn clear_in_halt<T: UsbIo>(session: &mut Session<T>) -> Result<()> {
    session.io.clear_halt(session.bulk_in_addr)
}

/// Reinitialize the current USB configuration and its interfaces.
pub(crate) fn reset_configuration<T: UsbIo>(session: &mut Session<T>) -> Result<()> {
    session.io.reset_configuration()
}
