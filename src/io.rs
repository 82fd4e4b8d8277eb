//! ## Endpoint I/O
//!
//! Narrow synchronous interface over the host USB stack. Everything the
//! protocol engine does to a device goes through [`UsbIo`], which keeps
//! the message engine and the control procedures testable without
//! hardware.
//!

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusb::{Context, DeviceHandle};

use crate::error::Result;
use crate::types::DeviceMode;

/// ### UsbIo
///
/// The operations the protocol engine needs from the host USB stack.
/// All calls block for at most `timeout` and return the actual number
/// of bytes moved.
///
pub trait UsbIo {
    /// Submit a bulk transfer to the given OUT endpoint.
    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Read a bulk transfer from the given IN endpoint.
    fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Issue a control request with an IN data stage.
    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Standard CLEAR_FEATURE/ENDPOINT_HALT with a zero-length data stage.
    fn clear_halt(&self, endpoint: u8) -> Result<()>;

    /// Reinitialize the current USB configuration and its interfaces.
    fn reset_configuration(&self) -> Result<()>;
}

/// ### UsbHandle
///
/// Production [`UsbIo`] over a claimed rusb device handle. Releases the
/// interface and hands control back to the kernel driver on drop.
///
#[derive(Debug)]
pub struct UsbHandle {
    handle: Arc<Mutex<DeviceHandle<Context>>>,
    mode: DeviceMode,
}

impl UsbHandle {
    pub fn new(handle: DeviceHandle<Context>, mode: DeviceMode) -> UsbHandle {
        UsbHandle {
            handle: Arc::new(Mutex::new(handle)),
            mode,
        }
    }

    fn borrow(&self) -> MutexGuard<'_, DeviceHandle<Context>> {
        self.handle.lock().unwrap()
    }
}

impl UsbIo for UsbHandle {
    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        Ok(self.borrow().write_bulk(endpoint, data, timeout)?)
    }

    fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.borrow().read_bulk(endpoint, buffer, timeout)?)
    }

    fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .borrow()
            .read_control(request_type, request, value, index, buffer, timeout)?)
    }

    fn clear_halt(&self, endpoint: u8) -> Result<()> {
        Ok(self.borrow().clear_halt(endpoint)?)
    }

    fn reset_configuration(&self) -> Result<()> {
        Ok(self
            .borrow()
            .set_active_configuration(self.mode.config_number)?)
    }
}

impl Drop for UsbHandle {
    fn drop(&mut self) {
        let handle = self.handle.lock().unwrap();
        if let Err(err) = handle.release_interface(self.mode.interface_number) {
            log::warn!("failed to release usb interface: {err}");
        }
        if self.mode.has_kernel_driver {
            if let Err(err) = handle.attach_kernel_driver(self.mode.interface_number) {
                log::warn!("failed to reattach kernel driver: {err}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted [`UsbIo`] double. Replies are queued ahead of time and
    //! every call is recorded for later assertions.

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::UsbIo;
    use crate::constants::misc::HEADER_SIZE;
    use crate::error::{Error, Result};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockCall {
        BulkOut {
            endpoint: u8,
            data: Vec<u8>,
        },
        BulkIn {
            endpoint: u8,
            capacity: usize,
        },
        ControlIn {
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            length: usize,
        },
        ClearHalt {
            endpoint: u8,
        },
        ResetConfiguration,
    }

    #[derive(Default)]
    pub struct MockUsb {
        pub calls: RefCell<Vec<MockCall>>,
        bulk_out_replies: RefCell<VecDeque<Result<usize>>>,
        bulk_in_replies: RefCell<VecDeque<Result<Vec<u8>>>>,
        control_in_replies: RefCell<VecDeque<Result<Vec<u8>>>>,
    }

    impl MockUsb {
        pub fn new() -> MockUsb {
            MockUsb::default()
        }

        /// Queue an error for the next unscripted bulk out submission.
        pub fn fail_bulk_out(&self, err: Error) {
            self.bulk_out_replies.borrow_mut().push_back(Err(err));
        }

        /// Queue the raw bytes the next bulk in call will deliver.
        pub fn reply_bulk_in(&self, packet: Vec<u8>) {
            self.bulk_in_replies.borrow_mut().push_back(Ok(packet));
        }

        pub fn fail_bulk_in(&self, err: Error) {
            self.bulk_in_replies.borrow_mut().push_back(Err(err));
        }

        /// Queue the data stage of the next control IN request.
        pub fn reply_control_in(&self, data: Vec<u8>) {
            self.control_in_replies.borrow_mut().push_back(Ok(data));
        }

        pub fn fail_control_in(&self, err: Error) {
            self.control_in_replies.borrow_mut().push_back(Err(err));
        }

        /// All bulk out payloads submitted so far.
        pub fn bulk_out_packets(&self) -> Vec<Vec<u8>> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|call| match call {
                    MockCall::BulkOut { data, .. } => Some(data.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn control_in_requests(&self) -> Vec<(u8, u8, u16, u16, usize)> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|call| match call {
                    MockCall::ControlIn {
                        request_type,
                        request,
                        value,
                        index,
                        length,
                    } => Some((*request_type, *request, *value, *index, *length)),
                    _ => None,
                })
                .collect()
        }
    }

    impl UsbIo for MockUsb {
        fn bulk_out(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize> {
            self.calls.borrow_mut().push(MockCall::BulkOut {
                endpoint,
                data: data.to_vec(),
            });
            match self.bulk_out_replies.borrow_mut().pop_front() {
                Some(reply) => reply,
                None => Ok(data.len()),
            }
        }

        fn bulk_in(&self, endpoint: u8, buffer: &mut [u8], _timeout: Duration) -> Result<usize> {
            self.calls.borrow_mut().push(MockCall::BulkIn {
                endpoint,
                capacity: buffer.len(),
            });
            let packet = self
                .bulk_in_replies
                .borrow_mut()
                .pop_front()
                .expect("unscripted bulk in call")?;
            let n = packet.len().min(buffer.len());
            buffer[..n].copy_from_slice(&packet[..n]);
            Ok(n)
        }

        fn control_in(
            &self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            buffer: &mut [u8],
            _timeout: Duration,
        ) -> Result<usize> {
            self.calls.borrow_mut().push(MockCall::ControlIn {
                request_type,
                request,
                value,
                index,
                length: buffer.len(),
            });
            let data = self
                .control_in_replies
                .borrow_mut()
                .pop_front()
                .expect("unscripted control in call")?;
            let n = data.len().min(buffer.len());
            buffer[..n].copy_from_slice(&data[..n]);
            Ok(n)
        }

        fn clear_halt(&self, endpoint: u8) -> Result<()> {
            self.calls.borrow_mut().push(MockCall::ClearHalt { endpoint });
            Ok(())
        }

        fn reset_configuration(&self) -> Result<()> {
            self.calls.borrow_mut().push(MockCall::ResetConfiguration);
            Ok(())
        }
    }

    /// Build a DEV_DEP_MSG_IN bulk packet carrying `payload`.
    pub fn dev_dep_msg_in(btag: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_SIZE + payload.len()];
        packet[0] = crate::constants::bulk_msg_id::DEV_DEP_MSG_IN;
        packet[1] = btag;
        packet[2] = !btag;
        packet[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        packet[HEADER_SIZE..].copy_from_slice(payload);
        packet
    }
}
