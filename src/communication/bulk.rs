//! Bulk
//!
//! Message framing and the chunked read/write loops over the bulk
//! endpoint pair.
//!

use crate::communication::control;
use crate::constants::misc::{ALIGNMENT_SLACK, HEADER_SIZE, SIZE_IO_BUFFER};
use crate::constants::bulk_msg_id;
use crate::error::{Error, Result};
use crate::io::UsbIo;
use crate::session::Session;
use crate::attr::ReadMode;

/// Payload capacity of one DEV_DEP_MSG_OUT chunk.
pub(crate) const WRITE_CAPACITY: usize = SIZE_IO_BUFFER - HEADER_SIZE;
/// Per-round ceiling on the bytes asked for with REQUEST_DEV_DEP_MSG_IN.
pub(crate) const READ_CAPACITY: usize = SIZE_IO_BUFFER - HEADER_SIZE - ALIGNMENT_SLACK;

/// ### DEV_DEP_MSG_OUT header
///
/// Encode the 12-byte header leading a device-dependent OUT transfer.
/// `transfer_size` is the payload length that follows the header;
/// `end_of_message` marks the final chunk of the message.
///
pub fn encode_dev_dep_msg_out(btag: u8, transfer_size: u32, end_of_message: bool) -> [u8; 12] {
    let mut header = [0u8; 12];

    header[0] = bulk_msg_id::DEV_DEP_MSG_OUT;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if end_of_message {
        header[8] = 0b0000_0001;
    }

    header
}

/// ### REQUEST_DEV_DEP_MSG_IN header
///
/// Encode the 12-byte request asking the device to send at most
/// `transfer_size` message bytes. When `term_char` is given, the device
/// may additionally terminate the transfer on that character.
///
pub fn encode_request_dev_dep_msg_in(
    btag: u8,
    transfer_size: u32,
    term_char: Option<u8>,
) -> [u8; 12] {
    let mut header = [0u8; 12];

    header[0] = bulk_msg_id::REQUEST_DEV_DEP_MSG_IN;
    header[1] = btag;
    header[2] = !btag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if let Some(tc) = term_char {
        header[8] = 0b0000_0010;
        header[9] = tc;
    }

    header
}

/// Decoded fields of a 12-byte bulk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkHeader {
    pub msg_id: u8,
    pub btag: u8,
    pub btag_inverse: u8,
    pub transfer_size: u32,
    pub transfer_attributes: u8,
    pub term_char: u8,
}

/// Decode the header at the front of a bulk packet.
pub fn decode_header(packet: &[u8]) -> BulkHeader {
    BulkHeader {
        msg_id: packet[0],
        btag: packet[1],
        btag_inverse: packet[2],
        transfer_size: u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]),
        transfer_attributes: packet[8],
        term_char: packet[9],
    }
}

/// ### Write
///
/// Wrap `data` into DEV_DEP_MSG_OUT transfers and deliver it to the
/// instrument, chunk by chunk. Returns the number of bytes consumed
/// from the caller, which is always `data.len()` on success.
///
pub(crate) fn write_message<T: UsbIo>(session: &mut Session<T>, data: &[u8]) -> Result<usize> {
    session.eof = false;

    let mut remaining = data.len();
    let mut done = 0;

    loop {
        let last = remaining <= WRITE_CAPACITY;
        let consumed = if last { remaining } else { WRITE_CAPACITY };
        let chunk = &data[done..done + consumed];

        // The trailing newline is consumed but never put on the wire.
        let mut this_part = consumed;
        if last && session.rem_nl_on_write && chunk.last() == Some(&b'\n') {
            this_part -= 1;
        }

        let btag = session.next_btag();
        let header = encode_dev_dep_msg_out(btag, this_part as u32, last);
        session.io_buffer[..HEADER_SIZE].copy_from_slice(&header);
        session.io_buffer[HEADER_SIZE..HEADER_SIZE + this_part]
            .copy_from_slice(&chunk[..this_part]);

        // Zero bytes up to the next 4-byte boundary
        let mut n_bytes = HEADER_SIZE + this_part;
        if this_part % 4 != 0 {
            let pad = 4 - this_part % 4;
            session.io_buffer[n_bytes..n_bytes + pad].fill(0);
            n_bytes += pad;
        }

        if let Err(err) = session.io.bulk_out(
            session.bulk_out_addr,
            &session.io_buffer[..n_bytes],
            session.timeout,
        ) {
            log::warn!("unable to send data: {err}");
            if session.auto_abort {
                if let Err(abort_err) = control::abort_bulk_out(session) {
                    log::warn!("abort after failed write did not complete: {abort_err}");
                }
            }
            return Err(err);
        }

        remaining -= consumed;
        done += consumed;
        if remaining == 0 {
            break;
        }
    }

    Ok(data.len())
}

/// ### Read
///
/// Retrieve the instrument's pending output into `out` by issuing
/// REQUEST_DEV_DEP_MSG_IN / DEV_DEP_MSG_IN rounds until the device
/// sends a short transfer or `out` is full. Returns the number of
/// bytes placed in `out`; zero signals EOF under fread mode.
///
pub(crate) fn read_message<T: UsbIo>(session: &mut Session<T>, out: &mut [u8]) -> Result<usize> {
    if session.read_mode == ReadMode::Fread && session.eof {
        // One-shot: the zero result stops buffered readers from retrying.
        session.eof = false;
        return Ok(0);
    }

    let mut remaining = out.len();
    let mut done = 0;

    while remaining > 0 {
        let this_part = remaining.min(READ_CAPACITY);

        let term_char = session.term_char_enabled.then_some(session.term_char);
        let btag = session.next_btag();
        let request = encode_request_dev_dep_msg_in(
            btag,
            (this_part as u32).wrapping_sub((HEADER_SIZE + ALIGNMENT_SLACK) as u32),
            term_char,
        );

        if let Err(err) = session
            .io
            .bulk_out(session.bulk_out_addr, &request, session.timeout)
        {
            log::warn!("unable to request data: {err}");
            if session.auto_abort {
                if let Err(abort_err) = control::abort_bulk_out(session) {
                    log::warn!("abort after failed request did not complete: {abort_err}");
                }
            }
            return Err(err);
        }

        let actual = match session.io.bulk_in(
            session.bulk_in_addr,
            &mut session.io_buffer,
            session.timeout,
        ) {
            Ok(actual) => actual,
            Err(err) => {
                log::warn!("unable to read data: {err}");
                if session.auto_abort {
                    if let Err(abort_err) = control::abort_bulk_in(session) {
                        log::warn!("abort after failed read did not complete: {abort_err}");
                    }
                }
                return Err(err);
            }
        };

        if actual < HEADER_SIZE {
            return Err(Error::ShortInHeader { actual });
        }
        let header = decode_header(&session.io_buffer[..HEADER_SIZE]);
        session.last_in_btag = header.btag;

        // How many characters did the instrument send?
        let n_characters = header.transfer_size as usize;
        let n_copy = n_characters.min(actual - HEADER_SIZE).min(remaining);
        out[done..done + n_copy]
            .copy_from_slice(&session.io_buffer[HEADER_SIZE..HEADER_SIZE + n_copy]);

        done += n_copy;
        remaining -= n_copy;

        // Anything below a full buffer ends the message.
        if n_characters < SIZE_IO_BUFFER - HEADER_SIZE {
            break;
        }
    }

    if session.add_nl_on_read && done < out.len() {
        out[done] = b'\n';
        done += 1;
    }

    if done < out.len() {
        session.eof = true;
    }

    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::control_requests;
    use crate::io::mock::{dev_dep_msg_in, MockCall};
    use crate::session::testing::session;

    #[test]
    fn out_header_round_trip() {
        let header = encode_dev_dep_msg_out(7, 2036, true);
        let decoded = decode_header(&header);
        assert_eq!(decoded.msg_id, bulk_msg_id::DEV_DEP_MSG_OUT);
        assert_eq!(decoded.btag, 7);
        assert_eq!(decoded.btag_inverse, !7u8);
        assert_eq!(decoded.transfer_size, 2036);
        assert_eq!(decoded.transfer_attributes & 0x01, 1);
    }

    #[test]
    fn in_request_header_carries_term_char() {
        let header = encode_request_dev_dep_msg_in(3, 100, Some(b'\n'));
        assert_eq!(header[0], bulk_msg_id::REQUEST_DEV_DEP_MSG_IN);
        assert_eq!(header[2], !3u8);
        assert_eq!(header[8], 0b0000_0010);
        assert_eq!(header[9], b'\n');

        let plain = encode_request_dev_dep_msg_in(3, 100, None);
        assert_eq!(plain[8], 0);
        assert_eq!(plain[9], 0);
    }

    #[test]
    fn zero_byte_write_emits_one_empty_packet() {
        let mut s = session();
        assert_eq!(write_message(&mut s, b"").unwrap(), 0);

        let packets = s.io.bulk_out_packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), HEADER_SIZE);
        let header = decode_header(&packets[0]);
        assert_eq!(header.transfer_size, 0);
        assert_eq!(header.transfer_attributes & 0x01, 1);
    }

    #[test]
    fn full_chunk_write_is_one_packet_without_padding() {
        let mut s = session();
        let data = vec![b'x'; WRITE_CAPACITY];
        assert_eq!(write_message(&mut s, &data).unwrap(), data.len());

        let packets = s.io.bulk_out_packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), SIZE_IO_BUFFER);
        let header = decode_header(&packets[0]);
        assert_eq!(header.transfer_size, WRITE_CAPACITY as u32);
        assert_eq!(header.transfer_attributes & 0x01, 1);
    }

    #[test]
    fn one_byte_over_capacity_splits_and_pads() {
        let mut s = session();
        let data = vec![b'x'; WRITE_CAPACITY + 1];
        assert_eq!(write_message(&mut s, &data).unwrap(), data.len());

        let packets = s.io.bulk_out_packets();
        assert_eq!(packets.len(), 2);

        let first = decode_header(&packets[0]);
        assert_eq!(first.transfer_size, WRITE_CAPACITY as u32);
        assert_eq!(first.transfer_attributes & 0x01, 0);

        let second = decode_header(&packets[1]);
        assert_eq!(second.transfer_size, 1);
        assert_eq!(second.transfer_attributes & 0x01, 1);
        // 1 payload byte plus 3 zeros of padding
        assert_eq!(packets[1].len(), HEADER_SIZE + 4);
        assert_eq!(&packets[1][HEADER_SIZE + 1..], &[0, 0, 0]);
    }

    #[test]
    fn chunked_write_uses_fresh_tags_and_marks_only_the_last() {
        let mut s = session();
        let data = vec![b'x'; 4096];
        assert_eq!(write_message(&mut s, &data).unwrap(), 4096);

        let headers: Vec<BulkHeader> = s
            .io
            .bulk_out_packets()
            .iter()
            .map(|p| decode_header(p))
            .collect();
        assert_eq!(headers.len(), 3);
        assert_eq!(
            headers.iter().map(|h| h.btag).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            headers.iter().map(|h| h.transfer_size).collect::<Vec<_>>(),
            vec![WRITE_CAPACITY as u32, WRITE_CAPACITY as u32, 24]
        );
        assert_eq!(
            headers
                .iter()
                .map(|h| h.transfer_attributes & 0x01)
                .collect::<Vec<_>>(),
            vec![0, 0, 1]
        );
        for h in &headers {
            assert_eq!(h.btag_inverse, !h.btag);
        }
        // Total length of every packet stays 4-byte aligned
        for p in s.io.bulk_out_packets() {
            assert_eq!(p.len() % 4, 0);
        }
    }

    #[test]
    fn trailing_newline_is_consumed_but_not_sent() {
        let mut s = session();
        s.rem_nl_on_write = true;
        assert_eq!(write_message(&mut s, b"ABC\n").unwrap(), 4);

        let packets = s.io.bulk_out_packets();
        assert_eq!(packets.len(), 1);
        let header = decode_header(&packets[0]);
        assert_eq!(header.transfer_size, 3);
        assert_eq!(header.transfer_attributes & 0x01, 1);
        assert_eq!(&packets[0][HEADER_SIZE..HEADER_SIZE + 3], b"ABC");
        assert_eq!(packets[0].len(), HEADER_SIZE + 4);
    }

    #[test]
    fn idn_query_round_trip() {
        let mut s = session();
        assert_eq!(write_message(&mut s, b"*IDN?\n").unwrap(), 6);

        let packets = s.io.bulk_out_packets();
        let header = decode_header(&packets[0]);
        assert_eq!(header.btag, 1);
        assert_eq!(header.transfer_size, 6);
        assert_eq!(header.transfer_attributes & 0x01, 1);
        assert_eq!(&packets[0][HEADER_SIZE..HEADER_SIZE + 6], b"*IDN?\n");
        assert_eq!(packets[0].len(), HEADER_SIZE + 8);

        let reply = b"ACME,4000X,SN001,1.0\n";
        s.io.reply_bulk_in(dev_dep_msg_in(2, reply));
        let mut out = [0u8; 128];
        let n = read_message(&mut s, &mut out).unwrap();
        assert_eq!(n, reply.len());
        assert_eq!(&out[..n], reply);

        let request = decode_header(&s.io.bulk_out_packets()[1]);
        assert_eq!(request.msg_id, bulk_msg_id::REQUEST_DEV_DEP_MSG_IN);
        assert_eq!(request.btag, 2);
        assert_eq!(request.transfer_size, 128 - 15);
        assert_eq!(s.last_in_btag, 2);
    }

    #[test]
    fn read_request_advertises_term_char() {
        let mut s = session();
        s.term_char_enabled = true;
        s.term_char = b';';
        s.io.reply_bulk_in(dev_dep_msg_in(1, b"ok"));

        let mut out = [0u8; 64];
        read_message(&mut s, &mut out).unwrap();

        let request = decode_header(&s.io.bulk_out_packets()[0]);
        assert_eq!(request.transfer_attributes, 0b0000_0010);
        assert_eq!(request.term_char, b';');
    }

    #[test]
    fn read_continues_until_short_transfer() {
        let mut s = session();
        let full = vec![b'a'; SIZE_IO_BUFFER - HEADER_SIZE];
        s.io.reply_bulk_in(dev_dep_msg_in(1, &full));
        s.io.reply_bulk_in(dev_dep_msg_in(2, b"tail"));

        let mut out = [0u8; 4096];
        let n = read_message(&mut s, &mut out).unwrap();
        assert_eq!(n, full.len() + 4);
        assert_eq!(&out[full.len()..n], b"tail");

        // Two request/response rounds
        let bulk_ins = s
            .io
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, MockCall::BulkIn { .. }))
            .count();
        assert_eq!(bulk_ins, 2);
    }

    #[test]
    fn short_read_arms_fread_eof() {
        let mut s = session();
        s.io.reply_bulk_in(dev_dep_msg_in(1, b"1.23"));

        let mut out = [0u8; 32];
        assert_eq!(read_message(&mut s, &mut out).unwrap(), 4);
        assert!(s.eof);

        // The armed EOF yields exactly one zero-length result
        assert_eq!(read_message(&mut s, &mut out).unwrap(), 0);
        assert!(!s.eof);
    }

    #[test]
    fn read_mode_read_does_not_emulate_eof() {
        let mut s = session();
        s.read_mode = ReadMode::Read;
        s.io.reply_bulk_in(dev_dep_msg_in(1, b"1.23"));
        s.io.reply_bulk_in(dev_dep_msg_in(2, b"5.67"));

        let mut out = [0u8; 32];
        assert_eq!(read_message(&mut s, &mut out).unwrap(), 4);
        assert_eq!(read_message(&mut s, &mut out).unwrap(), 4);
    }

    #[test]
    fn add_nl_on_read_appends_when_room_remains() {
        let mut s = session();
        s.add_nl_on_read = true;
        s.io.reply_bulk_in(dev_dep_msg_in(1, b"1.23"));

        let mut out = [0u8; 8];
        let n = read_message(&mut s, &mut out).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&out[..n], b"1.23\n");
    }

    #[test]
    fn failed_write_with_auto_abort_runs_the_out_abort() {
        let mut s = session();
        s.auto_abort = true;
        s.io.fail_bulk_out(Error::Transport(rusb::Error::Timeout));
        // INITIATE_ABORT_BULK_OUT then one successful status check
        s.io.reply_control_in(vec![0x01, 0x00]);
        s.io.reply_control_in(vec![0x01, 0, 0, 0, 0, 0, 0, 0]);

        let err = write_message(&mut s, b"*RST\n").unwrap_err();
        assert!(matches!(err, Error::Transport(rusb::Error::Timeout)));

        let controls = s.io.control_in_requests();
        assert_eq!(controls.len(), 2);
        let (_, request, value, index, _) = controls[0];
        assert_eq!(request, control_requests::INITIATE_ABORT_BULK_OUT);
        assert_eq!(value, 1); // the tag of the failed transfer
        assert_eq!(index, s.bulk_out_addr as u16);
        assert!(s
            .io
            .calls
            .borrow()
            .iter()
            .any(|c| matches!(c, MockCall::ClearHalt { endpoint } if *endpoint == s.bulk_out_addr)));
    }

    #[test]
    fn failed_write_without_auto_abort_reports_only_the_error() {
        let mut s = session();
        s.io.fail_bulk_out(Error::Transport(rusb::Error::Pipe));

        let err = write_message(&mut s, b"*RST\n").unwrap_err();
        assert!(matches!(err, Error::Transport(rusb::Error::Pipe)));
        assert!(s.io.control_in_requests().is_empty());
    }

    #[test]
    fn failed_read_with_auto_abort_runs_the_in_abort() {
        let mut s = session();
        s.auto_abort = true;
        s.io.fail_bulk_in(Error::Transport(rusb::Error::Timeout));
        // INITIATE_ABORT_BULK_IN answers "nothing in progress"
        s.io.reply_control_in(vec![0x81, 0x00]);

        let mut out = [0u8; 32];
        let err = read_message(&mut s, &mut out).unwrap_err();
        assert!(matches!(err, Error::Transport(rusb::Error::Timeout)));

        let controls = s.io.control_in_requests();
        assert_eq!(controls.len(), 1);
        let (_, request, value, index, _) = controls[0];
        assert_eq!(request, control_requests::INITIATE_ABORT_BULK_IN);
        assert_eq!(value, s.last_in_btag as u16);
        assert_eq!(index, s.bulk_in_addr as u16);
    }

    #[test]
    fn truncated_in_header_is_a_protocol_error() {
        let mut s = session();
        s.io.reply_bulk_in(vec![0x02, 0x01]);

        let mut out = [0u8; 32];
        let err = read_message(&mut s, &mut out).unwrap_err();
        assert!(matches!(err, Error::ShortInHeader { actual: 2 }));
    }

    #[test]
    fn device_reporting_more_than_delivered_is_clamped() {
        let mut s = session();
        // Header claims a full buffer but only 4 payload bytes arrive
        let mut packet = dev_dep_msg_in(1, b"abcd");
        packet[4..8].copy_from_slice(&((SIZE_IO_BUFFER - HEADER_SIZE) as u32).to_le_bytes());
        s.io.reply_bulk_in(packet);
        s.io.reply_bulk_in(dev_dep_msg_in(2, b""));

        let mut out = [0u8; 64];
        let n = read_message(&mut s, &mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&out[..4], b"abcd");
    }
}
