//! Frame layout and the streaming packet checker.
//!
//! Every block on the wire is `[length][sequence][payload...][crc16 high]
//! [crc16 low][sync]`. The length counts the whole block including the
//! trailer. The sequence byte carries the 4-bit sequence number in its low
//! nibble and a fixed destination marker in its high nibble.

use crate::crc::crc16_ccitt;

/// Sync byte terminating every block.
pub const MESSAGE_SYNC: u8 = 0x7e;
/// Smallest legal block: length, sequence, CRC (2), sync.
pub const MESSAGE_MIN: usize = 5;
/// Largest legal block.
pub const MESSAGE_MAX: usize = 64;
/// Size of the `[length][sequence]` header.
pub const MESSAGE_HEADER_SIZE: usize = 2;
/// Size of the `[crc][crc][sync]` trailer.
pub const MESSAGE_TRAILER_SIZE: usize = 3;
/// Offset of the sequence byte within a block.
pub const MESSAGE_POS_SEQ: usize = 1;
/// Low-nibble mask for the sequence number.
pub const MESSAGE_SEQ_MASK: u8 = 0x0f;
/// High-nibble destination marker expected on every host block.
pub const MESSAGE_DEST: u8 = 0x10;

/// Largest payload that fits in one block.
pub const MESSAGE_PAYLOAD_MAX: usize = MESSAGE_MAX - MESSAGE_MIN;

/// Scans `data` for a complete block starting at offset zero.
///
/// Returns `0` when more bytes are needed, a negative count when the caller
/// should discard `|n|` bytes and resynchronize, or the block length when a
/// complete block with a valid CRC and sync byte starts the buffer.
///
/// Sequence numbers are deliberately not checked here; a mismatched
/// sequence is still a well-formed block and the session decides whether to
/// dispatch or NACK it.
pub fn check_packet(data: &[u8]) -> i32 {
    if data.len() < MESSAGE_MIN {
        return 0;
    }
    let msg_len = data[0] as usize;
    if msg_len < MESSAGE_MIN || msg_len > MESSAGE_MAX {
        return resync(data);
    }
    if data[MESSAGE_POS_SEQ] & !MESSAGE_SEQ_MASK != MESSAGE_DEST {
        return resync(data);
    }
    if data.len() < msg_len {
        return 0;
    }
    let block = &data[..msg_len];
    if block[msg_len - 1] != MESSAGE_SYNC {
        return resync(data);
    }
    let wire_crc = ((block[msg_len - 3] as u16) << 8) | block[msg_len - 2] as u16;
    if crc16_ccitt(&block[..msg_len - MESSAGE_TRAILER_SIZE]) != wire_crc {
        return resync(data);
    }
    msg_len as i32
}

/// Computes how many bytes to discard to reach the byte after the next sync
/// marker (or the whole buffer when none is present).
fn resync(data: &[u8]) -> i32 {
    match data.iter().skip(1).position(|&b| b == MESSAGE_SYNC) {
        Some(idx) => -((idx + 2) as i32),
        None => -(data.len() as i32),
    }
}

/// Wraps a payload into a complete block carrying the given sequence
/// number.
pub fn build_frame(sequence: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MESSAGE_PAYLOAD_MAX);
    let msg_len = MESSAGE_MIN + payload.len();
    let mut frame = Vec::with_capacity(msg_len);
    frame.push(msg_len as u8);
    frame.push((sequence & MESSAGE_SEQ_MASK) | MESSAGE_DEST);
    frame.extend_from_slice(payload);
    let crc = crc16_ccitt(&frame);
    frame.push((crc >> 8) as u8);
    frame.push(crc as u8);
    frame.push(MESSAGE_SYNC);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame_roundtrip() {
        let frame = build_frame(1, &[]);
        assert_eq!(frame.len(), MESSAGE_MIN);
        assert_eq!(check_packet(&frame), MESSAGE_MIN as i32);
    }

    #[test]
    fn test_incomplete_returns_zero() {
        let frame = build_frame(2, &[10, 20, 30]);
        assert_eq!(check_packet(&frame[..3]), 0);
        assert_eq!(check_packet(&frame[..frame.len() - 1]), 0);
    }

    #[test]
    fn test_corrupt_crc_resyncs() {
        let mut frame = build_frame(3, &[10, 20, 30]);
        let crc_pos = frame.len() - 2;
        frame[crc_pos] ^= 0xff;
        let n = check_packet(&frame);
        assert!(n < 0);
        // Discarding |n| bytes consumes the corrupted block entirely.
        assert_eq!(-n as usize, frame.len());
    }

    #[test]
    fn test_leading_noise_resyncs_to_next_block() {
        let good = build_frame(4, &[1, 2]);
        let mut stream = vec![0xde, 0xad, MESSAGE_SYNC];
        stream.extend_from_slice(&good);
        let n = check_packet(&stream);
        assert!(n < 0);
        let stream = &stream[-n as usize..];
        assert_eq!(check_packet(stream), good.len() as i32);
    }

    #[test]
    fn test_bad_destination_resyncs() {
        let mut frame = build_frame(5, &[]);
        frame[MESSAGE_POS_SEQ] = 0x25; // wrong destination nibble
        assert!(check_packet(&frame) < 0);
    }

    #[test]
    fn test_sequence_mismatch_is_still_complete() {
        // check_packet accepts any sequence number; only framing is checked.
        for seq in 0..16 {
            let frame = build_frame(seq, &[7]);
            assert_eq!(check_packet(&frame), frame.len() as i32);
        }
    }
}
