// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! UFLINK wire format: constants, checksum and frame builders

/// Header marker - every frame begins with this byte
pub const HEADER: u8 = 0x81;

/// Begins a file transfer: filename and declared size
pub const CMD_FILE_START: u8 = 0x90;

/// Carries one sequenced chunk of file data
pub const CMD_FILE_DATA: u8 = 0x91;

/// Ends a file transfer: sender's total packet count
pub const CMD_FILE_END: u8 = 0x92;

/// Receiver accepts the previous FILE_DATA or FILE_END
pub const CMD_ACK: u8 = 0x93;

/// Receiver rejects the previous frame, sender should retransmit
pub const CMD_NACK: u8 = 0x94;

/// Receiver accepts FILE_START and is ready for data
pub const CMD_READY: u8 = 0x95;

/// Filename capacity, one slot reserved for a terminator (63 usable bytes)
pub const MAX_FILENAME_LEN: usize = 64;

/// Largest frame the assembler will accumulate before resynchronizing
pub const MAX_FRAME_SIZE: usize = 256;

/// Receive buffer capacity - files above this are rejected at FILE_START
pub const MAX_FILE_SIZE: usize = 10240;

/// Reassembly stride: packet n lands at offset (n - 1) * PACKET_DATA_SIZE
pub const PACKET_DATA_SIZE: usize = 256;

/// Largest FILE_DATA payload that still fits a MAX_FRAME_SIZE frame
/// (header, command, 2-byte sequence number, length byte, checksum)
pub const MAX_CHUNK_LEN: usize = MAX_FRAME_SIZE - 6;

// ============================================================================
// Checksum
// ============================================================================

/// Additive checksum, truncated to 8 bits. Computed over every frame byte
/// preceding the trailing checksum byte.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

// ============================================================================
// Responses
// ============================================================================

/// The three single-command frames the receiver can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Nack,
    Ready,
}

impl Response {
    pub fn command(self) -> u8 {
        match self {
            Response::Ack => CMD_ACK,
            Response::Nack => CMD_NACK,
            Response::Ready => CMD_READY,
        }
    }

    pub fn from_command(cmd: u8) -> Option<Response> {
        match cmd {
            CMD_ACK => Some(Response::Ack),
            CMD_NACK => Some(Response::Nack),
            CMD_READY => Some(Response::Ready),
            _ => None,
        }
    }

    /// Encode as a wire frame: header, command, checksum.
    pub fn encode(self) -> [u8; 3] {
        let mut frame = [HEADER, self.command(), 0];
        frame[2] = checksum(&frame[..2]);
        frame
    }
}

// ============================================================================
// Frame Builders
// ============================================================================

/// FILE_START: header, command, filename length, filename, 4-byte big-endian
/// file size, checksum. The filename must fit MAX_FILENAME_LEN - 1 bytes.
pub fn build_file_start(filename: &str, file_size: u32) -> Vec<u8> {
    debug_assert!(filename.len() < MAX_FILENAME_LEN);

    let mut frame = Vec::with_capacity(8 + filename.len());
    frame.push(HEADER);
    frame.push(CMD_FILE_START);
    frame.push(filename.len() as u8);
    frame.extend_from_slice(filename.as_bytes());
    frame.extend_from_slice(&file_size.to_be_bytes());
    frame.push(checksum(&frame));
    frame
}

/// FILE_DATA: header, command, 2-byte big-endian sequence number (1-based),
/// data length, data, checksum.
pub fn build_file_data(seq_num: u16, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= MAX_CHUNK_LEN);

    let mut frame = Vec::with_capacity(6 + data.len());
    frame.push(HEADER);
    frame.push(CMD_FILE_DATA);
    frame.extend_from_slice(&seq_num.to_be_bytes());
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    frame.push(checksum(&frame));
    frame
}

/// FILE_END: header, command, 2-byte big-endian total packet count, checksum.
pub fn build_file_end(total_packets: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5);
    frame.push(HEADER);
    frame.push(CMD_FILE_END);
    frame.extend_from_slice(&total_packets.to_be_bytes());
    frame.push(checksum(&frame));
    frame
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_truncated_sum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 0x06);
        assert_eq!(checksum(&[0xFF, 0x01]), 0x00);
        assert_eq!(checksum(&[0x81, 0x93]), 0x14);
    }

    #[test]
    fn test_response_frames() {
        assert_eq!(Response::Ack.encode(), [0x81, 0x93, 0x14]);
        assert_eq!(Response::Nack.encode(), [0x81, 0x94, 0x15]);
        assert_eq!(Response::Ready.encode(), [0x81, 0x95, 0x16]);
    }

    #[test]
    fn test_response_from_command() {
        assert_eq!(Response::from_command(CMD_ACK), Some(Response::Ack));
        assert_eq!(Response::from_command(CMD_NACK), Some(Response::Nack));
        assert_eq!(Response::from_command(CMD_READY), Some(Response::Ready));
        assert_eq!(Response::from_command(CMD_FILE_DATA), None);
    }

    #[test]
    fn test_built_frames_verify() {
        let frames = [
            build_file_start("a.txt", 10),
            build_file_data(1, b"0123456789"),
            build_file_end(1),
        ];

        for frame in &frames {
            let (body, tail) = frame.split_at(frame.len() - 1);
            assert_eq!(checksum(body), tail[0], "frame should verify: {:02X?}", frame);
        }
    }

    #[test]
    fn test_mutated_checksum_fails() {
        let frame = build_file_data(1, b"payload");
        let body = &frame[..frame.len() - 1];
        let good = frame[frame.len() - 1];

        for bad in 0..=255u8 {
            if bad != good {
                assert_ne!(checksum(body), bad);
            }
        }
    }

    #[test]
    fn test_file_start_layout() {
        let frame = build_file_start("a.txt", 10);
        assert_eq!(frame.len(), 8 + 5);
        assert_eq!(frame[0], HEADER);
        assert_eq!(frame[1], CMD_FILE_START);
        assert_eq!(frame[2], 5);
        assert_eq!(&frame[3..8], b"a.txt");
        assert_eq!(&frame[8..12], &10u32.to_be_bytes());
    }

    #[test]
    fn test_file_data_layout() {
        let frame = build_file_data(0x0102, b"abc");
        assert_eq!(frame.len(), 6 + 3);
        assert_eq!(&frame[..5], &[HEADER, CMD_FILE_DATA, 0x01, 0x02, 3]);
        assert_eq!(&frame[5..8], b"abc");
    }

    #[test]
    fn test_file_end_layout() {
        let frame = build_file_end(0x0304);
        assert_eq!(frame.len(), 5);
        assert_eq!(&frame[..4], &[HEADER, CMD_FILE_END, 0x03, 0x04]);
    }
}
