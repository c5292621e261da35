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

use crate::protocol::*;
use crate::storage::Storage;

// ============================================================================
// Frame Assembler State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    SeekingHeader,
    Accumulating,
}

// ============================================================================
// Transfer Session
// ============================================================================

/// The single in-progress transfer. Exactly one exists per receiver; `active`
/// is true between a validated FILE_START and the session's termination.
struct TransferSession {
    filename: String,
    file_size: usize,
    total_packets: u16,
    received_packets: u16,
    buffer: [u8; MAX_FILE_SIZE],
    active: bool,
}

impl TransferSession {
    fn new() -> Self {
        TransferSession {
            filename: String::new(),
            file_size: 0,
            total_packets: 0,
            received_packets: 0,
            buffer: [0; MAX_FILE_SIZE],
            active: false,
        }
    }

    fn reset(&mut self) {
        self.filename.clear();
        self.file_size = 0;
        self.total_packets = 0;
        self.received_packets = 0;
        self.buffer.fill(0);
        self.active = false;
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// Byte-stream receiver: frame assembly, command dispatch and file
/// reassembly. Feed it one byte at a time; each completed frame yields at
/// most one response for the caller to transmit. Never fails - malformed
/// input is NACKed or silently discarded and the receiver keeps running.
pub struct Receiver {
    state: AssemblerState,
    frame: [u8; MAX_FRAME_SIZE],
    frame_len: usize,
    session: TransferSession,
    storage: Box<dyn Storage>,
    debug: bool,
}

impl Receiver {
    pub fn new(storage: Box<dyn Storage>, debug: bool) -> Self {
        Receiver {
            state: AssemblerState::SeekingHeader,
            frame: [0; MAX_FRAME_SIZE],
            frame_len: 0,
            session: TransferSession::new(),
            storage,
            debug,
        }
    }

    /// Drop any partial frame and in-progress transfer. Idempotent.
    pub fn reset(&mut self) {
        self.state = AssemblerState::SeekingHeader;
        self.frame_len = 0;
        self.session.reset();
    }

    /// Ingest one byte from the wire. Returns the response to transmit when
    /// the byte completes a frame.
    pub fn process_byte(&mut self, byte: u8) -> Option<Response> {
        match self.state {
            AssemblerState::SeekingHeader => {
                if byte == HEADER {
                    self.frame[0] = byte;
                    self.frame_len = 1;
                    self.state = AssemblerState::Accumulating;
                }
                None
            }
            AssemblerState::Accumulating => {
                self.frame[self.frame_len] = byte;
                self.frame_len += 1;

                if let Some(expected) = self.expected_frame_len() {
                    if self.frame_len >= expected {
                        let response = self.dispatch();
                        self.state = AssemblerState::SeekingHeader;
                        self.frame_len = 0;
                        return response;
                    }
                }

                if self.frame_len >= MAX_FRAME_SIZE {
                    // Framing error: discard and resynchronize on the next
                    // header byte
                    if self.debug { println!("Frame overflow, resynchronizing"); }
                    self.state = AssemblerState::SeekingHeader;
                    self.frame_len = 0;
                }
                None
            }
        }
    }

    /// Total frame length once enough bytes are in to know it. FILE_START
    /// needs the filename length at byte 2, FILE_DATA the data length at
    /// byte 4; unknown commands stay undetermined and die by the overflow
    /// reset.
    fn expected_frame_len(&self) -> Option<usize> {
        match self.frame[1] {
            CMD_FILE_START if self.frame_len >= 3 => Some(8 + self.frame[2] as usize),
            CMD_FILE_DATA if self.frame_len >= 5 => Some(6 + self.frame[4] as usize),
            CMD_FILE_END => Some(5),
            _ => None,
        }
    }

    fn dispatch(&mut self) -> Option<Response> {
        match self.frame[1] {
            CMD_FILE_START => Some(self.handle_file_start()),
            CMD_FILE_DATA => Some(self.handle_file_data()),
            CMD_FILE_END => Some(self.handle_file_end()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Command Handlers
    // ------------------------------------------------------------------------

    fn handle_file_start(&mut self) -> Response {
        let frame = &self.frame[..self.frame_len];

        if frame.len() < 8 {
            if self.debug { println!("FILE_START too short ({} bytes)", frame.len()); }
            return Response::Nack;
        }

        let filename_len = frame[2] as usize;
        if filename_len > MAX_FILENAME_LEN - 1 || frame.len() < 7 + filename_len {
            if self.debug { println!("FILE_START filename length invalid ({})", filename_len); }
            return Response::Nack;
        }

        let filename = String::from_utf8_lossy(&frame[3..3 + filename_len]).into_owned();
        let file_size = u32::from_be_bytes([
            frame[3 + filename_len],
            frame[4 + filename_len],
            frame[5 + filename_len],
            frame[6 + filename_len],
        ]) as usize;

        if file_size > MAX_FILE_SIZE {
            if self.debug { println!("FILE_START rejected: {} bytes exceeds limit", file_size); }
            return Response::Nack;
        }

        // Session opens provisionally; the checksum verdict below can still
        // abandon it
        self.session.filename = filename;
        self.session.file_size = file_size;
        self.session.total_packets = file_size.div_ceil(PACKET_DATA_SIZE) as u16;
        self.session.received_packets = 0;
        self.session.buffer.fill(0);
        self.session.active = true;

        let crc_pos = 7 + filename_len;
        if frame[crc_pos] == checksum(&frame[..crc_pos]) {
            if self.debug {
                println!("FILE_START: {} ({} bytes, {} packets)",
                         self.session.filename, file_size, self.session.total_packets);
            }
            Response::Ready
        } else {
            if self.debug { println!("FILE_START checksum mismatch"); }
            self.session.active = false;
            Response::Nack
        }
    }

    fn handle_file_data(&mut self) -> Response {
        let frame = &self.frame[..self.frame_len];

        if !self.session.active {
            if self.debug { println!("FILE_DATA with no active transfer"); }
            return Response::Nack;
        }

        if frame.len() < 6 {
            if self.debug { println!("FILE_DATA too short ({} bytes)", frame.len()); }
            return Response::Nack;
        }

        let seq_num = u16::from_be_bytes([frame[2], frame[3]]);
        let data_len = frame[4] as usize;

        if data_len > PACKET_DATA_SIZE || frame.len() < 6 + data_len {
            if self.debug { println!("FILE_DATA length invalid ({})", data_len); }
            return Response::Nack;
        }

        let offset = usize::from(seq_num.wrapping_sub(1)) * PACKET_DATA_SIZE;
        if offset + data_len > MAX_FILE_SIZE {
            if self.debug { println!("FILE_DATA packet {} lands out of bounds", seq_num); }
            return Response::Nack;
        }

        // Payload lands before the checksum verdict; a corrupt packet is
        // NACKed for retransmission but its bytes are already in place
        self.session.buffer[offset..offset + data_len]
            .copy_from_slice(&frame[5..5 + data_len]);

        let crc_pos = 5 + data_len;
        if frame[crc_pos] == checksum(&frame[..crc_pos]) {
            self.session.received_packets = self.session.received_packets.wrapping_add(1);
            if self.debug {
                println!("FILE_DATA: packet {}/{} ({} bytes)",
                         seq_num, self.session.total_packets, data_len);
            }
            Response::Ack
        } else {
            if self.debug { println!("FILE_DATA checksum mismatch on packet {}", seq_num); }
            Response::Nack
        }
    }

    fn handle_file_end(&mut self) -> Response {
        let frame = &self.frame[..self.frame_len];

        if !self.session.active {
            if self.debug { println!("FILE_END with no active transfer"); }
            return Response::Nack;
        }

        if frame.len() < 5 {
            if self.debug { println!("FILE_END too short ({} bytes)", frame.len()); }
            return Response::Nack;
        }

        let total_packets = u16::from_be_bytes([frame[2], frame[3]]);

        if frame[4] != checksum(&frame[..4]) {
            if self.debug { println!("FILE_END checksum mismatch"); }
            self.session.active = false;
            return Response::Nack;
        }

        if total_packets != self.session.received_packets {
            println!("Warning: packet count mismatch (sender says {}, received {})",
                     total_packets, self.session.received_packets);
        }

        let size = self.session.file_size;
        if let Err(e) = self.storage.store(&self.session.filename, &self.session.buffer[..size]) {
            // Storage outcome is not part of the protocol; the sender still
            // gets its ACK
            eprintln!("Failed to store {}: {}", self.session.filename, e);
        } else {
            println!("Received file: {} ({} bytes)", self.session.filename, size);
        }

        self.session.reset();
        Response::Ack
    }
}

// ============================================================================
// Tests
// ============================================================================
