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

use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;
use crate::protocol::*;
use crate::serial::SerialPort;

/// Attempts per frame before the transfer is abandoned
const MAX_RETRIES: u8 = 3;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum SenderError {
    Io(std::io::Error),
    FileTooLarge(usize),
    InvalidFilename(String),
    RetriesExhausted(&'static str),
    TransferComplete,
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::Io(e) => write!(f, "I/O error: {}", e),
            SenderError::FileTooLarge(size) => {
                write!(f, "File is {} bytes, receiver limit is {}", size, MAX_FILE_SIZE)
            }
            SenderError::InvalidFilename(name) => {
                write!(f, "Filename unusable or longer than {} bytes: {}", MAX_FILENAME_LEN - 1, name)
            }
            SenderError::RetriesExhausted(phase) => {
                write!(f, "No acknowledgment for {} after {} attempts", phase, MAX_RETRIES)
            }
            SenderError::TransferComplete => write!(f, "Transfer complete"),
        }
    }
}

impl std::error::Error for SenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SenderError {
    fn from(err: std::io::Error) -> Self {
        SenderError::Io(err)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct SendFileStart;
pub struct WaitReady;
pub struct SendDataPacket;
pub struct WaitDataAck;
pub struct SendFileEnd;
pub struct WaitEndAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    filename: String,
    data: Vec<u8>,
    next_chunk: usize,
    retries: u8,
    byte_delay: u8,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helpers
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            serial: self.serial,
            filename: self.filename,
            data: self.data,
            next_chunk: self.next_chunk,
            retries: self.retries,
            byte_delay: self.byte_delay,
            debug: self.debug,
        })
    }

    fn total_packets(&self) -> u16 {
        self.data.len().div_ceil(MAX_CHUNK_LEN) as u16
    }

    fn send_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        if self.byte_delay > 0 {
            // Pace the bytes out for receivers without hardware flow control
            for &byte in frame {
                self.serial.write_all(&[byte])?;
                std::thread::sleep(Duration::from_millis(self.byte_delay as u64));
            }
            Ok(())
        } else {
            self.serial.write_all(frame)
        }
    }

    /// Read exactly buf.len() bytes; false when the port goes quiet first.
    fn fill(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<bool> {
        let mut got = 0;
        while got < buf.len() {
            match self.serial.read_timeout(&mut buf[got..], timeout) {
                Ok(0) => return Ok(false),
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Scan the inbound stream for one well-formed response frame. Malformed
    /// or checksum-failing frames are skipped; `None` means the timeout fired
    /// before a response arrived.
    fn read_response(&mut self, timeout: Duration) -> std::io::Result<Option<Response>> {
        loop {
            let mut byte = [0u8; 1];
            match self.serial.read_timeout(&mut byte, timeout) {
                Ok(0) => return Ok(None),
                Ok(_) if byte[0] == HEADER => {
                    let mut rest = [0u8; 2];
                    if !self.fill(&mut rest, timeout)? {
                        return Ok(None);
                    }
                    if rest[1] == checksum(&[HEADER, rest[0]]) {
                        if let Some(response) = Response::from_command(rest[0]) {
                            return Ok(Some(response));
                        }
                    }
                    if self.debug { println!("Skipping malformed response frame"); }
                }
                Ok(_) => {
                    if self.debug { println!("Skipping stray byte 0x{:02X}", byte[0]); }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Shared retry bookkeeping for the wait states: bump the counter and
    /// fail once the frame has been attempted MAX_RETRIES times.
    fn check_retries(&mut self, phase: &'static str) -> Result<(), SenderError> {
        self.retries += 1;
        if self.retries >= MAX_RETRIES {
            Err(SenderError::RetriesExhausted(phase))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<SendFileStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let frame = build_file_start(&fsm.filename, fsm.data.len() as u32);
        fsm.send_frame(&frame)?;
        if fsm.debug {
            println!("Sent: FILE_START {} ({} bytes, {} packets)",
                     fsm.filename, fsm.data.len(), fsm.total_packets());
        }

        let next = fsm.transition::<WaitReady>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<WaitReady> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        match fsm.read_response(Duration::from_secs(5))? {
            Some(Response::Ready) => {
                if fsm.debug { println!("Received: READY"); }
                fsm.retries = 0;
                if fsm.data.is_empty() {
                    let next = fsm.transition::<SendFileEnd>();
                    Ok(next as Box<dyn SenderState>)
                } else {
                    let next = fsm.transition::<SendDataPacket>();
                    Ok(next as Box<dyn SenderState>)
                }
            }
            other => {
                if fsm.debug { println!("No READY (got {:?}), resending FILE_START", other); }
                fsm.check_retries("FILE_START")?;
                let next = fsm.transition::<SendFileStart>();
                Ok(next as Box<dyn SenderState>)
            }
        }
    }
}

impl SenderState for SenderFsm<SendDataPacket> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let start = fsm.next_chunk * MAX_CHUNK_LEN;
        let end = (start + MAX_CHUNK_LEN).min(fsm.data.len());
        let seq_num = (fsm.next_chunk + 1) as u16;

        let frame = build_file_data(seq_num, &fsm.data[start..end]);
        fsm.send_frame(&frame)?;
        if fsm.debug {
            println!("Sent: FILE_DATA packet {}/{} ({} bytes)",
                     seq_num, fsm.total_packets(), end - start);
        }

        let next = fsm.transition::<WaitDataAck>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<WaitDataAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        match fsm.read_response(Duration::from_secs(2))? {
            Some(Response::Ack) => {
                if fsm.debug { println!("Received: ACK"); }
                fsm.retries = 0;
                fsm.next_chunk += 1;

                if fsm.next_chunk * MAX_CHUNK_LEN >= fsm.data.len() {
                    let next = fsm.transition::<SendFileEnd>();
                    Ok(next as Box<dyn SenderState>)
                } else {
                    let next = fsm.transition::<SendDataPacket>();
                    Ok(next as Box<dyn SenderState>)
                }
            }
            other => {
                if fsm.debug {
                    println!("No ACK for packet {} (got {:?}), retransmitting",
                             fsm.next_chunk + 1, other);
                }
                fsm.check_retries("FILE_DATA")?;
                let next = fsm.transition::<SendDataPacket>();
                Ok(next as Box<dyn SenderState>)
            }
        }
    }
}

impl SenderState for SenderFsm<SendFileEnd> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let frame = build_file_end(fsm.total_packets());
        fsm.send_frame(&frame)?;
        if fsm.debug { println!("Sent: FILE_END ({} packets)", fsm.total_packets()); }

        let next = fsm.transition::<WaitEndAck>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<WaitEndAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        match fsm.read_response(Duration::from_secs(5))? {
            Some(Response::Ack) => {
                if fsm.debug { println!("Received: final ACK"); }
                Err(SenderError::TransferComplete)
            }
            other => {
                if fsm.debug { println!("No final ACK (got {:?}), resending FILE_END", other); }
                fsm.check_retries("FILE_END")?;
                let next = fsm.transition::<SendFileEnd>();
                Ok(next as Box<dyn SenderState>)
            }
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<SendFileStart> {
    /// Read the file and validate it against the receiver's limits before
    /// any wire traffic happens.
    pub fn new(
        serial: Box<dyn SerialPort>,
        path: &Path,
        byte_delay: u8,
        debug: bool,
    ) -> Result<Box<dyn SenderState>, SenderError> {
        let data = std::fs::read(path)?;
        if data.len() > MAX_FILE_SIZE {
            return Err(SenderError::FileTooLarge(data.len()));
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| SenderError::InvalidFilename(path.display().to_string()))?;
        if filename.len() > MAX_FILENAME_LEN - 1 {
            return Err(SenderError::InvalidFilename(filename));
        }

        Ok(Box::new(SenderFsm {
            state: PhantomData::<SendFileStart>,
            serial,
            filename,
            data,
            next_chunk: 0,
            retries: 0,
            byte_delay,
            debug,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;
    use std::path::PathBuf;

    fn run_sender(mut fsm: Box<dyn SenderState>) -> Result<(), SenderError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn temp_file(name: &str, content: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).expect("should write temp file");
        path
    }

    #[test]
    fn test_send_small_file() {
        let path = temp_file("uflink_send_small.txt", b"hello world");

        let mut responses = Vec::new();
        MockSerialPort::push_frame(&mut responses, &Response::Ready.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());

        let mut expected_writes = Vec::new();
        expected_writes.extend(build_file_start("uflink_send_small.txt", 11));
        expected_writes.extend(build_file_data(1, b"hello world"));
        expected_writes.extend(build_file_end(1));

        let mock = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = SenderFsm::new(mock, &path, 0, true).expect("should construct");

        run_sender(fsm).expect("transfer should complete");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_send_retransmits_on_nack() {
        let path = temp_file("uflink_send_nack.txt", b"retry me");

        let mut responses = Vec::new();
        MockSerialPort::push_frame(&mut responses, &Response::Ready.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Nack.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());

        let mut expected_writes = Vec::new();
        expected_writes.extend(build_file_start("uflink_send_nack.txt", 8));
        expected_writes.extend(build_file_data(1, b"retry me"));
        expected_writes.extend(build_file_data(1, b"retry me"));
        expected_writes.extend(build_file_end(1));

        let mock = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = SenderFsm::new(mock, &path, 0, true).expect("should construct");

        run_sender(fsm).expect("transfer should complete after retransmit");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_ready_timeout_resends_file_start() {
        let path = temp_file("uflink_send_timeout.txt", b"x");

        let mut responses = vec![None];
        MockSerialPort::push_frame(&mut responses, &Response::Ready.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());

        let mut expected_writes = Vec::new();
        expected_writes.extend(build_file_start("uflink_send_timeout.txt", 1));
        expected_writes.extend(build_file_start("uflink_send_timeout.txt", 1));
        expected_writes.extend(build_file_data(1, b"x"));
        expected_writes.extend(build_file_end(1));

        let mock = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = SenderFsm::new(mock, &path, 0, true).expect("should construct");

        run_sender(fsm).expect("transfer should complete after a timeout");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_retries_exhausted() {
        let path = temp_file("uflink_send_reject.txt", b"never");

        let mut responses = Vec::new();
        for _ in 0..MAX_RETRIES {
            MockSerialPort::push_frame(&mut responses, &Response::Nack.encode());
        }

        let mut expected_writes = Vec::new();
        for _ in 0..MAX_RETRIES {
            expected_writes.extend(build_file_start("uflink_send_reject.txt", 5));
        }

        let mock = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = SenderFsm::new(mock, &path, 0, true).expect("should construct");

        match run_sender(fsm) {
            Err(SenderError::RetriesExhausted(phase)) => assert_eq!(phase, "FILE_START"),
            other => panic!("expected RetriesExhausted, got {:?}", other.err()),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_send_multi_packet_file() {
        let content: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
        let path = temp_file("uflink_send_multi.bin", &content);

        let mut responses = Vec::new();
        MockSerialPort::push_frame(&mut responses, &Response::Ready.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());

        let mut expected_writes = Vec::new();
        expected_writes.extend(build_file_start("uflink_send_multi.bin", 300));
        expected_writes.extend(build_file_data(1, &content[..MAX_CHUNK_LEN]));
        expected_writes.extend(build_file_data(2, &content[MAX_CHUNK_LEN..]));
        expected_writes.extend(build_file_end(2));

        let mock = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = SenderFsm::new(mock, &path, 0, true).expect("should construct");

        run_sender(fsm).expect("transfer should complete");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_send_empty_file() {
        let path = temp_file("uflink_send_empty.bin", b"");

        let mut responses = Vec::new();
        MockSerialPort::push_frame(&mut responses, &Response::Ready.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());

        let mut expected_writes = Vec::new();
        expected_writes.extend(build_file_start("uflink_send_empty.bin", 0));
        expected_writes.extend(build_file_end(0));

        let mock = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = SenderFsm::new(mock, &path, 0, true).expect("should construct");

        run_sender(fsm).expect("empty transfer should complete");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rejects_oversized_file() {
        let content = vec![0u8; MAX_FILE_SIZE + 1];
        let path = temp_file("uflink_send_too_big.bin", &content);

        let mock = Box::new(MockSerialPort::new(vec![], vec![]));
        match SenderFsm::new(mock, &path, 0, false) {
            Err(SenderError::FileTooLarge(size)) => assert_eq!(size, MAX_FILE_SIZE + 1),
            other => panic!("expected FileTooLarge, got {:?}", other.err()),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stray_bytes_before_response_are_skipped() {
        let path = temp_file("uflink_send_noise.txt", b"noisy");

        let mut responses = vec![Some(0x00), Some(0x42)];
        MockSerialPort::push_frame(&mut responses, &Response::Ready.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());
        MockSerialPort::push_frame(&mut responses, &Response::Ack.encode());

        let mut expected_writes = Vec::new();
        expected_writes.extend(build_file_start("uflink_send_noise.txt", 5));
        expected_writes.extend(build_file_data(1, b"noisy"));
        expected_writes.extend(build_file_end(1));

        let mock = Box::new(MockSerialPort::new(responses, expected_writes));
        let fsm = SenderFsm::new(mock, &path, 0, true).expect("should construct");

        run_sender(fsm).expect("transfer should complete despite line noise");

        std::fs::remove_file(&path).ok();
    }
}
