//! Byte-level request/response driver for the module serial chain.
//!
//! The wire format is fixed by the module firmware: a read request is
//! `[addr << 1, reg, len]` answered by `[addr << 1, reg, len, data.., crc]`,
//! a write request is `[(addr << 1) | 1, reg, value, crc]` answered by an
//! identical four-byte echo. The CRC is CRC-8 poly 0x07 over every byte but
//! the trailing one. Bit 0 of the first byte selects read/write framing at
//! the physical layer and must be preserved exactly.
//!
//! Transport failures are returned, never panicked on; the pack aggregator
//! decides whether to retry, skip the module, or latch a line fault.

use core::fmt;

use heapless::Vec;

pub mod registers;

/// Highest assignable module address.
pub const MAX_MODULE_ADDR: u8 = 0x3E;
/// Address every module listens on.
pub const BROADCAST_ADDR: u8 = 0x3F;
/// Largest response frame the driver will collect.
pub const MAX_PAYLOAD: usize = 128;

/// Byte transport to the module chain.
///
/// The firmware backs this with a USART at 612,500 baud; the emulator and the
/// test suites back it with an in-memory simulated chain. Implementations own
/// pacing: `settle` must block long enough for a response of the hinted size
/// to arrive, and `recv` drains whatever has arrived without blocking.
pub trait SerialLink {
    /// Queue bytes for transmission toward the chain.
    fn send(&mut self, bytes: &[u8]);

    /// Drain received bytes into `buf`, returning how many were copied.
    fn recv(&mut self, buf: &mut [u8]) -> usize;

    /// Discard any unread bytes in the receive direction.
    fn flush_input(&mut self);

    /// Block for `ms` milliseconds while the chain produces its response.
    fn settle(&mut self, ms: u32);
}

/// Transport-level failures, reported as distinct kinds per the error taxonomy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    /// Requested read would not fit the driver's receive buffer.
    OversizeRead { requested: usize },
    /// Fewer response bytes arrived than the frame requires.
    ShortResponse { expected: usize, received: usize },
    /// Response frame failed CRC validation.
    Crc { expected: u8, received: u8 },
    /// Write echo came back short.
    ShortEcho { received: usize },
    /// Write echo carried a different checksum than the request.
    EchoCrc,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::OversizeRead { requested } => {
                write!(f, "read of {requested} bytes exceeds max payload")
            }
            BusError::ShortResponse { expected, received } => {
                write!(f, "short response: {received} of {expected} bytes")
            }
            BusError::Crc { expected, received } => {
                write!(f, "response crc {received:#04x}, computed {expected:#04x}")
            }
            BusError::ShortEcho { received } => {
                write!(f, "write echo returned {received} of 4 bytes")
            }
            BusError::EchoCrc => f.write_str("write echo checksum mismatch"),
        }
    }
}

/// CRC-8, polynomial 0x07, init 0, MSB-first, no reflection.
#[must_use]
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for byte in bytes {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Request/response driver owning the serial channel to the module chain.
pub struct ModuleBus<L> {
    link: L,
}

impl<L: SerialLink> ModuleBus<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    /// Accesses the underlying link (fault injection in tests and tooling).
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Reads `out.len()` bytes starting at `register` of module `address`.
    ///
    /// The receive direction is flushed before and after the transaction so a
    /// framing error cannot poison the next one.
    pub fn read(&mut self, address: u8, register: u8, out: &mut [u8]) -> Result<(), BusError> {
        let len = out.len();
        let frame_len = len + 4;
        if frame_len > MAX_PAYLOAD {
            return Err(BusError::OversizeRead { requested: len });
        }

        self.link.flush_input();

        let request = [address << 1, register, len as u8];
        self.link.send(&request);

        // Response time grows with the requested length.
        self.link.settle(2 * (len as u32 / 8 + 1));

        let mut frame: Vec<u8, MAX_PAYLOAD> = Vec::new();
        frame.resize(frame_len, 0).expect("frame_len checked above");
        let received = self.link.recv(&mut frame);
        if received < frame_len {
            self.link.flush_input();
            return Err(BusError::ShortResponse {
                expected: frame_len,
                received,
            });
        }
        self.link.flush_input();

        let expected = crc8(&frame[..frame_len - 1]);
        let received_crc = frame[frame_len - 1];
        if expected != received_crc {
            return Err(BusError::Crc {
                expected,
                received: received_crc,
            });
        }

        out.copy_from_slice(&frame[3..3 + len]);
        Ok(())
    }

    /// Writes one byte to `register` of module `address` (or the broadcast
    /// address) and validates the four-byte echo.
    pub fn write(&mut self, address: u8, register: u8, value: u8) -> Result<(), BusError> {
        let mut request = [(address << 1) | 1, register, value, 0];
        request[3] = crc8(&request[..3]);

        self.link.flush_input();
        self.link.send(&request);
        self.link.settle(2);

        let mut echo = [0u8; 4];
        let received = self.link.recv(&mut echo);
        if received < echo.len() {
            self.link.flush_input();
            return Err(BusError::ShortEcho { received });
        }
        self.link.flush_input();

        if echo[3] != request[3] {
            return Err(BusError::EchoCrc);
        }
        Ok(())
    }
}
