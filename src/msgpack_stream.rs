//! Extracts MSGPACK telegrams from a continuous byte stream.
//!
//! Simpler than the Compact variant: the telegram length is declared up
//! front, so the machine only scans for the start marker, reads the length
//! prefix and checks the trailing CRC. The CRC covers the MSGPACK buffer
//! only, without start marker and length prefix.

use bytes::{Buf, Bytes, BytesMut};
use log::warn;

use crate::decode;
use crate::envelope::{STX, TELEGRAM_CRC};

const LENGTH_LEN: usize = 4;
const CRC_LEN: usize = 4;

/// Declared buffer sizes above this many bytes are logged as suspicious but
/// honored.
pub const DEFAULT_SIZE_WARN_THRESHOLD: u32 = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    WaitStx,
    WaitSize,
    WaitCrc,
}

enum Step {
    Continue,
    NeedMoreData,
}

#[derive(Debug)]
pub struct MsgpackStreamExtractor {
    buffer: BytesMut,
    state: State,
    /// Declared size of the MSGPACK buffer of the current telegram.
    msgpack_size: usize,
    size_warn_threshold: u32,
}

impl Default for MsgpackStreamExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgpackStreamExtractor {
    pub fn new() -> Self {
        MsgpackStreamExtractor {
            buffer: BytesMut::new(),
            state: State::WaitStx,
            msgpack_size: 0,
            size_warn_threshold: DEFAULT_SIZE_WARN_THRESHOLD,
        }
    }

    /// Overrides the advisory threshold above which declared buffer sizes
    /// are logged as unusually large.
    pub fn with_size_warn_threshold(mut self, threshold: u32) -> Self {
        self.size_warn_threshold = threshold;
        self
    }

    /// Collects the given data until one or more MSGPACK telegrams are
    /// complete and returns them, CRC checked, in stream order.
    pub fn extract_data_packages(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);
        let mut packages = Vec::new();
        loop {
            let step = match self.state {
                State::WaitStx => self.wait_for_stx(),
                State::WaitSize => self.wait_for_size(),
                State::WaitCrc => self.wait_for_crc(&mut packages),
            };
            if let Step::NeedMoreData = step {
                break;
            }
        }
        packages
    }

    fn decode_u32(&self, position: usize) -> Option<u32> {
        decode::read_u32(&self.buffer, position)
            .ok()
            .map(|(value, _)| value)
    }

    fn discard_stx(&mut self) {
        self.buffer.advance(STX.len());
        self.state = State::WaitStx;
    }

    fn wait_for_stx(&mut self) -> Step {
        match self.buffer.windows(STX.len()).position(|window| window == STX) {
            None => {
                // Keep enough trailing bytes for a marker straddling the
                // chunk boundary.
                if self.buffer.len() >= STX.len() {
                    self.buffer.advance(self.buffer.len() - (STX.len() - 1));
                }
                Step::NeedMoreData
            }
            Some(position) => {
                self.buffer.advance(position);
                self.state = State::WaitSize;
                Step::Continue
            }
        }
    }

    fn wait_for_size(&mut self) -> Step {
        let Some(msgpack_size) = self.decode_u32(STX.len()) else {
            return Step::NeedMoreData;
        };
        if msgpack_size == 0 {
            warn!("size of the MSGPACK buffer must not be 0, discarding start marker");
            self.discard_stx();
            return Step::Continue;
        }
        if msgpack_size > self.size_warn_threshold {
            warn!("unusually large MSGPACK buffer size declared: {msgpack_size}");
        }
        self.msgpack_size = msgpack_size as usize;
        self.state = State::WaitCrc;
        Step::Continue
    }

    fn wait_for_crc(&mut self, packages: &mut Vec<Bytes>) -> Step {
        let body_start = STX.len() + LENGTH_LEN;
        let total = body_start + self.msgpack_size;
        if self.buffer.len() < total + CRC_LEN {
            return Step::NeedMoreData;
        }
        let Some(expected_crc) = self.decode_u32(total) else {
            return Step::NeedMoreData;
        };
        let computed_crc = TELEGRAM_CRC.checksum(&self.buffer[body_start..total]);
        if expected_crc != computed_crc {
            warn!("telegram checksum failed, not synchronized, discarding start marker");
            self.discard_stx();
            return Step::Continue;
        }
        packages.push(self.buffer.split_to(total + CRC_LEN).freeze());
        self.state = State::WaitStx;
        Step::Continue
    }
}
