//! Extracts Compact telegrams from a continuous byte stream.
//!
//! A stream chunk can start in the middle of a telegram, end in the middle
//! of one, or contain several. The extractor buffers unconsumed input and
//! walks a four state machine: it scans for the start marker, reads the size
//! of the first module from the header, chains through the in-band
//! next-module-size fields until one reads 0, and finally checks the
//! trailing CRC. A checksum failure discards the start marker and
//! resynchronizes on the next one.

use bytes::{Buf, Bytes, BytesMut};
use log::warn;

use crate::compact::HEADER_LEN;
use crate::decode;
use crate::envelope::{STX, TELEGRAM_CRC};

/// Start marker followed by the Compact command id. Matching on both reduces
/// false positives when scanning for the start of a telegram in garbage.
const DELIMITER: [u8; 8] = [0x02, 0x02, 0x02, 0x02, 0x01, 0x00, 0x00, 0x00];

const FIRST_MODULE_SIZE_OFFSET: usize = 28;
const NUM_LAYERS_OFFSET: usize = 20;
const NEXT_MODULE_SIZE_OFFSET: usize = 36;
const NEXT_MODULE_SIZE_OFFSET_PER_LAYER: usize = 28;
const CRC_LEN: usize = 4;

/// Declared module sizes above this many bytes are logged as suspicious but
/// honored.
pub const DEFAULT_SIZE_WARN_THRESHOLD: u32 = 5_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    WaitStx,
    WaitHeader,
    WaitModuleData,
    WaitCrc,
}

enum Step {
    Continue,
    NeedMoreData,
}

#[derive(Debug)]
pub struct CompactStreamExtractor {
    buffer: BytesMut,
    state: State,
    /// Start of the metadata block of the module currently being sized.
    module_meta_offset: usize,
    /// Combined size of all modules of the current telegram seen so far.
    payload_size: usize,
    size_warn_threshold: u32,
}

impl Default for CompactStreamExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactStreamExtractor {
    pub fn new() -> Self {
        CompactStreamExtractor {
            buffer: BytesMut::new(),
            state: State::WaitStx,
            module_meta_offset: 0,
            payload_size: 0,
            size_warn_threshold: DEFAULT_SIZE_WARN_THRESHOLD,
        }
    }

    /// Overrides the advisory threshold above which declared module sizes
    /// are logged as unusually large.
    pub fn with_size_warn_threshold(mut self, threshold: u32) -> Self {
        self.size_warn_threshold = threshold;
        self
    }

    /// Collects the given data until one or more Compact telegrams are
    /// complete and returns them, CRC checked, in stream order.
    pub fn extract_data_packages(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);
        let mut packages = Vec::new();
        loop {
            let step = match self.state {
                State::WaitStx => self.wait_for_stx(),
                State::WaitHeader => self.wait_for_header(),
                State::WaitModuleData => self.wait_for_module_data(),
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

    fn read_module_size(&self, position: usize) -> Option<u32> {
        let size = self.decode_u32(position)?;
        if size > self.size_warn_threshold {
            warn!("unusually large module size declared: {size}");
        }
        Some(size)
    }

    fn discard_stx(&mut self) {
        self.buffer.advance(STX.len());
        self.state = State::WaitStx;
    }

    fn wait_for_stx(&mut self) -> Step {
        match self
            .buffer
            .windows(DELIMITER.len())
            .position(|window| window == DELIMITER)
        {
            None => {
                // Keep enough trailing bytes for a delimiter straddling the
                // chunk boundary.
                if self.buffer.len() >= DELIMITER.len() {
                    self.buffer
                        .advance(self.buffer.len() - (DELIMITER.len() - 1));
                }
                Step::NeedMoreData
            }
            Some(position) => {
                self.buffer.advance(position);
                self.state = State::WaitHeader;
                Step::Continue
            }
        }
    }

    fn wait_for_header(&mut self) -> Step {
        if self.buffer.len() < HEADER_LEN {
            return Step::NeedMoreData;
        }
        let Some(first_module_size) = self.read_module_size(FIRST_MODULE_SIZE_OFFSET) else {
            return Step::NeedMoreData;
        };
        if first_module_size == 0 {
            warn!("size of the first module must not be 0, discarding start marker");
            self.discard_stx();
            return Step::Continue;
        }
        self.payload_size = first_module_size as usize;
        self.module_meta_offset = HEADER_LEN;
        self.state = State::WaitModuleData;
        Step::Continue
    }

    fn wait_for_module_data(&mut self) -> Step {
        if self.buffer.len() < HEADER_LEN + self.payload_size {
            return Step::NeedMoreData;
        }
        // The length check above already covers the number-of-layers field
        // unless a declared size was inconsistent; the bounds-checked read
        // keeps us safe either way.
        let Some(num_layers) = self.decode_u32(self.module_meta_offset + NUM_LAYERS_OFFSET) else {
            return Step::NeedMoreData;
        };
        let next_size_position = self.module_meta_offset
            + NEXT_MODULE_SIZE_OFFSET
            + NEXT_MODULE_SIZE_OFFSET_PER_LAYER * num_layers as usize;
        let Some(next_module_size) = self.read_module_size(next_size_position) else {
            return Step::NeedMoreData;
        };
        if next_module_size == 0 {
            self.state = State::WaitCrc;
            return Step::Continue;
        }
        self.module_meta_offset = HEADER_LEN + self.payload_size;
        self.payload_size += next_module_size as usize;
        Step::Continue
    }

    fn wait_for_crc(&mut self, packages: &mut Vec<Bytes>) -> Step {
        let total = HEADER_LEN + self.payload_size;
        if self.buffer.len() < total + CRC_LEN {
            return Step::NeedMoreData;
        }
        let Some(expected_crc) = self.decode_u32(total) else {
            return Step::NeedMoreData;
        };
        let computed_crc = TELEGRAM_CRC.checksum(&self.buffer[..total]);
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
