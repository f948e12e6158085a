//! Prompt-delimited stream framer
//!
//! Device output arrives as arbitrary chunks. The framer buffers them and cuts
//! a frame every time the device prompt appears. Frames are pulled lazily, so
//! a caller that stops iterating early leaves the remaining frames buffered
//! for the next [`Framer::feed`].

use std::fmt;

use tracing::{trace, warn};

use crate::error::FramerError;
use crate::DeviceType;

/// One message from the device: the trimmed text preceding a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    text: String,
}

impl Frame {
    fn from_bytes(raw: &[u8]) -> Self {
        Self {
            text: String::from_utf8_lossy(raw).trim().to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Most bytes held without a prompt before the buffer is discarded
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Streaming framer bound to one device type
#[derive(Debug, Clone)]
pub struct Framer {
    device_type: DeviceType,
    buffer: Vec<u8>,
    /// Offset where the next delimiter search starts
    scan_from: usize,
}

impl Framer {
    /// Create a framer for the given device type
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            buffer: Vec::with_capacity(256),
            scan_from: 0,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Drop buffered bytes and rebind to a (possibly different) device type
    pub fn reset(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
        self.clear();
    }

    /// Drop buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }

    /// Bytes received but not yet consumed by a frame
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Append bytes and return an iterator over the completed frames
    ///
    /// Fails without buffering anything when the device type has no
    /// delimiter.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Frames<'_>, FramerError> {
        let delimiter = self
            .device_type
            .delimiter()
            .ok_or(FramerError::Configuration {
                device_type: self.device_type,
            })?;

        self.buffer.extend_from_slice(bytes);
        trace!(
            "Buffered {} bytes ({} pending)",
            bytes.len(),
            self.buffer.len()
        );

        Ok(Frames {
            framer: self,
            delimiter,
        })
    }

    fn next_frame(&mut self, delimiter: &[u8]) -> Option<Frame> {
        let start = self.scan_from.min(self.buffer.len());
        match find(&self.buffer[start..], delimiter) {
            Some(offset) => {
                let end = start + offset;
                let mut raw: Vec<u8> = self.buffer.drain(..end + delimiter.len()).collect();
                raw.truncate(end);
                self.scan_from = 0;
                Some(Frame::from_bytes(&raw))
            }
            None => {
                // A partial prompt may sit at the tail
                let keep = delimiter.len().saturating_sub(1);
                if self.buffer.len() > MAX_BUFFERED {
                    let dropped = self.buffer.len() - keep.min(self.buffer.len());
                    warn!(
                        "No {} prompt in {} bytes, discarding {} buffered bytes",
                        self.device_type,
                        self.buffer.len(),
                        dropped
                    );
                    self.buffer.drain(..dropped);
                }
                self.scan_from = self.buffer.len().saturating_sub(keep);
                None
            }
        }
    }
}

/// Lazy iterator over the frames completed by a [`Framer::feed`] call
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut Framer,
    delimiter: &'static [u8],
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.framer.next_frame(self.delimiter)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
