//! In-memory byte stream used for plugin state.
//!
//! The backend wraps a [`StateBuffer`] in whatever stream object the plugin
//! format wants; the session only ever sees bytes.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl StateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer positioned at the start of `data`, ready to be read.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Read for StateBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.get(self.pos..).unwrap_or(&[]);
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for StateBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for StateBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => i128::from(p),
            SeekFrom::Current(d) => self.pos as i128 + i128::from(d),
            SeekFrom::End(d) => self.data.len() as i128 + i128::from(d),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        self.pos = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;
        Ok(self.pos as u64)
    }
}

// ---------------------------------------------------------------------------
// Preset blob: [processor_len: u32 LE][processor bytes][controller bytes]
// ---------------------------------------------------------------------------

pub fn encode_preset(processor: &[u8], controller: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(processor.len())
        .map_err(|_| BridgeError::MalformedState("processor state larger than 4 GiB"))?;
    let mut blob = Vec::with_capacity(4 + processor.len() + controller.len());
    blob.extend_from_slice(&len.to_le_bytes());
    blob.extend_from_slice(processor);
    blob.extend_from_slice(controller);
    Ok(blob)
}

/// Split a preset blob into `(processor, controller)` slices.
pub fn decode_preset(blob: &[u8]) -> Result<(&[u8], &[u8])> {
    let (header, rest) = blob
        .split_first_chunk::<4>()
        .ok_or(BridgeError::MalformedState("preset shorter than its header"))?;
    let len = u32::from_le_bytes(*header) as usize;
    if rest.len() < len {
        return Err(BridgeError::MalformedState(
            "preset shorter than its processor state",
        ));
    }
    Ok(rest.split_at(len))
}
