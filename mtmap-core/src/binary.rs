//! Big-endian primitive reads and writes over byte buffers, plus the zlib
//! helpers used by the block and schematic formats.
//!
//! Compressed sections inside a block carry no length prefix: a section ends
//! where its zlib stream ends. [`StreamProbe`] finds that boundary by feeding
//! the stream one byte at a time.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

const OUTPUT_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of data")]
    Truncated,
    #[error("corrupt compressed section: {0}")]
    Decompress(String),
    #[error("i/o error: {0}")]
    Io(io::Error),
    #[error("{len} does not fit a {width}-bit length field")]
    TooLong { len: usize, width: u8 },
    #[error("{0:?} has characters outside one byte")]
    NotLatin1(String),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(err)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStep {
    Incomplete,
    Done(Vec<u8>),
    Error(String),
}

/// Incremental zlib inflater that reports whether the bytes pushed so far
/// form a complete stream.
pub struct StreamProbe {
    inflater: Decompress,
    output: Vec<u8>,
}

impl StreamProbe {
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            output: Vec::with_capacity(OUTPUT_CHUNK),
        }
    }

    pub fn consumed(&self) -> u64 {
        self.inflater.total_in()
    }

    pub fn push(&mut self, byte: u8) -> ProbeStep {
        let input = [byte];
        let mut consumed = 0usize;

        loop {
            if self.output.capacity() - self.output.len() < OUTPUT_CHUNK {
                self.output.reserve(OUTPUT_CHUNK);
            }

            let in_before = self.inflater.total_in();
            let out_before = self.inflater.total_out();
            let status = match self.inflater.decompress_vec(
                &input[consumed..],
                &mut self.output,
                FlushDecompress::None,
            ) {
                Ok(status) => status,
                Err(err) => return ProbeStep::Error(err.to_string()),
            };

            let read = (self.inflater.total_in() - in_before) as usize;
            let produced = self.inflater.total_out() - out_before;
            consumed += read;

            if status == Status::StreamEnd {
                return ProbeStep::Done(std::mem::take(&mut self.output));
            }

            let output_full = self.output.len() == self.output.capacity();
            if output_full {
                continue;
            }
            if consumed == input.len() || (read == 0 && produced == 0) {
                return ProbeStep::Incomplete;
            }
        }
    }
}

impl Default for StreamProbe {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> &'a [u8] {
        let data = *self.cursor.get_ref();
        &data[self.position().min(data.len())..]
    }

    pub fn is_empty(&self) -> bool {
        self.remaining().is_empty()
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.cursor.read_i8()?)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(self.cursor.read_i16::<BigEndian>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.cursor.read_i32::<BigEndian>()?)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        let mut bytes = vec![0; len];
        self.cursor.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    pub fn read_blob_u16(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    pub fn read_blob_u32(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string_u16(&mut self) -> Result<String, CodecError> {
        Ok(latin1_decode(&self.read_blob_u16()?))
    }

    pub fn read_string_u32(&mut self) -> Result<String, CodecError> {
        Ok(latin1_decode(&self.read_blob_u32()?))
    }

    /// Reads bytes up to and including the first occurrence of `marker`.
    pub fn read_until(&mut self, marker: &[u8]) -> Result<Vec<u8>, CodecError> {
        let rest = self.remaining();
        let end = rest
            .windows(marker.len())
            .position(|window| window == marker)
            .map(|start| start + marker.len())
            .ok_or(CodecError::Truncated)?;
        self.read_bytes(end)
    }

    /// Inflates the zlib stream starting at the cursor, leaving the cursor
    /// right after the stream's last byte.
    pub fn read_compressed(&mut self) -> Result<Vec<u8>, CodecError> {
        let mut probe = StreamProbe::new();
        loop {
            let byte = self.read_u8()?;
            match probe.push(byte) {
                ProbeStep::Incomplete => continue,
                ProbeStep::Done(payload) => return Ok(payload),
                ProbeStep::Error(reason) => return Err(CodecError::Decompress(reason)),
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        let mut bytes = [0; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut bytes = [0; 4];
        BigEndian::write_u32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut bytes = [0; 4];
        BigEndian::write_i32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a count or length as u16, refusing values past `u16::MAX`.
    pub fn write_len_u16(&mut self, len: usize) -> Result<(), CodecError> {
        let len = u16::try_from(len).map_err(|_| CodecError::TooLong { len, width: 16 })?;
        self.write_u16(len);
        Ok(())
    }

    pub fn write_blob_u16(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.write_len_u16(bytes.len())?;
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_blob_u32(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::TooLong {
            len: bytes.len(),
            width: 32,
        })?;
        self.write_u32(len);
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_string_u16(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_blob_u16(&latin1_encode(value)?)
    }

    pub fn write_compressed(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        let compressed = compress(payload)?;
        self.write_bytes(&compressed);
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Decodes one character per byte.
pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&byte| char::from(byte)).collect()
}

/// Encodes one byte per character; fails on characters above U+00FF.
pub fn latin1_encode(text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| CodecError::NotLatin1(text.to_string()))
}

pub fn compress(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Inflates a buffer that holds exactly one zlib stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| CodecError::Decompress(err.to_string()))?;
    Ok(out)
}
