// ByteBuffer - little-endian binary reader/writer
// Backs the navmesh set file and tile payload encodings

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor};

/// A byte buffer for reading/writing little-endian binary records.
/// Reads advance an internal cursor; writes always append.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

fn past_end() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "ByteBuffer read past end")
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        ByteBuffer { data, read_pos: 0 }
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Bytes left between the read position and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and hand back the written bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    // ---- Write operations (append) ----

    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn write_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    pub fn write_u16(&mut self, val: u16) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_u32(&mut self, val: u32) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_i32(&mut self, val: i32) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_f32(&mut self, val: f32) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    /// Write three consecutive f32 values
    pub fn write_vec3(&mut self, val: &[f32; 3]) {
        for v in val {
            self.write_f32(*v);
        }
    }

    /// Append `count` zero bytes
    pub fn write_zeros(&mut self, count: usize) {
        self.data.resize(self.data.len() + count, 0);
    }

    // ---- Read operations ----

    /// Cursor positioned at the read position, after checking `len` bytes are available
    fn cursor(&self, len: usize) -> io::Result<Cursor<&[u8]>> {
        if len > self.remaining() {
            return Err(past_end());
        }
        Ok(Cursor::new(&self.data[self.read_pos..self.read_pos + len]))
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let val = self.cursor(1)?.read_u8()?;
        self.read_pos += 1;
        Ok(val)
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        let val = self.cursor(2)?.read_u16::<LittleEndian>()?;
        self.read_pos += 2;
        Ok(val)
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let val = self.cursor(4)?.read_u32::<LittleEndian>()?;
        self.read_pos += 4;
        Ok(val)
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        let val = self.cursor(4)?.read_i32::<LittleEndian>()?;
        self.read_pos += 4;
        Ok(val)
    }

    pub fn read_f32(&mut self) -> io::Result<f32> {
        let val = self.cursor(4)?.read_f32::<LittleEndian>()?;
        self.read_pos += 4;
        Ok(val)
    }

    /// Read three consecutive f32 values
    pub fn read_vec3(&mut self) -> io::Result<[f32; 3]> {
        let mut cursor = self.cursor(12)?;
        let mut out = [0.0f32; 3];
        cursor.read_f32_into::<LittleEndian>(&mut out)?;
        self.read_pos += 12;
        Ok(out)
    }

    /// Read N bytes into a fresh vector
    pub fn read_bytes(&mut self, count: usize) -> io::Result<Vec<u8>> {
        if count > self.remaining() {
            return Err(past_end());
        }
        let bytes = self.data[self.read_pos..self.read_pos + count].to_vec();
        self.read_pos += count;
        Ok(bytes)
    }

    /// Skip N bytes, failing if fewer remain
    pub fn read_skip(&mut self, count: usize) -> io::Result<()> {
        if count > self.remaining() {
            return Err(past_end());
        }
        self.read_pos += count;
        Ok(())
    }
}

impl std::fmt::Display for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteBuffer(size={}, rpos={})", self.size(), self.read_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_mixed() {
        let mut buf = ByteBuffer::new();
        buf.write_i32(-7);
        buf.write_u16(0xBEEF);
        buf.write_f32(1.5);
        assert_eq!(buf.size(), 10);
        assert_eq!(buf.read_i32().unwrap(), -7);
        assert_eq!(buf.read_u16().unwrap(), 0xBEEF);
        assert_eq!(buf.read_f32().unwrap(), 1.5);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = ByteBuffer::new();
        buf.write_u32(0xDEADBEEF);
        assert_eq!(buf.contents(), &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_vec3() {
        let mut buf = ByteBuffer::new();
        buf.write_vec3(&[1.0, -2.0, 3.25]);
        assert_eq!(buf.read_vec3().unwrap(), [1.0, -2.0, 3.25]);
    }

    #[test]
    fn test_read_past_end() {
        let mut buf = ByteBuffer::from(vec![1, 2, 3]);
        let err = buf.read_u32().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        // A failed read leaves the position untouched
        assert_eq!(buf.read_pos(), 0);
        assert!(buf.read_skip(4).is_err());
        assert_eq!(buf.read_bytes(3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_write_zeros() {
        let mut buf = ByteBuffer::new();
        buf.write_u8(9);
        buf.write_zeros(3);
        assert_eq!(buf.into_inner(), vec![9, 0, 0, 0]);
    }
}
