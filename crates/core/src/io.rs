//! Big-endian cursor and sink used by the class file decoder and encoder.

use grafter_utils::errors::ClassFormatError;

/// A forward-only cursor over class file bytes.
///
/// All multi-byte reads are big-endian, as mandated by the class file format.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current offset from the start of the buffer.
    pub const fn pos(&self) -> usize {
        self.position
    }

    /// Total length of the underlying buffer.
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the underlying buffer is empty.
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of unread bytes.
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Moves the cursor to an absolute offset.
    pub fn seek(&mut self, pos: usize) -> Result<(), ClassFormatError> {
        if pos > self.data.len() {
            return Err(ClassFormatError::UnexpectedEof(pos));
        }
        self.position = pos;
        Ok(())
    }

    /// Reads `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .position
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::UnexpectedEof(self.position))?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ClassFormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ClassFormatError> {
        Ok(i8::from_be_bytes(self.array()?))
    }

    pub fn u16(&mut self) -> Result<u16, ClassFormatError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16, ClassFormatError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ClassFormatError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, ClassFormatError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, ClassFormatError> {
        Ok(u64::from_be_bytes(self.array()?))
    }
}

/// Big-endian writes onto a growable buffer.
pub trait ByteSink {
    fn put_u8(&mut self, value: u8);
    fn put_u16(&mut self, value: u16);
    fn put_u32(&mut self, value: u32);
    fn put_bytes(&mut self, bytes: &[u8]);
}

impl ByteSink for Vec<u8> {
    fn put_u8(&mut self, value: u8) {
        self.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}
