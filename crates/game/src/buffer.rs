//! Growable byte buffer with a sequential read cursor.
//!
//! Every wire structure is written with [`Buffer::write`] and read back with
//! [`Buffer::read`] in the same order. Fixed-size values are encoded
//! little-endian with no padding.

use std::fs;
use std::io;
use std::path::Path;

use glam::Vec3;

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("truncated buffer: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("string is missing its nul terminator")]
    MissingTerminator,
    #[error("string contains an embedded nul byte")]
    EmbeddedNul,
    #[error("string is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("buffer i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// A fixed-size value with a stable byte encoding.
pub trait Wire: Sized {
    const SIZE: usize;

    fn encode(&self, out: &mut Vec<u8>);

    /// `bytes` is exactly `SIZE` long.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_for_numbers {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Wire for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_for_numbers!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Wire for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl<T: Wire + Copy + Default, const N: usize> Wire for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn encode(&self, out: &mut Vec<u8>) {
        for value in self {
            value.encode(out);
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut values = [T::default(); N];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(T::SIZE)) {
            *value = T::decode(chunk);
        }
        values
    }
}

impl Wire for Vec3 {
    const SIZE: usize = 12;

    fn encode(&self, out: &mut Vec<u8>) {
        self.to_array().encode(out);
    }

    fn decode(bytes: &[u8]) -> Self {
        Vec3::from_array(<[f32; 3]>::decode(bytes))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    reader: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            reader: 0,
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, reader: 0 }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_bytes(data.to_vec())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BufferError> {
        fs::write(path, &self.data)?;
        Ok(())
    }

    pub fn write<T: Wire>(&mut self, value: &T) {
        self.data.reserve(T::SIZE);
        value.encode(&mut self.data);
    }

    pub fn read<T: Wire>(&mut self) -> Result<T, BufferError> {
        let bytes = self.take(T::SIZE)?;
        Ok(T::decode(bytes))
    }

    /// Writes the UTF-8 bytes followed by a nul terminator.
    pub fn write_str(&mut self, value: &str) -> Result<(), BufferError> {
        if value.as_bytes().contains(&0) {
            return Err(BufferError::EmbeddedNul);
        }
        self.data.reserve(value.len() + 1);
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        Ok(())
    }

    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let unread = &self.data[self.reader..];
        let end = unread
            .iter()
            .position(|&b| b == 0)
            .ok_or(BufferError::MissingTerminator)?;
        let value = std::str::from_utf8(&unread[..end])?.to_owned();
        self.reader += end + 1;
        Ok(value)
    }

    /// Raw concatenation; the reader must know the boundary from the schema.
    pub fn append(&mut self, other: &Buffer) {
        self.append_bytes(other.as_bytes());
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], BufferError> {
        self.take(len)
    }

    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.reader
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.reader
    }

    pub fn unread(&self) -> &[u8] {
        &self.data[self.reader..]
    }

    pub fn rewind(&mut self) {
        self.reader = 0;
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.reader = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn take(&mut self, len: usize) -> Result<&[u8], BufferError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(BufferError::Truncated {
                needed: len,
                remaining,
            });
        }
        let start = self.reader;
        self.reader += len;
        Ok(&self.data[start..start + len])
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}
