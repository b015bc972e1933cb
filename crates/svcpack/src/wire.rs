//! Flat little-endian cursor used by every svcpack codec.

use crate::Error;
use crate::Result;

/// Append-only byte writer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(64) }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn u8(&mut self, v: u8) { self.buf.push(v); }
    pub fn bool(&mut self, v: bool) { self.buf.push(v as u8); }
    pub fn u32(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn u64(&mut self, v: u64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn i64(&mut self, v: i64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    pub fn f64(&mut self, v: f64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Writes a `u32` length followed by the bytes.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.count(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    pub fn str(&mut self, v: &str) -> Result<()> {
        self.bytes(v.as_bytes())
    }

    /// Writes a collection length.
    pub fn count(&mut self, n: usize) -> Result<()> {
        let n = u32::try_from(n).map_err(|_| Error::BlobTooLarge(n))?;
        self.u32(n);
        Ok(())
    }
}

/// Bounds-checked reader over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails unless every byte was consumed.
    pub fn finish(&self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    pub fn raw(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.raw(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> { Ok(self.array::<1>()?[0]) }
    pub fn u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.array()?)) }
    pub fn u64(&mut self) -> Result<u64> { Ok(u64::from_le_bytes(self.array()?)) }
    pub fn i64(&mut self) -> Result<i64> { Ok(i64::from_le_bytes(self.array()?)) }
    pub fn f64(&mut self) -> Result<f64> { Ok(f64::from_le_bytes(self.array()?)) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidTag(b)),
        }
    }

    pub fn count(&mut self) -> Result<usize> {
        Ok(self.u32()? as usize)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let n = self.count()?;
        self.raw(n)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        std::str::from_utf8(self.bytes()?).map_err(|_| Error::InvalidUtf8)
    }
}
