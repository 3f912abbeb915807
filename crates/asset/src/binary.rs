//! Little-endian cursor over an in-memory model/motion file.

use std::fmt;

use anyhow::{Result, bail};
use corelib::{Quat, Vec2, Vec3, Vec4};

pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            bail!(
                "unexpected end of data reading {what} at offset {} (need {len}, have {})",
                self.pos,
                self.remaining()
            );
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.bytes(N, what)?);
        Ok(buf)
    }

    pub fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    pub fn u16(&mut self, what: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    pub fn i16(&mut self, what: &str) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array(what)?))
    }

    pub fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    pub fn f32(&mut self, what: &str) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array(what)?))
    }

    pub fn vec2(&mut self, what: &str) -> Result<Vec2> {
        Ok(Vec2::new(self.f32(what)?, self.f32(what)?))
    }

    pub fn vec3(&mut self, what: &str) -> Result<Vec3> {
        Ok(Vec3::new(self.f32(what)?, self.f32(what)?, self.f32(what)?))
    }

    pub fn vec4(&mut self, what: &str) -> Result<Vec4> {
        Ok(Vec4::new(
            self.f32(what)?,
            self.f32(what)?,
            self.f32(what)?,
            self.f32(what)?,
        ))
    }

    /// Quaternion stored as x, y, z, w.
    pub fn quat(&mut self, what: &str) -> Result<Quat> {
        let v = self.vec4(what)?;
        Ok(Quat::from_xyzw(v.x, v.y, v.z, v.w))
    }

    /// Fixed-width NUL-padded name field.
    pub fn name(&mut self, width: usize, what: &str) -> Result<RawName> {
        Ok(RawName::from_padded(self.bytes(width, what)?))
    }

    /// Guard element counts against the bytes actually left, so a corrupt
    /// count fails fast instead of reserving gigabytes.
    pub fn check_count(&self, count: usize, element_size: usize, what: &str) -> Result<()> {
        if count.saturating_mul(element_size) > self.remaining() {
            bail!(
                "{what} count {count} exceeds remaining data ({} bytes at offset {})",
                self.remaining(),
                self.pos
            );
        }
        Ok(())
    }
}

/// Name bytes as stored in the file, cut at the first NUL.
///
/// Source files use a legacy multi-byte encoding; the bytes are kept verbatim
/// and only rendered lossily for display and name matching.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct RawName(Vec<u8>);

impl RawName {
    pub fn from_padded(bytes: &[u8]) -> Self {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Self(bytes[..end].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&str> for RawName {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for RawName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for RawName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawName({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Test-side counterpart of [`ByteReader`] for building fixture files.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ByteWriter {
    pub buf: Vec<u8>,
}

#[cfg(test)]
impl ByteWriter {
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }
    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
    pub fn floats(&mut self, vs: &[f32]) -> &mut Self {
        for v in vs {
            self.f32(*v);
        }
        self
    }
    pub fn padded(&mut self, s: &[u8], width: usize) -> &mut Self {
        let mut field = vec![0u8; width];
        field[..s.len()].copy_from_slice(s);
        self.buf.extend_from_slice(&field);
        self
    }
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_values() {
        let mut w = ByteWriter::default();
        w.u16(0x1234).i16(-1).u32(7).f32(1.5);
        let mut r = ByteReader::new(&w.buf);
        assert_eq!(r.u16("a").unwrap(), 0x1234);
        assert_eq!(r.i16("b").unwrap(), -1);
        assert_eq!(r.u32("c").unwrap(), 7);
        assert_eq!(r.f32("d").unwrap(), 1.5);
        assert!(r.is_empty());
    }

    #[test]
    fn truncation_names_the_field() {
        let mut r = ByteReader::new(&[1, 2]);
        let err = r.u32("vertex count").unwrap_err();
        assert!(err.to_string().contains("vertex count"));
    }

    #[test]
    fn names_stop_at_nul_and_keep_raw_bytes() {
        let mut w = ByteWriter::default();
        w.padded(&[0x83, 0x7e, b'k'], 20);
        let mut r = ByteReader::new(&w.buf);
        let name = r.name(20, "name").unwrap();
        assert_eq!(name.as_bytes(), &[0x83, 0x7e, b'k']);
        assert_eq!(r.position(), 20);
        assert!(name.to_lossy().ends_with('k'));
    }

    #[test]
    fn count_guard() {
        let r = ByteReader::new(&[0; 8]);
        assert!(r.check_count(2, 4, "x").is_ok());
        assert!(r.check_count(3, 4, "x").is_err());
    }
}
