use std::io::Cursor;
use std::io::Read;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::error::{Error, Result};

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_SEQUENCE: u8 = 0x30;

const MAX_LENGTH_OCTETS: usize = std::mem::size_of::<usize>();

/// Number of octets needed to encode `len` as a BER length field.
///
/// Short form (one octet) below 128, otherwise one octet carrying the count
/// of the big-endian length octets that follow.
pub fn length_of_length(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        1 + len_octets(len)
    }
}

/// Full size of a TLV with a single-octet tag around `content` bytes.
pub fn tlv_len(content: usize) -> usize {
    1 + length_of_length(content) + content
}

/// Content octets of a non-negative INTEGER in minimal two's complement.
pub fn int_len(val: u32) -> usize {
    if val < 0x80 {
        1
    } else if val < 0x8000 {
        2
    } else if val < 0x80_0000 {
        3
    } else if val < 0x8000_0000 {
        4
    } else {
        5
    }
}

fn len_octets(len: usize) -> usize {
    let bits = usize::BITS - len.leading_zeros();
    bits.div_ceil(8) as usize
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    cursor.read_u8().map_err(|_| Error::Incomplete)
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    let len = cursor.get_ref().len() as u64;
    len.saturating_sub(cursor.position()) as usize
}

pub fn read_tag(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    read_u8(cursor)
}

pub fn expect_tag(cursor: &mut Cursor<&[u8]>, expected: u8) -> Result<()> {
    let found = read_tag(cursor)?;
    if found != expected {
        return Err(Error::UnexpectedTag { expected, found });
    }
    Ok(())
}

pub fn read_size(cursor: &mut Cursor<&[u8]>) -> Result<usize> {
    let b1 = read_u8(cursor)? as usize;
    if b1 & 0x80 == 0 {
        return Ok(b1);
    }
    let size = b1 & 0x7f;
    if size == 0 {
        return Err(Error::malformed("indefinite length is not supported"));
    }
    if size > MAX_LENGTH_OCTETS {
        return Err(Error::malformed(format!("{} length octets", size)));
    }
    let mut out = 0;
    for _ in 0..size {
        let c = read_u8(cursor)? as usize;
        out = (out << 8) | c;
    }
    Ok(out)
}

/// Reads a length field from the start of `data`.
///
/// Returns the decoded length and the number of octets the field used.
pub fn parse_length(data: &[u8]) -> Result<(usize, usize)> {
    let mut cursor = Cursor::new(data);
    let len = read_size(&mut cursor)?;
    Ok((len, cursor.position() as usize))
}

fn read_uint_value(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let size = read_size(cursor)?;
    if size == 0 || size > 5 {
        return Err(Error::malformed(format!("integer of {} octets", size)));
    }
    let mut out: u64 = 0;
    for i in 0..size {
        let c = read_u8(cursor)?;
        if i == 0 && c & 0x80 != 0 {
            return Err(Error::malformed("negative integer"));
        }
        out = (out << 8) | c as u64;
    }
    u32::try_from(out).map_err(|_| Error::malformed("integer out of range"))
}

pub fn read_uint(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    expect_tag(cursor, TAG_INTEGER)?;
    read_uint_value(cursor)
}

pub fn read_enum(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    expect_tag(cursor, TAG_ENUMERATED)?;
    read_uint_value(cursor)
}

/// Reads the length and value of a TLV whose tag was already consumed.
pub fn read_value(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let size = read_size(cursor)?;
    if size > remaining(cursor) {
        return Err(Error::Incomplete);
    }
    let mut buf = vec![0; size];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_octet_string(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    expect_tag(cursor, TAG_OCTET_STRING)?;
    read_value(cursor)
}

pub fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let buf = read_octet_string(cursor)?;
    String::from_utf8(buf).map_err(|_| Error::InvalidUtf8)
}

const PREALLOC_MAX: usize = 64 * 1024;

/// Output buffer for BER encoding.
///
/// A limited encoder refuses any write that would exceed its limit and
/// reports `BufferOverflow` before touching the buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
    limit: Option<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            limit: None,
        }
    }

    /// `limit` only bounds the output; at most `PREALLOC_MAX` bytes are
    /// reserved up front.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(limit.min(PREALLOC_MAX)),
            limit: Some(limit),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn remaining(&self) -> usize {
        match self.limit {
            Some(limit) => limit.saturating_sub(self.buffer.len()),
            None => isize::MAX as usize - self.buffer.len(),
        }
    }

    pub fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.remaining();
        if needed > available {
            return Err(Error::BufferOverflow { needed, available });
        }
        Ok(())
    }

    pub fn write_tag(&mut self, tag: u8) -> Result<()> {
        self.ensure(1)?;
        self.buffer.write_u8(tag)?;
        Ok(())
    }

    pub fn write_len(&mut self, len: usize) -> Result<()> {
        self.ensure(length_of_length(len))?;
        if len < 0x80 {
            self.buffer.write_u8(len as u8)?;
        } else {
            let n = len_octets(len);
            self.buffer.write_u8(0x80 | n as u8)?;
            self.buffer.write_uint::<BigEndian>(len as u64, n)?;
        }
        Ok(())
    }

    pub fn write_header(&mut self, tag: u8, len: usize) -> Result<()> {
        self.ensure(1 + length_of_length(len))?;
        self.write_tag(tag)?;
        self.write_len(len)
    }

    pub fn write_bytes(&mut self, val: &[u8]) -> Result<()> {
        self.ensure(val.len())?;
        self.buffer.extend_from_slice(val);
        Ok(())
    }

    /// INTEGER whose value fits a single content octet (0..=127).
    pub fn write_small_int(&mut self, val: u8) -> Result<()> {
        if val >= 0x80 {
            return Err(Error::malformed(format!("{} does not fit one octet", val)));
        }
        self.ensure(3)?;
        self.write_header(TAG_INTEGER, 1)?;
        self.buffer.write_u8(val)?;
        Ok(())
    }

    fn write_uint_with_tag(&mut self, tag: u8, val: u32) -> Result<()> {
        let n = int_len(val);
        self.ensure(tlv_len(n))?;
        self.write_header(tag, n)?;
        self.buffer.write_uint::<BigEndian>(val as u64, n)?;
        Ok(())
    }

    pub fn write_int(&mut self, val: u32) -> Result<()> {
        self.write_uint_with_tag(TAG_INTEGER, val)
    }

    pub fn write_enum(&mut self, val: u32) -> Result<()> {
        self.write_uint_with_tag(TAG_ENUMERATED, val)
    }

    pub fn write_octet_string(&mut self, val: &[u8]) -> Result<()> {
        self.write_octet_string_with_tag(TAG_OCTET_STRING, val)
    }

    pub fn write_octet_string_with_tag(&mut self, tag: u8, val: &[u8]) -> Result<()> {
        self.ensure(tlv_len(val.len()))?;
        self.write_header(tag, val.len())?;
        self.buffer.extend_from_slice(val);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_size_forms() {
        assert_eq!(read_size(&mut Cursor::new(&[0x82, 0x27, 0x32][..])).unwrap(), 10034);
        assert_eq!(read_size(&mut Cursor::new(&[0x08][..])).unwrap(), 8);
        assert!(read_size(&mut Cursor::new(&[0x80][..])).is_err());
        assert!(read_size(&mut Cursor::new(&[0x82, 0x01][..])).unwrap_err().is_incomplete());
    }

    #[test]
    fn write_int_minimal() {
        let mut e = Encoder::new();
        e.write_int(127).unwrap();
        assert_eq!(e.into_vec(), vec![0x02, 0x01, 0x7f]);

        let mut e = Encoder::new();
        e.write_int(128).unwrap();
        assert_eq!(e.into_vec(), vec![0x02, 0x02, 0x0, 0x80]);

        let mut e = Encoder::new();
        e.write_int(256).unwrap();
        assert_eq!(e.into_vec(), vec![0x02, 0x02, 0x1, 0x0]);

        let mut e = Encoder::new();
        e.write_int(u32::MAX).unwrap();
        assert_eq!(e.into_vec(), vec![0x02, 0x05, 0x0, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn length_round_trip() {
        for n in [0usize, 1, 127, 128, 255, 256, 65535, 65536] {
            let mut e = Encoder::new();
            e.write_len(n).unwrap();
            let bytes = e.into_vec();
            assert_eq!(bytes.len(), length_of_length(n), "n = {}", n);
            assert_eq!(bytes[0] & 0x80 == 0, n < 128, "n = {}", n);
            assert_eq!(parse_length(&bytes).unwrap(), (n, bytes.len()));
        }
    }

    #[test]
    fn long_form_layout() {
        let mut e = Encoder::new();
        e.write_len(128).unwrap();
        assert_eq!(e.as_bytes(), &[0x81, 0x80]);

        let mut e = Encoder::new();
        e.write_len(65536).unwrap();
        assert_eq!(e.as_bytes(), &[0x83, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn limited_encoder_never_truncates() {
        let mut e = Encoder::with_limit(4);
        e.write_tag(0x30).unwrap();
        let err = e.write_octet_string(b"abc").unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { needed: 5, available: 3 }));
        assert_eq!(e.as_bytes(), &[0x30]);
    }

    #[test]
    fn read_string_rejects_bad_utf8() {
        let data = [0x04, 0x02, 0xc3, 0x28];
        assert!(matches!(
            read_string(&mut Cursor::new(&data[..])),
            Err(Error::InvalidUtf8)
        ));
    }

    #[test]
    fn read_uint_rejects_negative() {
        let data = [0x02, 0x01, 0xff];
        assert!(read_uint(&mut Cursor::new(&data[..])).is_err());
    }
}
