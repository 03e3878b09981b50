use crate::{error::TlvError, message::Message};
use std::str;

/// Largest number of bytes a tag may occupy on the wire.
const MAX_TAG_BYTES: usize = 5;

/// Largest number of nibbles an encoded integer may carry.
const MAX_INT_NIBBLES: usize = 8;

/// A byte buffer meant for reading tagged records.
///
/// Every record on the wire is a tag, an encoded payload length and the
/// payload itself. Reads never copy: payloads are returned as slices of the
/// wrapped data.
///
/// ```
/// let mut bb = tlvgen_runtime::ByteBuffer::new(&[0x01, 0x01, 0x05]);
/// assert_eq!(bb.peek_tag(), Ok(1));
/// assert_eq!(bb.unmarshal_int(1), Ok(5));
/// assert!(bb.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct ByteBuffer<'a> {
    data:  &'a [u8],
    index: usize,
}

impl<'a> ByteBuffer<'a> {
    /// Create a new ByteBuffer that wraps the provided byte slice.
    pub fn new(data: &'a [u8]) -> ByteBuffer<'a> {
        ByteBuffer { data, index: 0 }
    }

    /// Retrieves the underlying byte slice.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Retrieves the current read position.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.index..]
    }

    /// Reads the tag at the current position without consuming it.
    pub fn peek_tag(&self) -> Result<u32, TlvError> {
        decode_tag(self.rest()).map(|(tag, _)| tag)
    }

    /// Reads and consumes a tag.
    pub fn read_tag(&mut self) -> Result<u32, TlvError> {
        let (tag, used) = decode_tag(self.rest())?;
        self.index += used;
        Ok(tag)
    }

    /// Reads and consumes a nibble-encoded integer.
    pub fn read_int(&mut self) -> Result<u32, TlvError> {
        let (value, used) = decode_int(self.rest())?;
        self.index += used;
        Ok(value)
    }

    /// Returns the payload length of the next record without consuming it.
    pub fn payload_length(&self) -> Result<u32, TlvError> {
        let rest = self.rest();
        let (_, tag_len) = decode_tag(rest)?;
        decode_int(&rest[tag_len..]).map(|(len, _)| len)
    }

    /// Consumes a record header and checks that its payload is present.
    pub fn unmarshal_header(&mut self) -> Result<(u32, usize), TlvError> {
        let start = self.index;
        let header = self.read_header();
        if header.is_err() {
            self.index = start;
        }
        header
    }

    fn read_header(&mut self) -> Result<(u32, usize), TlvError> {
        let tag = self.read_tag()?;
        let len = self.read_int()? as usize;
        if len > self.remaining() {
            return Err(TlvError::Overrun {
                declared:  len,
                available: self.remaining(),
            });
        }
        Ok((tag, len))
    }

    /// Consumes a whole record and returns its tag and payload.
    pub fn unmarshal(&mut self) -> Result<(u32, &'a [u8]), TlvError> {
        let (tag, len) = self.unmarshal_header()?;
        let payload = &self.data[self.index..self.index + len];
        self.index += len;
        Ok((tag, payload))
    }

    /// Consumes a record that must carry `need_tag`, returning its payload.
    /// Nothing is consumed on failure.
    pub fn unmarshal_bytes(&mut self, need_tag: u32) -> Result<&'a [u8], TlvError> {
        let start = self.index;
        let (tag, payload) = self.unmarshal()?;
        if tag != need_tag {
            self.index = start;
            return Err(TlvError::TagMismatch {
                expected: need_tag,
                found:    tag,
            });
        }
        Ok(payload)
    }

    /// Consumes a record whose payload must be exactly `out.len()` bytes.
    pub fn unmarshal_fixed(&mut self, need_tag: u32, out: &mut [u8]) -> Result<(), TlvError> {
        let payload = self.unmarshal_bytes(need_tag)?;
        if payload.len() != out.len() {
            return Err(TlvError::LengthMismatch {
                expected: out.len(),
                actual:   payload.len(),
            });
        }
        out.copy_from_slice(payload);
        Ok(())
    }

    /// Consumes a record holding a single encoded integer.
    pub fn unmarshal_int(&mut self, need_tag: u32) -> Result<u32, TlvError> {
        let payload = self.unmarshal_bytes(need_tag)?;
        let (value, used) = decode_int(payload)?;
        if used != payload.len() {
            return Err(TlvError::LengthMismatch {
                expected: used,
                actual:   payload.len(),
            });
        }
        Ok(value)
    }

    /// Consumes a record holding UTF-8 text.
    pub fn unmarshal_string(&mut self, need_tag: u32) -> Result<String, TlvError> {
        let payload = self.unmarshal_bytes(need_tag)?;
        let text = str::from_utf8(payload).map_err(|_| TlvError::InvalidUtf8)?;
        let mut value = String::new();
        value.try_reserve_exact(text.len())?;
        value.push_str(text);
        Ok(value)
    }

    /// Consumes a record whose payload is a marshalled message and decodes
    /// it into `msg`.
    pub fn unmarshal_message<M: Message>(&mut self, need_tag: u32, msg: &mut M) -> Result<(), TlvError> {
        let payload = self.unmarshal_bytes(need_tag)?;
        msg.unmarshal(&mut ByteBuffer::new(payload))
    }
}

/// Decodes a tag from the front of `data`, returning it with the number of
/// bytes it occupied.
pub fn decode_tag(data: &[u8]) -> Result<(u32, usize), TlvError> {
    let mut number: u64 = 0;
    for (count, &byte) in data.iter().take(MAX_TAG_BYTES).enumerate() {
        number |= u64::from(byte & 0x7f) << (7 * count);
        if byte & 0x80 == 0 {
            let tag = u32::try_from(number).map_err(|_| TlvError::BadTag)?;
            return Ok((tag, count + 1));
        }
    }
    if data.len() < MAX_TAG_BYTES {
        Err(TlvError::Truncated)
    } else {
        Err(TlvError::BadTag)
    }
}

/// Decodes a nibble-encoded integer from the front of `data`.
///
/// The high nibble of the first byte holds the nibble count minus one; the
/// value's nibbles follow, least significant first, starting with the low
/// nibble of the first byte.
pub fn decode_int(data: &[u8]) -> Result<(u32, usize), TlvError> {
    let first = *data.first().ok_or(TlvError::Truncated)?;
    let mut nibbles = usize::from(first >> 4) + 1;
    if nibbles > MAX_INT_NIBBLES {
        return Err(TlvError::BadInteger);
    }
    let len = (nibbles >> 1) + 1;
    if len > data.len() {
        return Err(TlvError::Truncated);
    }

    let mut number: u32 = 0;
    while nibbles > 0 {
        number <<= 4;
        let byte = data[nibbles >> 1];
        if nibbles & 1 == 1 {
            number |= u32::from(byte & 0x0f);
        } else {
            number |= u32::from(byte >> 4);
        }
        nibbles -= 1;
    }
    Ok((number, len))
}

#[test]
fn read_int() {
    let read = |bytes| ByteBuffer::new(bytes).read_int();
    assert_eq!(read(&[]), Err(TlvError::Truncated));
    assert_eq!(read(&[0x00]), Ok(0));
    assert_eq!(read(&[0x05]), Ok(5));
    assert_eq!(read(&[0x0f]), Ok(15));
    assert_eq!(read(&[0x10, 0x10]), Ok(0x10));
    assert_eq!(read(&[0x10]), Err(TlvError::Truncated));
    assert_eq!(read(&[0x23, 0x21]), Ok(0x123));
    assert_eq!(read(&[0x7f, 0xff, 0xff, 0xff, 0xff]), Ok(u32::MAX));
    assert_eq!(read(&[0x8f, 0xff, 0xff, 0xff, 0xff]), Err(TlvError::BadInteger));
}

#[test]
fn read_tag() {
    let read = |bytes| ByteBuffer::new(bytes).read_tag();
    assert_eq!(read(&[]), Err(TlvError::Truncated));
    assert_eq!(read(&[0x00]), Ok(0));
    assert_eq!(read(&[0x7f]), Ok(127));
    assert_eq!(read(&[0x80]), Err(TlvError::Truncated));
    assert_eq!(read(&[0x80, 0x01]), Ok(128));
    assert_eq!(read(&[0xff, 0xff, 0xff, 0xff, 0x0f]), Ok(u32::MAX));
    assert_eq!(read(&[0xff, 0xff, 0xff, 0xff, 0x1f]), Err(TlvError::BadTag));
    assert_eq!(read(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]), Err(TlvError::BadTag));
}

#[test]
fn peek_does_not_consume() {
    let bb = ByteBuffer::new(&[0x03, 0x00]);
    assert_eq!(bb.peek_tag(), Ok(3));
    assert_eq!(bb.payload_length(), Ok(0));
    assert_eq!(bb.index(), 0);
}

#[test]
fn unmarshal_checks_tag_and_length() {
    let data = [0x02, 0x01, 0x07];
    assert_eq!(
        ByteBuffer::new(&data).unmarshal_int(3),
        Err(TlvError::TagMismatch { expected: 3, found: 2 })
    );

    let mut bb = ByteBuffer::new(&data);
    let mut out = [0u8; 2];
    assert_eq!(
        bb.unmarshal_fixed(2, &mut out),
        Err(TlvError::LengthMismatch { expected: 2, actual: 1 })
    );

    let mut bb = ByteBuffer::new(&[0x01, 0x04, 0xaa]);
    assert_eq!(bb.unmarshal(), Err(TlvError::Overrun { declared: 4, available: 1 }));
    assert_eq!(bb.index(), 0);
}

#[test]
fn unmarshal_sequence() {
    let mut bb = ByteBuffer::new(&[
        0x01, 0x01, 0x05, // int 5
        0x02, 0x02, b'h', b'i', // string "hi"
        0x03, 0x00, // empty bytes
    ]);
    assert_eq!(bb.unmarshal_int(1), Ok(5));
    assert_eq!(bb.unmarshal_string(2), Ok("hi".to_string()));
    assert_eq!(bb.unmarshal_bytes(3), Ok(&b""[..]));
    assert!(bb.is_empty());
}

#[test]
fn unmarshal_string_rejects_invalid_utf8() {
    let mut bb = ByteBuffer::new(&[0x01, 0x02, 0xc3, 0x28]);
    assert_eq!(bb.unmarshal_string(1), Err(TlvError::InvalidUtf8));
}

/// A byte buffer meant for writing tagged records.
///
/// ```
/// let mut bb = tlvgen_runtime::ByteBufferMut::new();
/// bb.marshal_int(1, 5).unwrap();
/// bb.marshal_string(2, "hi").unwrap();
/// assert_eq!(bb.data(), [0x01, 0x01, 0x05, 0x02, 0x02, b'h', b'i']);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBufferMut {
    data: Vec<u8>,
}

impl ByteBufferMut {
    /// Creates an empty ByteBufferMut ready for writing.
    pub fn new() -> ByteBufferMut {
        ByteBufferMut { data: vec![] }
    }

    /// Retrieves the bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Discards everything written so far.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Writes a tag as a little-endian base-128 varint.
    pub fn write_tag(&mut self, mut tag: u32) {
        loop {
            let mut lower = (tag & 0x7f) as u8;
            tag >>= 7;
            if tag != 0 {
                lower |= 0x80;
            }
            self.data.push(lower);
            if tag == 0 {
                break;
            }
        }
    }

    /// Writes an integer in the nibble encoding read by [`decode_int`].
    pub fn write_int(&mut self, mut number: u32) {
        let mut data = [0u8; 5];
        let mut off = 1;
        while number != 0 {
            let nibble = (number & 0x0f) as u8;
            if off & 1 == 1 {
                data[off / 2] = (data[off / 2] & 0xf0) | nibble;
            } else {
                data[off / 2] = (data[off / 2] & 0x0f) | (nibble << 4);
            }
            number >>= 4;
            off += 1;
        }
        let nibbles = if off > 2 { off - 2 } else { 0 };
        data[0] = (data[0] & 0x0f) | (((nibbles & 0x0f) as u8) << 4);
        self.data.extend_from_slice(&data[..(off + 1) / 2]);
    }

    /// Writes a complete record: tag, payload length, payload.
    pub fn marshal(&mut self, tag: u32, payload: &[u8]) -> Result<(), TlvError> {
        let len = u32::try_from(payload.len()).map_err(|_| TlvError::TooLarge(payload.len()))?;
        self.data.try_reserve(payload.len() + 10)?;
        self.write_tag(tag);
        self.write_int(len);
        self.data.extend_from_slice(payload);
        Ok(())
    }

    /// Writes a record holding one encoded integer.
    pub fn marshal_int(&mut self, tag: u32, value: u32) -> Result<(), TlvError> {
        let mut payload = ByteBufferMut::new();
        payload.write_int(value);
        self.marshal(tag, payload.data())
    }

    /// Writes a record holding the UTF-8 bytes of `value`.
    pub fn marshal_string(&mut self, tag: u32, value: &str) -> Result<(), TlvError> {
        self.marshal(tag, value.as_bytes())
    }

    /// Writes a record whose payload is `msg` marshalled on its own.
    pub fn marshal_message<M: Message>(&mut self, tag: u32, msg: &M) -> Result<(), TlvError> {
        let mut payload = ByteBufferMut::new();
        msg.marshal(&mut payload)?;
        self.marshal(tag, payload.data())
    }
}

#[test]
fn write_int() {
    let write = |value| {
        let mut bb = ByteBufferMut::new();
        bb.write_int(value);
        bb.into_vec()
    };
    assert_eq!(write(0), [0x00]);
    assert_eq!(write(5), [0x05]);
    assert_eq!(write(15), [0x0f]);
    assert_eq!(write(0x10), [0x10, 0x10]);
    assert_eq!(write(0x123), [0x23, 0x21]);
    assert_eq!(write(u32::MAX), [0x7f, 0xff, 0xff, 0xff, 0xff]);
}

#[test]
fn write_tag() {
    let write = |tag| {
        let mut bb = ByteBufferMut::new();
        bb.write_tag(tag);
        bb.into_vec()
    };
    assert_eq!(write(0), [0x00]);
    assert_eq!(write(127), [0x7f]);
    assert_eq!(write(128), [0x80, 0x01]);
    assert_eq!(write(u32::MAX), [0xff, 0xff, 0xff, 0xff, 0x0f]);
}

#[test]
fn int_encoding_is_reversible_at_nibble_boundaries() {
    for shift in 0..32 {
        for value in [1u32 << shift, (1u32 << shift) - 1, u32::MAX >> shift] {
            let mut bb = ByteBufferMut::new();
            bb.write_int(value);
            let mut reader = ByteBuffer::new(bb.data());
            assert_eq!(reader.read_int(), Ok(value));
            assert!(reader.is_empty());
        }
    }
}

#[test]
fn marshal_writes_header_and_payload() {
    let mut bb = ByteBufferMut::new();
    bb.marshal(200, &[9, 8, 7]).unwrap();
    assert_eq!(bb.data(), [0xc8, 0x01, 0x03, 9, 8, 7]);

    let mut reader = ByteBuffer::new(bb.data());
    assert_eq!(reader.unmarshal(), Ok((200, &[9u8, 8, 7][..])));
}
