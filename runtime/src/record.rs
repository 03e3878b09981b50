use crate::{bb::ByteBuffer, error::TlvError};
use std::fmt;

/// One tagged record, as found on the wire.
///
/// Records carry no schema information: a payload may be raw bytes, an
/// encoded integer, text or a nested run of records. [`Record::children`]
/// attempts the last interpretation.
#[derive(Clone, PartialEq, Eq)]
pub struct Record<'a> {
    pub tag:     u32,
    pub payload: &'a [u8],
}

impl<'a> Record<'a> {
    /// Splits `data` into its top-level records. Fails if the data does not
    /// end exactly on a record boundary.
    pub fn decode_all(data: &'a [u8]) -> Result<Vec<Record<'a>>, TlvError> {
        let mut bb = ByteBuffer::new(data);
        let mut records = Vec::new();
        while !bb.is_empty() {
            let (tag, payload) = bb.unmarshal()?;
            records.push(Record { tag, payload });
        }
        Ok(records)
    }

    /// Interprets the payload as a run of nested records.
    pub fn children(&self) -> Result<Vec<Record<'a>>, TlvError> {
        Record::decode_all(self.payload)
    }

    /// Interprets the payload as a single encoded integer.
    pub fn as_int(&self) -> Result<u32, TlvError> {
        let (value, used) = crate::bb::decode_int(self.payload)?;
        if used != self.payload.len() {
            return Err(TlvError::LengthMismatch {
                expected: used,
                actual:   self.payload.len(),
            });
        }
        Ok(value)
    }
}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record {{tag: {}, payload: ", self.tag)?;
        for byte in self.payload {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bb::ByteBufferMut;

    #[test]
    fn test_decode_all_and_children() {
        let mut inner = ByteBufferMut::new();
        inner.marshal_int(1, 7).unwrap();

        let mut outer = ByteBufferMut::new();
        outer.marshal_int(1, 5).unwrap();
        outer.marshal(3, inner.data()).unwrap();

        let records = Record::decode_all(outer.data()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tag, 1);
        assert_eq!(records[0].as_int(), Ok(5));
        assert_eq!(records[1].tag, 3);

        let children = records[1].children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].as_int(), Ok(7));
        assert_eq!(format!("{:?}", children[0]), "Record {tag: 1, payload: 07}");
    }

    #[test]
    fn test_decode_all_rejects_trailing_bytes() {
        assert_eq!(Record::decode_all(&[0x01, 0x02, 0x00]), Err(TlvError::Overrun { declared: 2, available: 1 }));
    }
}
