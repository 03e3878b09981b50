//! Runtime support for code generated by `tlvgen`.
//!
//! Generated structs marshal themselves as a run of tagged records. Each
//! record is a varint tag, a nibble-encoded payload length and the payload,
//! the same layout libevent's `evtag` functions produce.
//!
//! ```
//! use tlvgen_runtime::*;
//!
//! let mut out = ByteBufferMut::new();
//! out.marshal_int(1, 5).unwrap();
//! out.marshal_string(2, "note").unwrap();
//!
//! let records = Record::decode_all(out.data()).unwrap();
//! assert_eq!(records.iter().map(|r| r.tag).collect::<Vec<_>>(), [1, 2]);
//! ```

pub mod bb;
pub mod error;
pub mod message;
pub mod record;

pub use bb::*;
pub use error::TlvError;
pub use message::*;
pub use record::Record;
