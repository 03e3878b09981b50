use crate::{
    bb::{ByteBuffer, ByteBufferMut},
    error::TlvError,
};

/// Implemented by every struct the generator emits.
///
/// The inherent methods on generated types carry the same names; this trait
/// lets the runtime marshal nested messages without knowing their concrete
/// type.
pub trait Message: Default {
    /// Schema name of the struct.
    const NAME: &'static str;

    /// Appends one record per set field to `buf`.
    fn marshal(&self, buf: &mut ByteBufferMut) -> Result<(), TlvError>;

    /// Decodes records until `buf` is exhausted, then checks completeness.
    fn unmarshal(&mut self, buf: &mut ByteBuffer<'_>) -> Result<(), TlvError>;

    /// Fails unless every required field, recursively, is set.
    fn complete(&self) -> Result<(), TlvError>;

    /// Resets every field to unset.
    fn clear(&mut self);
}

/// Marshals `msg` as a single record carrying `tag`.
pub fn evtag_marshal<M: Message>(buf: &mut ByteBufferMut, tag: u32, msg: &M) -> Result<(), TlvError> {
    buf.marshal_message(tag, msg)
}

/// Unmarshals one record carrying `need_tag` into `msg`.
pub fn evtag_unmarshal<M: Message>(
    buf: &mut ByteBuffer<'_>,
    need_tag: u32,
    msg: &mut M,
) -> Result<(), TlvError> {
    buf.unmarshal_message(need_tag, msg)
}
