use std::collections::TryReserveError;
use thiserror::Error;

/// Errors raised while marshalling or unmarshalling tagged data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlvError {
    #[error("unexpected end of buffer")]
    Truncated,

    #[error("malformed tag encoding")]
    BadTag,

    #[error("malformed integer encoding")]
    BadInteger,

    #[error("expected tag {expected} but found {found}")]
    TagMismatch { expected: u32, found: u32 },

    #[error("payload is {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("record declares {declared} payload bytes but only {available} remain")]
    Overrun { declared: usize, available: usize },

    #[error("unknown tag {0}")]
    UnknownTag(u32),

    #[error("field \"{0}\" appears more than once")]
    DuplicateField(&'static str),

    #[error("required field \"{field}\" of \"{message}\" is not set")]
    Incomplete {
        message: &'static str,
        field:   &'static str,
    },

    #[error("field \"{0}\" is not set")]
    Unset(&'static str),

    #[error("index {index} is out of bounds for \"{field}\" of length {len}")]
    OutOfBounds {
        field: &'static str,
        index: usize,
        len:   usize,
    },

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload of {0} bytes does not fit a 32-bit length")]
    TooLarge(usize),

    #[error("allocation failed: {0}")]
    Alloc(#[from] TryReserveError),

    #[error("failed to unmarshal \"{field}\": {source}")]
    Field {
        field:  &'static str,
        source: Box<TlvError>,
    },
}

impl TlvError {
    /// Wraps `self` with the name of the field that was being decoded.
    pub fn in_field(self, field: &'static str) -> Self {
        TlvError::Field {
            field,
            source: Box::new(self),
        }
    }

    /// Strips any `Field` context and returns the underlying error.
    pub fn root_cause(&self) -> &TlvError {
        match self {
            TlvError::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_fields() {
        let err = TlvError::UnknownTag(9).in_field("inner").in_field("outer");
        assert_eq!(err.root_cause(), &TlvError::UnknownTag(9));
        assert_eq!(
            err.to_string(),
            "failed to unmarshal \"outer\": failed to unmarshal \"inner\": unknown tag 9"
        );
    }
}
