use thiserror::Error;

/// Errors raised while building, encoding, decoding or exchanging LDAP PDUs.
#[derive(Error, Debug)]
pub enum Error {
    #[error("uninitialized field: {0}")]
    UninitializedField(&'static str),

    #[error("encoding buffer overflow: need {needed} bytes, {available} available")]
    BufferOverflow { needed: usize, available: usize },

    #[error("invalid protocol version {0}, expected 1..=127")]
    InvalidVersion(u8),

    #[error("encode called without a valid compute_length")]
    LengthNotComputed,

    #[error("length mismatch: computed {computed}, written {written}")]
    LengthMismatch { computed: usize, written: usize },

    #[error("incomplete frame")]
    Incomplete,

    #[error("unexpected tag {found:#04x}, expected {expected:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("malformed pdu: {0}")]
    Malformed(String),

    #[error("invalid utf-8 in string value")]
    InvalidUtf8,

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    /// True when the decoder only needs more input.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete)
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
