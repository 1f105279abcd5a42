use thiserror::Error;

/// Errors fall into two families that callers are expected to treat
/// differently: invalid debug info means the binary's debug data is broken
/// (report and stop), missing debug info means a well-formed section simply
/// has no answer for the query (fall back to something else).
///
/// Everything that is not [`Error::MissingDebugInfo`] belongs to the first
/// family; [`Error::is_missing`] implements the split.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid debug info: {0}")]
    InvalidDebugInfo(&'static str),

    #[error("missing debug info: {0}")]
    MissingDebugInfo(&'static str),

    #[error("tried to read {wanted} bytes with {remaining} remaining")]
    UnexpectedEof { wanted: usize, remaining: usize },

    #[error("decoded value does not fit the requested integer type")]
    Overflow,

    #[error("unsupported address size: {0}")]
    UnsupportedAddrSize(u8),

    #[error("unsupported DWARF version: {0}")]
    UnsupportedDwarfVersion(u16),

    #[error("memory accessor rejected a read at {0:#x}")]
    InvalidMemory(usize),

    #[error("indirect pointer with a non-native address size")]
    NonNativeIndirection,

    #[error("pointer encoding requires a base that was not supplied")]
    PointerBaseNotSpecified,

    #[error("pointer arithmetic overflowed")]
    PointerOverflow,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    /// `true` for the "no answer" family, `false` for broken debug data.
    pub fn is_missing(&self) -> bool {
        matches!(self, Error::MissingDebugInfo(_))
    }
}

pub(crate) fn bad(what: &'static str) -> Error {
    Error::InvalidDebugInfo(what)
}

pub(crate) fn missing(what: &'static str) -> Error {
    Error::MissingDebugInfo(what)
}

/// Checked narrowing for values decoded as u64 (LEB128 and friends).
pub(crate) fn cast<T: TryFrom<u64>>(value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| Error::Overflow)
}
