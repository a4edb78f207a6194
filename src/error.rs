//! definition of the general ethercat error type

use std::sync::Arc;
use core::fmt;

/**
    general object reporting an unexpected result regarding ethercat communication

    Its variant are meant to help finding the cause responsible for the problem and how to deal with it.

    Note that a missing answer from the segment is not an error: exchanges report it as `None` instead of a working counter.
*/
#[derive(Clone, Debug)]
pub enum EthercatError {
    /// error caused by communication support
    ///
    /// these errors are exterior to this library
    Io(Arc<std::io::Error>),

    /// error reported by the master
    ///
    /// these errors can generally be handled and fixed by retrying the operation or using the master differently when the issue is in the user code
    Master(&'static str),

    /// error detected by the master in the ethercat frame content
    ///
    /// these errors can generally not be fixed by retrying, the frame has to be built differently
    Protocol(&'static str),
}

/// convenient alias to simplify return annotations
pub type EthercatResult<T=()> = core::result::Result<T, EthercatError>;

impl fmt::Display for EthercatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (src, msg) = match self {
            Self::Io(value) => ("Io", value.to_string()),
            Self::Master(value) => ("Master", value.to_string()),
            Self::Protocol(value) => ("Protocol", value.to_string()),
        };
        f.debug_struct("EthercatError")
            .field("source", &src)
            .field("message", &msg)
            .finish()
    }
}

impl std::error::Error for EthercatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EthercatError {
    fn from(src: std::io::Error) -> Self {
        EthercatError::Io(Arc::new(src))
    }
}

impl From<crate::data::PackingError> for EthercatError {
    fn from(src: crate::data::PackingError) -> Self {
        EthercatError::Protocol(match src {
            crate::data::PackingError::BadSize(_, text) => text,
            crate::data::PackingError::InvalidValue(text) => text,
        })
    }
}

impl From<packed_struct::PackingError> for EthercatError {
    fn from(_: packed_struct::PackingError) -> Self {
        EthercatError::Protocol("ethernet header cannot be packed")
    }
}
