use thiserror::Error;

/// Coarse error classes callers branch on.
///
/// Exhaustion errors are backpressure: submission paths retry or block on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    ResourceExhausted,
    NotFound,
    Inner,
    NotSupported,
}

#[derive(Error, Debug)]
pub enum DrvError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid handle: {0} is null")]
    InvalidHandle(&'static str),

    #[error("Invalid device index: {0}")]
    InvalidDevice(u32),

    #[error("Out of device memory")]
    OutOfMemory,

    #[error("Queue is full")]
    QueueFull,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Inner driver error: {0}")]
    Inner(String),

    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    #[error("Invalid memory type: {0}")]
    InvalidMallocType(&'static str),
}

impl DrvError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidValue(_)
            | Self::InvalidHandle(_)
            | Self::InvalidDevice(_)
            | Self::InvalidMallocType(_) => ErrorKind::InvalidArgument,
            Self::OutOfMemory | Self::QueueFull => ErrorKind::ResourceExhausted,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Inner(_) | Self::Io(_) => ErrorKind::Inner,
            Self::NotSupported(_) => ErrorKind::NotSupported,
        }
    }
}

// A convenient alias
pub type DrvResult<T> = Result<T, DrvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(DrvError::InvalidDevice(9).kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            DrvError::InvalidMallocType("ddr").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(DrvError::OutOfMemory.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(DrvError::QueueFull.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(DrvError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(DrvError::Inner("ts full".into()).kind(), ErrorKind::Inner);
        assert_eq!(
            DrvError::NotSupported("d2d").kind(),
            ErrorKind::NotSupported
        );
    }
}
