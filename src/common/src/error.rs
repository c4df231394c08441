//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Generic error types.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// A staging (CPU-only) descriptor allocator could not hand out a block
    /// because it reached its configured slab limit.
    ///
    /// Recoverable: the caller may flush pending work so that transient
    /// blocks are reclaimed, and then retry.
    #[error("out of descriptor slabs")]
    OutOfSlabs,

    /// A shader-visible descriptor heap has no room left for the request.
    ///
    /// Recoverable: the caller should switch to a fresh heap and retry.
    #[error("out of shader-visible descriptor space")]
    OutOfDescriptorSpace,

    /// Ran out of device memory during a native allocation.
    #[error("out of device memory")]
    OutOfDeviceMemory,

    /// The device became lost due to hardware/software errors, execution
    /// timeouts, or other reasons.
    #[error("device lost")]
    DeviceLost,

    /// The requested feature or configuration is not supported by, or
    /// exceeds the limits of the hardware or the backend.
    #[error("not supported")]
    NotSupported,

    /// A native API call failed for a reason not covered by the other kinds.
    #[error("native API call failed")]
    NativeFailure,

    /// Any error that is not part of this list.
    #[error("uncategorized error")]
    Other,
}

impl ErrorKind {
    /// Returns `true` if the operation may succeed when retried after the
    /// caller has flushed pending work or switched heaps.
    ///
    /// Native failures are never considered recoverable.
    pub fn is_recoverable(self) -> bool {
        match self {
            ErrorKind::OutOfSlabs | ErrorKind::OutOfDescriptorSpace => true,
            ErrorKind::OutOfDeviceMemory
            | ErrorKind::DeviceLost
            | ErrorKind::NotSupported
            | ErrorKind::NativeFailure
            | ErrorKind::Other => false,
        }
    }
}

/// The generic error type used by ZanGFX backends.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, error: None }
    }

    pub fn with_detail<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            kind,
            error: Some(error.into()),
        }
    }

    pub fn get_ref(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        use std::ops::Deref;
        self.error.as_ref().map(Deref::deref)
    }

    pub fn get_mut(&mut self) -> Option<&mut (dyn StdError + Send + Sync + 'static)> {
        use std::ops::DerefMut;
        self.error.as_mut().map(DerefMut::deref_mut)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Shorthand for `self.kind().is_recoverable()`.
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref error) = self.error {
            write!(fmt, "{}: {}", self.kind, error)
        } else {
            write!(fmt, "{}", self.kind)
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self.error {
            Some(ref error) => Some(&**error as &(dyn StdError + 'static)),
            None => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
