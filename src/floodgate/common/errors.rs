use std::fmt::{Debug, Display};
use std::{fmt, io, result};
use std::net::AddrParseError;
use std::sync::PoisonError;

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

#[derive(Debug)]
pub enum ErrorKind {
    Timeout,
    PoisonError,
    ClosedError,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
    WatchError(notify::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(s.to_string())),
        }
    }

    pub fn closed() -> Self {
        Error {
            err: Box::new(ErrorKind::ClosedError),
        }
    }

    pub fn timeout() -> Self {
        Error {
            err: Box::new(ErrorKind::Timeout),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(String::from(err))),
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(err)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::IOError(err)),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::YAMLError(err)),
        }
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::WatchError(err)),
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::new(err)
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_err: PoisonError<Guard>) -> Self {
        Error {
            err: Box::new(ErrorKind::PoisonError),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Timeout => f.write_str("operation timed out"),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the mutex"),
            ErrorKind::ClosedError => f.write_str("socket/file is closed"),
            ErrorKind::StringError(s) => f.write_str(&s),
            ErrorKind::IOError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::YAMLError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::WatchError(e) => std::fmt::Display::fmt(&e, f),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
