//! Reactive route discovery and maintenance for multi-hop sensor meshes.
//! The crate implements an AODV-style engine (route table, request table and
//! the message-driven protocol worker) that sits between a link layer and the
//! applications that need routes.

//*****************
//External crates
//*****************
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;
#[macro_use]
extern crate bitflags;

//*****************
//Modules declaration
//*****************
pub mod aodv;
pub mod common;
pub mod config;
pub mod logging;

//*****************
//Constants
//*****************
/// Milliseconds in one second. Durations in this crate are expressed in milliseconds.
pub const ONE_SECOND_MS: i64 = 1_000;

//*****************
//Errors
//*****************
use std::error::Error;
use std::fmt;
use std::io;

/// Error struct for this crate
#[derive(Debug)]
pub struct AodvError {
    pub cause: Option<Box<dyn Error + Send + Sync>>,
    pub kind: AodvErrorKind,
}

/// Types of errors produced in this crate
#[derive(Debug)]
pub enum AodvErrorKind {
    /// Failures related to [de]serializing control messages
    Serialization(String),
    /// Failures in configuration of the system
    Configuration(String),
    /// Errors from concurrent access to resources, channels or threads
    Contention(String),
    /// The external transport refused or failed to send a message
    Transport(String),
    /// File or device access failures
    Io(String),
}

impl AodvError {
    /// Convenience constructor for an error that wraps an underlying cause.
    pub fn with_cause<E>(kind: AodvErrorKind, cause: E) -> AodvError
    where
        E: Error + Send + Sync + 'static,
    {
        AodvError {
            kind,
            cause: Some(Box::new(cause)),
        }
    }
}

impl Error for AodvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.cause {
            Some(ref cause) => Some(&**cause),
            None => None,
        }
    }
}

impl fmt::Display for AodvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for AodvErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AodvErrorKind::Serialization(msg) => write!(f, "{}", msg),
            AodvErrorKind::Configuration(msg) => write!(f, "{}", msg),
            AodvErrorKind::Contention(msg) => write!(f, "{}", msg),
            AodvErrorKind::Transport(msg) => write!(f, "{}", msg),
            AodvErrorKind::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<AodvErrorKind> for AodvError {
    fn from(kind: AodvErrorKind) -> AodvError {
        AodvError { cause: None, kind }
    }
}

impl From<io::Error> for AodvError {
    fn from(error: io::Error) -> AodvError {
        let msg = format!("I/O failure: {}", &error);
        AodvError::with_cause(AodvErrorKind::Io(msg), error)
    }
}
