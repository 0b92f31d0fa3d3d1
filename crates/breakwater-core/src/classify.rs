//! Transient vs. permanent error classification.
//!
//! The default retry predicate treats an error as retryable when it is a
//! transport failure, carries a 5xx status, or reads like a timeout.
//! Client errors (4xx, validation failures) are permanent.

use lazy_static::lazy_static;
use regex::Regex;
use std::io;

lazy_static! {
    static ref TIMEOUT_PATTERN: Regex =
        Regex::new(r"(?i)(time[ds]?[\s_-]?out|etimedout|deadline exceeded)").unwrap();
}

/// Facts about an error that the default retry predicate looks at.
///
/// Every method has a conservative default, so implementing the trait with
/// an empty body makes an error permanent unless its message mentions a
/// timeout.
pub trait Classify {
    /// The request never got a response (connection refused, reset, DNS...).
    fn is_transport_failure(&self) -> bool {
        false
    }

    /// HTTP-style status code, when the error carries one.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// The error is a timeout signal.
    fn is_timeout(&self) -> bool {
        false
    }
}

/// Whether `message` reads like a timeout ("timed out", "Timeout", "ETIMEDOUT").
pub fn is_timeout_message(message: &str) -> bool {
    TIMEOUT_PATTERN.is_match(message)
}

/// Whether `status` is a server-side failure.
pub fn is_server_error(status: u16) -> bool {
    (500..=599).contains(&status)
}

/// The default retry predicate.
pub fn is_transient<E>(error: &E) -> bool
where
    E: Classify + std::fmt::Display + ?Sized,
{
    error.is_transport_failure()
        || error.is_timeout()
        || error.status_code().is_some_and(is_server_error)
        || is_timeout_message(&error.to_string())
}

impl Classify for io::Error {
    fn is_transport_failure(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::AddrNotAvailable
                | io::ErrorKind::UnexpectedEof
        )
    }

    fn is_timeout(&self) -> bool {
        self.kind() == io::ErrorKind::TimedOut
    }
}
