use std::io::Error as IoError;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while probing a single target
///
/// None of these leave the per-target task: the probe engine turns them
/// into a failed outcome whose detail is the error text.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{}", error_chain(.0))]
    Http(#[from] reqwest::Error),
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: IoError,
    },
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("icmp socket unavailable: {0}")]
    IcmpSocket(IoError),
    #[error("{0}")]
    Ping(#[from] surge_ping::SurgeError),
    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),
    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

/// Render an error followed by every cause in its source chain
///
/// reqwest keeps the interesting part (refused, reset, certificate) in the
/// sources, so the top-level message alone says nothing about the failure.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.ends_with(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

/// Errors raised while delivering an alert
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build email: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("no contacts to notify")]
    NoContacts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("inner")]
    struct Inner(#[source] IoError);

    #[test]
    fn test_error_chain_includes_every_cause() {
        let error = Outer(Inner(IoError::new(std::io::ErrorKind::ConnectionRefused, "Connection refused")));
        assert_eq!(error_chain(&error), "outer: inner: Connection refused");
    }

    #[test]
    fn test_error_chain_without_source() {
        assert_eq!(error_chain(&ProbeError::NoAddress("x".into())), "no address found for x");
    }
}
