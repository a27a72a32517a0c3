//! Send-failure taxonomy and retry classification
//!
//! Transport errors from the SMTP client are mapped into [`SendFailure`]
//! before the engine looks at them, so retry decisions and user-facing
//! messages work from one vocabulary regardless of where the error came
//! from.

use serde::Serialize;
use thiserror::Error;

/// Machine-readable failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    ConnectionTimeout,
    ConnectionReset,
    ConnectionRefused,
    NameNotFound,
    Tls,
    Auth,
    Protocol,
    Socket,
    Message,
}

impl FailureKind {
    /// Wire name of the failure kind
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ConnectionTimeout => "connection-timeout",
            FailureKind::ConnectionReset => "connection-reset",
            FailureKind::ConnectionRefused => "connection-refused",
            FailureKind::NameNotFound => "name-not-found",
            FailureKind::Tls => "tls",
            FailureKind::Auth => "auth",
            FailureKind::Protocol => "protocol",
            FailureKind::Socket => "socket",
            FailureKind::Message => "message",
        }
    }
}

/// A failed connection attempt or send, with enough context to classify it
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SendFailure {
    pub kind: FailureKind,
    /// SMTP response code, when one was present in the reply
    pub code: Option<u16>,
    pub message: String,
}

impl SendFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Whether the engine should queue the recipient for a retry pass.
    ///
    /// Timeouts, resets, and DNS misses are worth retrying, as are 4xx SMTP
    /// replies. Authentication failures are permanent no matter how they
    /// were reported.
    pub fn is_retryable(&self) -> bool {
        if self.kind == FailureKind::Auth || self.code == Some(535) {
            return false;
        }
        matches!(
            self.kind,
            FailureKind::ConnectionTimeout
                | FailureKind::ConnectionReset
                | FailureKind::NameNotFound
        ) || self.code.is_some_and(|c| (400..500).contains(&c))
    }

    /// Operator-facing translation of the failure
    pub fn human_message(&self) -> String {
        match self.kind {
            FailureKind::ConnectionTimeout => "Connection timed out".to_string(),
            FailureKind::ConnectionReset => "Connection reset by server".to_string(),
            FailureKind::ConnectionRefused => "Connection refused by server".to_string(),
            FailureKind::NameNotFound => "Server not found".to_string(),
            FailureKind::Tls => "TLS negotiation failed".to_string(),
            FailureKind::Auth => "Authentication failed".to_string(),
            FailureKind::Protocol => match self.code {
                Some(code) => format!("Server rejected the message (SMTP {})", code),
                None => "Server rejected the message".to_string(),
            },
            FailureKind::Socket => "Socket error".to_string(),
            FailureKind::Message => "Message could not be built".to_string(),
        }
    }

    /// Map an SMTP client error into the engine's taxonomy
    pub fn from_smtp_error(err: &lettre::transport::smtp::Error) -> Self {
        let message = source_chain(err);

        if err.is_timeout() {
            return Self::new(FailureKind::ConnectionTimeout, message);
        }
        if err.is_tls() {
            return Self::new(FailureKind::Tls, message);
        }
        if err.is_response() || err.is_permanent() || err.is_transient() {
            let code = extract_smtp_code(&message);
            let kind = if code == Some(535) || is_auth_rejection(&message) {
                FailureKind::Auth
            } else {
                FailureKind::Protocol
            };
            let mut failure = Self::new(kind, message);
            failure.code = code;
            return failure;
        }
        if err.to_string() == "network error" {
            return Self::new(io_failure_kind(err), message);
        }

        Self::new(FailureKind::Socket, message)
    }
}

/// Walk the source chain so the stored message includes the root cause
fn source_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Inspect the io error behind a network failure to pick the failure kind
fn io_failure_kind(err: &dyn std::error::Error) -> FailureKind {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                std::io::ErrorKind::TimedOut => FailureKind::ConnectionTimeout,
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    FailureKind::ConnectionReset
                }
                std::io::ErrorKind::ConnectionRefused => FailureKind::ConnectionRefused,
                std::io::ErrorKind::NotFound => FailureKind::NameNotFound,
                _ => {
                    // DNS resolution failures surface as uncategorized io errors
                    let text = io.to_string();
                    if text.contains("failed to lookup") || text.contains("dns") {
                        FailureKind::NameNotFound
                    } else {
                        FailureKind::Socket
                    }
                }
            };
        }
        source = cause.source();
    }
    FailureKind::Socket
}

/// First standalone 3-digit SMTP status in a response message
fn extract_smtp_code(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (400..600).contains(code))
}

fn is_auth_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("authentication") || lower.contains("auth failed")
}
