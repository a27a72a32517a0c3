//! Outbound SMTP plumbing: failure classification and the shared transport cache

pub mod classify;
pub mod transport;

pub use classify::{FailureKind, SendFailure};
pub use transport::{
    Connector, Mailer, SmtpConnector, SmtpMailer, TransportCache, TransportProvider,
};
