//! Mailsurge Core - campaign execution engine
//!
//! This crate provides the campaign lifecycle machinery: the registry that
//! admits and tracks campaigns, the per-campaign executor, relay rotation
//! with health tracking, the shared SMTP transport cache, message
//! personalization, and submission validation.

pub mod campaign;
pub mod personalize;
pub mod rotation;
pub mod smtp;
pub mod validate;

pub use campaign::executor::Executor;
pub use campaign::registry::{Registry, RegistryStats};
pub use campaign::{
    Campaign, CampaignConfig, CampaignSnapshot, CampaignStatus, CampaignSubmission, ErrorRecord,
    RelayInput,
};
pub use personalize::{Personalization, Personalizer};
pub use rotation::{RelayDescriptor, RelaySnapshot, RotationTracker};
pub use smtp::{
    Connector, FailureKind, Mailer, SendFailure, SmtpConnector, SmtpMailer, TransportCache,
    TransportProvider,
};
