//! Structural validation of campaign submissions and SMTP test requests
//!
//! Problems accumulate so the operator sees everything wrong with a
//! submission at once.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use mailsurge_common::Error;

use crate::campaign::CampaignSubmission;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

pub fn is_valid_email(addr: &str) -> bool {
    EMAIL_RE.is_match(addr)
}

/// Validate a campaign submission; returns every problem found
pub fn validate_campaign(submission: &CampaignSubmission) -> Result<(), Error> {
    let mut problems = Vec::new();

    if submission.use_smtp_rotation {
        if submission.smtp_servers.is_empty() {
            problems.push("smtpServers is required when rotation is enabled".to_string());
        }
    } else if submission.smtp_server.is_none() && submission.smtp_servers.is_empty() {
        problems.push("smtpServer is required".to_string());
    }

    let mut seen_ids = HashSet::new();
    for (index, relay) in submission.relay_inputs().into_iter().enumerate() {
        let label = relay
            .id
            .clone()
            .unwrap_or_else(|| format!("relay {}", index + 1));
        if relay.host.trim().is_empty() {
            problems.push(format!("{label}: host is required"));
        }
        if relay.port == 0 {
            problems.push(format!("{label}: port is required"));
        }
        if relay.user.trim().is_empty() {
            problems.push(format!("{label}: user is required"));
        }
        if relay.secret.is_empty() {
            problems.push(format!("{label}: secret is required"));
        }
        if let Some(id) = relay.id {
            if !seen_ids.insert(id.clone()) {
                problems.push(format!("duplicate relay id: {id}"));
            }
        }
    }

    if submission.recipients.is_empty() {
        problems.push("recipients must be a non-empty list".to_string());
    }
    for recipient in &submission.recipients {
        if !is_valid_email(recipient) {
            problems.push(format!("invalid recipient address: {recipient}"));
        }
    }

    if submission.subject.trim().is_empty() {
        problems.push("subject must not be empty".to_string());
    }
    if submission.content.trim().is_empty() {
        problems.push("content must not be empty".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(problems))
    }
}

/// Fields of an SMTP test request that validation cares about
#[derive(Debug, Default)]
pub struct SmtpTestFields<'a> {
    pub host: Option<&'a str>,
    pub port: Option<u16>,
    pub user: Option<&'a str>,
    pub secret: Option<&'a str>,
}

/// Validate an SMTP test request; all connection fields are required
pub fn validate_smtp_test(fields: &SmtpTestFields<'_>) -> Result<(), Error> {
    let mut problems = Vec::new();

    if fields.host.map_or(true, |h| h.trim().is_empty()) {
        problems.push("host is required".to_string());
    }
    if fields.port.is_none() {
        problems.push("port is required".to_string());
    }
    if fields.user.map_or(true, |u| u.trim().is_empty()) {
        problems.push("user is required".to_string());
    }
    if fields.secret.map_or(true, |s| s.is_empty()) {
        problems.push("secret is required".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::RelayInput;

    fn relay() -> RelayInput {
        RelayInput {
            host: "mx.example.com".to_string(),
            port: 587,
            user: "ops@example.com".to_string(),
            secret: "hunter2".to_string(),
            ..Default::default()
        }
    }

    fn valid_submission() -> CampaignSubmission {
        CampaignSubmission {
            smtp_server: Some(relay()),
            recipients: vec!["a@x.io".to_string(), "b@x.io".to_string()],
            subject: "Hello".to_string(),
            content: "Body".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_submission_passes() {
        assert!(validate_campaign(&valid_submission()).is_ok());
    }

    #[test]
    fn test_email_regex() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("user+tag@sub.example.co"));
        assert!(!is_valid_email("bad-email"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("user name@example.com"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn test_invalid_recipient_rejects_whole_submission() {
        let mut submission = valid_submission();
        submission.recipients = vec!["bad-email".to_string(), "ok@x.io".to_string()];
        let err = validate_campaign(&submission).unwrap_err();
        let details = err.validation_details().unwrap();
        assert_eq!(details.len(), 1);
        assert!(details[0].contains("bad-email"));
    }

    #[test]
    fn test_missing_relay_reported() {
        let mut submission = valid_submission();
        submission.smtp_server = None;
        let err = validate_campaign(&submission).unwrap_err();
        assert!(err
            .validation_details()
            .unwrap()
            .iter()
            .any(|p| p.contains("smtpServer")));
    }

    #[test]
    fn test_rotation_requires_server_list() {
        let mut submission = valid_submission();
        submission.use_smtp_rotation = true;
        submission.smtp_server = None;
        let err = validate_campaign(&submission).unwrap_err();
        assert!(err
            .validation_details()
            .unwrap()
            .iter()
            .any(|p| p.contains("smtpServers")));
    }

    #[test]
    fn test_problems_accumulate() {
        let submission = CampaignSubmission::default();
        let err = validate_campaign(&submission).unwrap_err();
        let details = err.validation_details().unwrap();
        // relay, recipients, subject, and content all missing
        assert!(details.len() >= 4);
    }

    #[test]
    fn test_duplicate_relay_ids_rejected() {
        let mut first = relay();
        first.id = Some("primary".to_string());
        let mut second = relay();
        second.id = Some("primary".to_string());

        let mut submission = valid_submission();
        submission.use_smtp_rotation = true;
        submission.smtp_server = None;
        submission.smtp_servers = vec![first, second];

        let err = validate_campaign(&submission).unwrap_err();
        assert!(err
            .validation_details()
            .unwrap()
            .iter()
            .any(|p| p.contains("duplicate relay id")));
    }

    #[test]
    fn test_blank_subject_and_content_rejected() {
        let mut submission = valid_submission();
        submission.subject = "   ".to_string();
        submission.content = String::new();
        let err = validate_campaign(&submission).unwrap_err();
        assert_eq!(err.validation_details().unwrap().len(), 2);
    }

    #[test]
    fn test_smtp_test_requires_all_fields() {
        let err = validate_smtp_test(&SmtpTestFields::default()).unwrap_err();
        assert_eq!(err.validation_details().unwrap().len(), 4);

        let ok = validate_smtp_test(&SmtpTestFields {
            host: Some("mx.example.com"),
            port: Some(465),
            user: Some("ops@example.com"),
            secret: Some("hunter2"),
        });
        assert!(ok.is_ok());
    }
}
