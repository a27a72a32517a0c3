//! Message personalization
//!
//! Derives the subject, body, and sender display name for one recipient from
//! the campaign templates. Substitution uses literal `{{token}}` markers;
//! unknown tokens are left in place.

use chrono::Local;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::seq::SliceRandom;
use rand::Rng;

use mailsurge_common::types::{local_part, EmailAddress};

use crate::campaign::CampaignConfig;

/// Length of the per-send `{{ref}}` token
const REF_TOKEN_LEN: usize = 8;

/// Rendered message parts for one recipient
#[derive(Debug, Clone, PartialEq)]
pub struct Personalization {
    pub subject: String,
    pub body: String,
    pub from_name: String,
}

/// Template renderer for campaign messages
pub struct Personalizer {
    unsubscribe_base_url: String,
}

impl Personalizer {
    pub fn new(unsubscribe_base_url: String) -> Self {
        Self {
            unsubscribe_base_url,
        }
    }

    /// Render subject, body, and from-name for `recipient`.
    ///
    /// The subject comes from the custom-subject pool when one is supplied,
    /// otherwise the campaign template; the from-name likewise falls back to
    /// the local part of the relay user. Pool picks are uniform over the
    /// supplied RNG, so seeded tests are deterministic.
    pub fn personalize<R: Rng + ?Sized>(
        &self,
        config: &CampaignConfig,
        campaign_id: &str,
        recipient: &str,
        relay_user: &str,
        rng: &mut R,
    ) -> Personalization {
        let (name, domain) = match EmailAddress::parse(recipient) {
            Some(addr) => (addr.local, addr.domain),
            None => (recipient.to_string(), String::new()),
        };

        let subject_template = config
            .custom_subjects
            .choose(rng)
            .unwrap_or(&config.subject_template)
            .clone();

        let from_name = config
            .custom_senders
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| local_part(relay_user).to_string());

        let now = Local::now();
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M:%S").to_string();
        let unsubscribe = self.unsubscribe_url(recipient);
        let reference = reference_token(rng);

        let vars = [
            ("{{name}}", name.as_str()),
            ("{{email}}", recipient),
            ("{{domain}}", domain.as_str()),
            ("{{unsubscribe}}", unsubscribe.as_str()),
            ("{{date}}", date.as_str()),
            ("{{time}}", time.as_str()),
            ("{{campaign_id}}", campaign_id),
            ("{{ref}}", reference.as_str()),
        ];

        Personalization {
            subject: substitute(&subject_template, &vars),
            body: substitute(&config.body_template, &vars),
            from_name,
        }
    }

    /// Unsubscribe URL carrying the recipient as a percent-encoded parameter
    pub fn unsubscribe_url(&self, recipient: &str) -> String {
        format!(
            "{}?email={}",
            self.unsubscribe_base_url,
            utf8_percent_encode(recipient, NON_ALPHANUMERIC)
        )
    }

    /// `List-Unsubscribe` header value for `recipient`
    pub fn list_unsubscribe_header(&self, recipient: &str) -> String {
        format!("<{}>", self.unsubscribe_url(recipient))
    }
}

fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (token, value) in vars {
        rendered = rendered.replace(token, value);
    }
    rendered
}

/// Short pseudo-random token, regenerated for every send
fn reference_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..REF_TOKEN_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn base_config() -> CampaignConfig {
        CampaignConfig {
            recipients: vec!["jo@client.example".to_string()],
            subject_template: "Hello {{name}}".to_string(),
            body_template: "Hi {{name}} at {{domain}}, reach us: {{unsubscribe}}".to_string(),
            is_html: false,
            delay: std::time::Duration::ZERO,
            use_rotation: false,
            rotation_frequency: None,
            custom_subjects: Vec::new(),
            custom_senders: Vec::new(),
            custom_reply_to: None,
            max_failures_per_relay: 3,
            relays: Vec::new(),
        }
    }

    fn personalizer() -> Personalizer {
        Personalizer::new("https://mailsurge.example.com/unsubscribe".to_string())
    }

    #[test]
    fn test_variable_substitution() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = personalizer().personalize(
            &base_config(),
            "campaign_1",
            "jo@client.example",
            "ops@relay.example",
            &mut rng,
        );

        assert_eq!(p.subject, "Hello jo");
        assert!(p.body.starts_with("Hi jo at client.example"));
        assert!(p.body.contains("email=jo%40client%2Eexample"));
        assert_eq!(p.from_name, "ops");
    }

    #[test]
    fn test_templates_without_tokens_pass_through() {
        let mut config = base_config();
        config.subject_template = "Quarterly update".to_string();
        config.body_template = "Nothing variable here.".to_string();

        let mut rng = StdRng::seed_from_u64(7);
        let p = personalizer().personalize(
            &config,
            "campaign_1",
            "jo@client.example",
            "ops@relay.example",
            &mut rng,
        );

        assert_eq!(p.subject, "Quarterly update");
        assert_eq!(p.body, "Nothing variable here.");
    }

    #[test]
    fn test_unknown_tokens_are_preserved() {
        let mut config = base_config();
        config.body_template = "Hi {{name}}, your plan is {{plan}}".to_string();

        let mut rng = StdRng::seed_from_u64(7);
        let p = personalizer().personalize(
            &config,
            "campaign_1",
            "jo@client.example",
            "ops@relay.example",
            &mut rng,
        );

        assert_eq!(p.body, "Hi jo, your plan is {{plan}}");
    }

    #[test]
    fn test_custom_pools_are_deterministic_under_seed() {
        let mut config = base_config();
        config.custom_subjects = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        config.custom_senders = vec!["Ana".to_string(), "Bo".to_string()];

        let render = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            personalizer().personalize(
                &config,
                "campaign_1",
                "jo@client.example",
                "ops@relay.example",
                &mut rng,
            )
        };

        let first = render(42);
        let second = render(42);
        assert_eq!(first.subject, second.subject);
        assert_eq!(first.from_name, second.from_name);
        assert!(config.custom_subjects.contains(&first.subject));
        assert!(config.custom_senders.contains(&first.from_name));
    }

    #[test]
    fn test_ref_token_regenerated_per_send() {
        let mut config = base_config();
        config.body_template = "ref={{ref}}".to_string();

        let p = personalizer();
        let mut rng = StdRng::seed_from_u64(1);
        let first = p.personalize(
            &config,
            "campaign_1",
            "jo@client.example",
            "ops@relay.example",
            &mut rng,
        );
        let second = p.personalize(
            &config,
            "campaign_1",
            "jo@client.example",
            "ops@relay.example",
            &mut rng,
        );
        assert_ne!(first.body, second.body);
    }

    #[test]
    fn test_list_unsubscribe_header() {
        let header = personalizer().list_unsubscribe_header("jo+test@client.example");
        assert!(header.starts_with('<'));
        assert!(header.ends_with('>'));
        assert!(header.contains("jo%2Btest%40client%2Eexample"));
    }
}
