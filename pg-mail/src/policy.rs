//! Building encryption policies for outgoing mail.

use crate::consts::EMAIL_ATTRIBUTE_TYPE;
use crate::error::{Error, Precondition};
use crate::identity::{Attribute, EncryptionPolicy, Policy};

/// Extracts the bare, lower-cased e-mail address from an address like
/// `"Bob <Bob@Example.com>"`.
pub fn to_email(address: &str) -> String {
    let address = address.trim();

    let bare = match (address.rfind('<'), address.rfind('>')) {
        (Some(start), Some(end)) if start < end => &address[start + 1..end],
        _ => address,
    };

    bare.trim().to_lowercase()
}

/// Builds the [`EncryptionPolicy`] of one outgoing message.
///
/// ```
/// use pg_mail::policy::PolicyBuilder;
///
/// let policies = PolicyBuilder::new(1566722350)
///     .recipients(["b@x.com", "Charlie <C@x.com>"])
///     .build()
///     .unwrap();
///
/// assert_eq!(policies.len(), 2);
/// assert_eq!(
///     policies["c@x.com"].con[0].value.as_deref(),
///     Some("c@x.com")
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    timestamp: u64,
    recipients: Vec<String>,
    sender: Option<String>,
    custom: EncryptionPolicy,
}

impl PolicyBuilder {
    /// Start a policy valid at `timestamp`.
    pub fn new(timestamp: u64) -> Self {
        PolicyBuilder {
            timestamp,
            ..Default::default()
        }
    }

    /// Add recipients, in any address format.
    pub fn recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recipients
            .extend(recipients.into_iter().map(|r| to_email(r.as_ref())));
        self
    }

    /// Also seal for the sender, so a copy of the sent mail stays readable.
    pub fn sender_copy(mut self, sender: &str) -> Self {
        self.sender = Some(to_email(sender));
        self
    }

    /// Attribute selections made by the user, per recipient.
    ///
    /// Only the conjunctions are used, all policies get the builder's timestamp.
    pub fn custom(mut self, policies: EncryptionPolicy) -> Self {
        self.custom = policies
            .into_iter()
            .map(|(id, p)| (to_email(&id), p))
            .collect();
        self
    }

    /// Build the policies.
    ///
    /// Fails when there is nobody to seal for.
    pub fn build(self) -> Result<EncryptionPolicy, Error> {
        let PolicyBuilder {
            timestamp,
            recipients,
            sender,
            mut custom,
        } = self;

        if recipients.iter().all(|r| r.is_empty()) {
            return Err(Precondition::NoRecipients.into());
        }

        let policies = recipients
            .into_iter()
            .chain(sender)
            .filter(|id| !id.is_empty())
            .map(|id| {
                let con = match custom.remove(&id) {
                    Some(p) if !p.con.is_empty() => p.con.into_iter().map(normalize).collect(),
                    _ => vec![Attribute::new(EMAIL_ATTRIBUTE_TYPE, Some(&id))],
                };

                (id, Policy { timestamp, con })
            })
            .collect();

        Ok(policies)
    }
}

// E-mail values are matched lower-cased when unsealing.
fn normalize(mut attr: Attribute) -> Attribute {
    if attr.is_email() {
        attr.value = attr.value.map(|v| v.to_lowercase());
    }
    attr
}
