//! Core domain and wire types for ContactLink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ContactLinkError, Result};

/// Message carried by [`ContactLinkError::InvalidRequest`] when both identifiers are missing.
pub const MISSING_IDENTIFIER: &str = "email or phoneNumber required";

// ---------------------------------------------------------------------------
// ContactId
// ---------------------------------------------------------------------------

/// Surrogate contact identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContactId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// ---------------------------------------------------------------------------
// LinkPrecedence
// ---------------------------------------------------------------------------

/// Whether a contact is the canonical record of its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    /// Column representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkPrecedence {
    type Err = ContactLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(ContactLinkError::validation(format!(
                "unknown link precedence '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A stored contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    /// Primary this contact belongs to; `None` iff the contact is primary.
    pub linked_id: Option<ContactId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// The primary of this contact's cluster: itself, or the contact it links to.
    pub fn primary_id(&self) -> Result<ContactId> {
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Primary, _) => Ok(self.id),
            (LinkPrecedence::Secondary, Some(linked)) => Ok(linked),
            (LinkPrecedence::Secondary, None) => Err(ContactLinkError::validation(format!(
                "secondary contact {} has no linked primary",
                self.id
            ))),
        }
    }

    /// Ordering key used everywhere clusters are sorted (oldest first).
    pub fn age_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }
}

/// Insert payload; the store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDraft {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl ContactDraft {
    /// A fresh primary with no links.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// A secondary attached to `linked_id`.
    pub fn secondary(
        linked_id: ContactId,
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(linked_id),
        }
    }

    /// Check the invariants a draft must satisfy before it reaches storage.
    pub fn validate(&self) -> Result<()> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactLinkError::validation(
                "contact needs an email or a phone number",
            ));
        }
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Primary, Some(linked)) => Err(ContactLinkError::validation(format!(
                "primary contact cannot link to {linked}"
            ))),
            (LinkPrecedence::Secondary, None) => Err(ContactLinkError::validation(
                "secondary contact must link to a primary",
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response surface
// ---------------------------------------------------------------------------

/// Incoming identify request: `{ "email": ..., "phoneNumber": ... }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    /// Accepts a JSON string or integer.
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
        }
    }

    /// Trim both identifiers and drop empty ones.
    ///
    /// Fails with [`ContactLinkError::InvalidRequest`] if nothing remains.
    pub fn normalized(&self) -> Result<Self> {
        let email = clean(self.email.as_deref());
        let phone_number = clean(self.phone_number.as_deref());
        if email.is_none() && phone_number.is_none() {
            return Err(ContactLinkError::invalid_request(MISSING_IDENTIFIER));
        }
        Ok(Self {
            email,
            phone_number,
        })
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|v| match v {
            StringOrNumber::Text(s) => s,
            StringOrNumber::Signed(n) => n.to_string(),
            StringOrNumber::Unsigned(n) => n.to_string(),
        }),
    )
}

/// Canonical consolidated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Success envelope: `{ "contact": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: IdentityView,
}

impl From<IdentityView> for IdentifyResponse {
    fn from(contact: IdentityView) -> Self {
        Self { contact }
    }
}

/// Failure envelope: `{ "error": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_numeric_phone() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": null, "phoneNumber": 123456}"#).expect("parse");
        assert_eq!(req.email, None);
        assert_eq!(req.phone_number.as_deref(), Some("123456"));

        let req: IdentifyRequest = serde_json::from_str(r#"{"email": "a@x.com"}"#).expect("parse");
        assert_eq!(req.phone_number, None);
    }

    #[test]
    fn normalize_trims_and_drops_empty() {
        let req = IdentifyRequest::new(Some("  a@x.com ".into()), Some("   ".into()));
        let norm = req.normalized().expect("normalize");
        assert_eq!(norm.email.as_deref(), Some("a@x.com"));
        assert_eq!(norm.phone_number, None);
    }

    #[test]
    fn normalize_rejects_empty_request() {
        let err = IdentifyRequest::new(Some(String::new()), None)
            .normalized()
            .unwrap_err();
        assert!(matches!(err, ContactLinkError::InvalidRequest { .. }));
        assert!(err.to_string().contains(MISSING_IDENTIFIER));
    }

    #[test]
    fn view_serializes_camel_case() {
        let response = IdentifyResponse::from(IdentityView {
            primary_contact_id: ContactId(1),
            emails: vec!["a@x.com".into()],
            phone_numbers: vec!["111".into(), "222".into()],
            secondary_contact_ids: vec![ContactId(2)],
        });
        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["contact"]["primaryContactId"], 1);
        assert_eq!(json["contact"]["phoneNumbers"][1], "222");
        assert_eq!(json["contact"]["secondaryContactIds"][0], 2);
    }

    #[test]
    fn draft_validation() {
        assert!(ContactDraft::primary(None, None).validate().is_err());
        assert!(ContactDraft::primary(Some("a@x.com".into()), None).validate().is_ok());
        assert!(
            ContactDraft::secondary(ContactId(1), None, Some("111".into()))
                .validate()
                .is_ok()
        );
        let mut draft = ContactDraft::primary(Some("a@x.com".into()), None);
        draft.linked_id = Some(ContactId(4));
        assert!(draft.validate().is_err());
    }

    #[test]
    fn precedence_parses_column_values() {
        assert_eq!(
            "secondary".parse::<LinkPrecedence>().expect("parse"),
            LinkPrecedence::Secondary
        );
        assert!("tertiary".parse::<LinkPrecedence>().is_err());
    }
}
