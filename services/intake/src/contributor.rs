//! Contributor identity captured by the intro form.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

/// Anchored at the start only, so trailing text after a valid address is accepted.
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@]+@[^@]+\.[^@]+").expect("email pattern is valid"));

/// Errors shown inline on the identity form
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter your name.")]
    MissingName,

    #[error("Please enter a valid email address.")]
    InvalidEmail,

    #[error("Please enter your organisation.")]
    MissingOrganisation,
}

impl ValidationError {
    /// Form field the error belongs to
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingName => "name",
            ValidationError::InvalidEmail => "email",
            ValidationError::MissingOrganisation => "organisation",
        }
    }
}

/// Raw identity fields as submitted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub organisation: Option<String>,
}

/// A validated contributor. Only constructed through [`Contributor::from_form`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contributor {
    name: String,
    email: String,
    organisation: Option<String>,
}

impl Contributor {
    /// Trim and validate the submitted fields
    pub fn from_form(
        form: &IdentityForm,
        require_organisation: bool,
    ) -> Result<Self, ValidationError> {
        let name = form.name.trim();
        let email = form.email.trim();
        let organisation = form
            .organisation
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty());

        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }

        if !is_valid_email(email) {
            return Err(ValidationError::InvalidEmail);
        }

        if require_organisation && organisation.is_none() {
            return Err(ValidationError::MissingOrganisation);
        }

        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
            organisation: organisation.map(str::to_string),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn organisation(&self) -> Option<&str> {
        self.organisation.as_deref()
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, email: &str, organisation: Option<&str>) -> IdentityForm {
        IdentityForm {
            name: name.to_string(),
            email: email.to_string(),
            organisation: organisation.map(str::to_string),
        }
    }

    #[test]
    fn test_accepts_valid_identity() {
        let contributor = Contributor::from_form(&form("Jo Lee", "jo@example.com", None), false)
            .unwrap();
        assert_eq!(contributor.name(), "Jo Lee");
        assert_eq!(contributor.email(), "jo@example.com");
        assert_eq!(contributor.organisation(), None);
    }

    #[test]
    fn test_trims_fields() {
        let contributor = Contributor::from_form(
            &form("  Jo Lee ", " jo@example.com\n", Some("  Sunny Care  ")),
            true,
        )
        .unwrap();
        assert_eq!(contributor.name(), "Jo Lee");
        assert_eq!(contributor.email(), "jo@example.com");
        assert_eq!(contributor.organisation(), Some("Sunny Care"));
    }

    #[test]
    fn test_rejects_blank_name() {
        assert_eq!(
            Contributor::from_form(&form("   ", "jo@example.com", None), false),
            Err(ValidationError::MissingName)
        );
    }

    #[test]
    fn test_rejects_invalid_email() {
        for email in ["not-an-email", "", "jo@example", "@example.com", "jo@@example.com"] {
            assert_eq!(
                Contributor::from_form(&form("Jo Lee", email, None), false),
                Err(ValidationError::InvalidEmail),
                "{email} should be rejected"
            );
        }
    }

    #[test]
    fn test_email_pattern() {
        assert!(is_valid_email("jo@example.com"));
        assert!(is_valid_email("jo.lee+survey@care.example.org"));
        assert!(!is_valid_email("jo example.com"));
    }

    #[test]
    fn test_organisation_requirement() {
        assert_eq!(
            Contributor::from_form(&form("Jo Lee", "jo@example.com", Some(" ")), true),
            Err(ValidationError::MissingOrganisation)
        );
        let contributor =
            Contributor::from_form(&form("Jo Lee", "jo@example.com", Some(" ")), false).unwrap();
        assert_eq!(contributor.organisation(), None);
    }

    #[test]
    fn test_name_checked_before_email() {
        let err = Contributor::from_form(&form("", "bad", None), false).unwrap_err();
        assert_eq!(err.field(), "name");
    }
}
