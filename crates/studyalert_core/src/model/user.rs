//! Account record read by the engine for email delivery.

use super::validation::{require_text, ValidationError};
use super::work_item::RecordId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: RecordId,
    pub name: String,
    pub email: String,
    /// Opaque hash produced by the auth layer.
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub verification_token: Option<String>,
}

impl User {
    /// Creates an unverified account carrying a pending verification token.
    pub fn unverified(
        name: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        verification_token: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            is_verified: false,
            verification_token: Some(verification_token.into()),
        }
    }

    /// Whether there is an address to send to. Records written outside this
    /// crate can carry a blank one.
    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("email", &self.email)?;
        Ok(())
    }
}

/// Partial profile update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }

    /// Applies the provided fields to `user`.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(email) = &self.email {
            require_text("email", email)?;
        }
        Ok(())
    }
}
