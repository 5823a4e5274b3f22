//! User records for each auth recipe.
//!
//! # Responsibility
//! - Define the closed set of recipes and their detail records.
//! - Validate caller-provided records before they reach storage.
//!
//! # Invariants
//! - `RecipeId::as_str` is the value persisted in the registry table.
//! - A passwordless user has at least one of email or phone number.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Globally unique user identifier, shared by registry and detail rows.
pub type UserId = String;

/// Auth method that owns a user's detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeId {
    EmailPassword,
    ThirdParty,
    Passwordless,
}

impl RecipeId {
    pub const ALL: [RecipeId; 3] = [
        RecipeId::EmailPassword,
        RecipeId::ThirdParty,
        RecipeId::Passwordless,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailPassword => "emailpassword",
            Self::ThirdParty => "thirdparty",
            Self::Passwordless => "passwordless",
        }
    }

    /// Parses a persisted recipe id. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|recipe| recipe.as_str() == value)
    }
}

impl Display for RecipeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn generate_user_id() -> UserId {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPasswordUser {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub time_joined: i64,
}

impl EmailPasswordUser {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>, time_joined: i64) -> Self {
        Self {
            id: generate_user_id(),
            email: email.into(),
            password_hash: password_hash.into(),
            time_joined,
        }
    }
}

/// Provider-side identity of a third-party user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyIdentity {
    /// Provider name, e.g. `google`.
    pub id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyUser {
    pub id: UserId,
    pub email: String,
    pub third_party: ThirdPartyIdentity,
    pub time_joined: i64,
}

impl ThirdPartyUser {
    pub fn new(
        email: impl Into<String>,
        third_party_id: impl Into<String>,
        third_party_user_id: impl Into<String>,
        time_joined: i64,
    ) -> Self {
        Self {
            id: generate_user_id(),
            email: email.into(),
            third_party: ThirdPartyIdentity {
                id: third_party_id.into(),
                user_id: third_party_user_id.into(),
            },
            time_joined,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordlessUser {
    pub id: UserId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub time_joined: i64,
}

impl PasswordlessUser {
    pub fn with_email(email: impl Into<String>, time_joined: i64) -> Self {
        Self {
            id: generate_user_id(),
            email: Some(email.into()),
            phone_number: None,
            time_joined,
        }
    }

    pub fn with_phone_number(phone_number: impl Into<String>, time_joined: i64) -> Self {
        Self {
            id: generate_user_id(),
            email: None,
            phone_number: Some(phone_number.into()),
            time_joined,
        }
    }
}

/// A user of any recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "recipe_id", rename_all = "lowercase")]
pub enum AuthRecipeUser {
    EmailPassword(EmailPasswordUser),
    ThirdParty(ThirdPartyUser),
    Passwordless(PasswordlessUser),
}

/// Sign-up payload; the same shape as a stored user.
pub type NewUser = AuthRecipeUser;

impl AuthRecipeUser {
    pub fn id(&self) -> &str {
        match self {
            Self::EmailPassword(user) => &user.id,
            Self::ThirdParty(user) => &user.id,
            Self::Passwordless(user) => &user.id,
        }
    }

    pub fn time_joined(&self) -> i64 {
        match self {
            Self::EmailPassword(user) => user.time_joined,
            Self::ThirdParty(user) => user.time_joined,
            Self::Passwordless(user) => user.time_joined,
        }
    }

    pub fn recipe_id(&self) -> RecipeId {
        match self {
            Self::EmailPassword(_) => RecipeId::EmailPassword,
            Self::ThirdParty(_) => RecipeId::ThirdParty,
            Self::Passwordless(_) => RecipeId::Passwordless,
        }
    }

    /// Validates caller-provided fields before any write.
    ///
    /// # Errors
    /// - Empty id or blank required identity fields.
    /// - Passwordless user without email and phone number.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        if self.id().trim().is_empty() {
            return Err(UserValidationError::EmptyUserId);
        }
        match self {
            Self::EmailPassword(user) => {
                if user.email.trim().is_empty() {
                    return Err(UserValidationError::EmptyField("email"));
                }
            }
            Self::ThirdParty(user) => {
                if user.third_party.id.trim().is_empty() {
                    return Err(UserValidationError::EmptyField("third_party_id"));
                }
                if user.third_party.user_id.trim().is_empty() {
                    return Err(UserValidationError::EmptyField("third_party_user_id"));
                }
            }
            Self::Passwordless(user) => {
                let blank = |value: &Option<String>| {
                    value.as_deref().map_or(true, |value| value.trim().is_empty())
                };
                if blank(&user.email) && blank(&user.phone_number) {
                    return Err(UserValidationError::MissingContact);
                }
            }
        }
        Ok(())
    }
}

impl From<EmailPasswordUser> for AuthRecipeUser {
    fn from(value: EmailPasswordUser) -> Self {
        Self::EmailPassword(value)
    }
}

impl From<ThirdPartyUser> for AuthRecipeUser {
    fn from(value: ThirdPartyUser) -> Self {
        Self::ThirdParty(value)
    }
}

impl From<PasswordlessUser> for AuthRecipeUser {
    fn from(value: PasswordlessUser) -> Self {
        Self::Passwordless(value)
    }
}

/// Validation failures for caller-provided user records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    EmptyUserId,
    EmptyField(&'static str),
    MissingContact,
}

impl Display for UserValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyUserId => write!(f, "user id must not be empty"),
            Self::EmptyField(field) => write!(f, "{field} must not be empty"),
            Self::MissingContact => {
                write!(f, "passwordless user needs an email or a phone number")
            }
        }
    }
}

impl Error for UserValidationError {}

/// Single-use password reset token for an email-password user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetToken {
    pub user_id: UserId,
    pub token: String,
    /// Unix epoch milliseconds.
    pub token_expiry: i64,
}

impl PasswordResetToken {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>, token_expiry: i64) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
            token_expiry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AuthRecipeUser, EmailPasswordUser, PasswordlessUser, RecipeId, ThirdPartyUser,
        UserValidationError,
    };

    #[test]
    fn recipe_ids_round_trip_through_storage_names() {
        for recipe in RecipeId::ALL {
            assert_eq!(RecipeId::parse(recipe.as_str()), Some(recipe));
        }
        assert_eq!(RecipeId::parse("webauthn"), None);
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = EmailPasswordUser::new("a@example.com", "hash", 1);
        let second = EmailPasswordUser::new("a@example.com", "hash", 1);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn passwordless_user_needs_contact() {
        let mut user = PasswordlessUser::with_email("a@example.com", 1);
        assert!(AuthRecipeUser::from(user.clone()).validate().is_ok());

        user.email = Some("  ".to_string());
        assert_eq!(
            AuthRecipeUser::from(user).validate(),
            Err(UserValidationError::MissingContact)
        );
    }

    #[test]
    fn third_party_user_needs_provider_identity() {
        let user = ThirdPartyUser::new("a@example.com", "google", "", 1);
        assert_eq!(
            AuthRecipeUser::from(user).validate(),
            Err(UserValidationError::EmptyField("third_party_user_id"))
        );
    }

    #[test]
    fn union_exposes_common_fields() {
        let user: AuthRecipeUser = ThirdPartyUser::new("a@example.com", "github", "gh-1", 42).into();
        assert_eq!(user.recipe_id(), RecipeId::ThirdParty);
        assert_eq!(user.time_joined(), 42);
        assert!(!user.id().is_empty());
    }
}
