//! User accounts.
//!
//! A user carries a primary role plus any number of additional roles linked
//! through the user-role join table. Passwords and tokens are handled by an
//! external identity provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult, Entity, RoleId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Auth provider
// ─────────────────────────────────────────────────────────────────────────────

/// Where the account authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthProvider {
    #[default]
    Local,
    External,
}

impl AuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::External => "EXTERNAL",
        }
    }
}

impl core::str::FromStr for AuthProvider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(Self::Local),
            "EXTERNAL" => Ok(Self::External),
            other => Err(DomainError::validation(format!("unknown auth provider: {other}"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Lowercased; unique across users.
    pub email: String,
    pub full_name: Option<String>,
    pub auth_provider: AuthProvider,
    /// Subject at the external identity provider; unique when present.
    pub external_subject: Option<String>,
    pub organization_slug: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub primary_role_id: Option<RoleId>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: create a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub auth_provider: AuthProvider,
    #[serde(default)]
    pub external_subject: Option<String>,
    #[serde(default)]
    pub organization_slug: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    /// Roles to assign right after creation; the first becomes primary.
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

/// Command: partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUser {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub organization_slug: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_superuser: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// Trim, lowercase and shape-check an email address.
pub fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= 255
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !email.contains(char::is_whitespace)
            }
            None => false,
        };
    if !valid {
        return Err(DomainError::validation(format!("invalid email: {}", raw.trim())));
    }
    Ok(email)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl User {
    /// Build a new account. Role links are applied separately.
    pub fn register(id: UserId, cmd: NewUser, now: DateTime<Utc>) -> DomainResult<Self> {
        let email = normalize_email(&cmd.email)?;
        let external_subject = clean(cmd.external_subject);
        if cmd.auth_provider == AuthProvider::External && external_subject.is_none() {
            return Err(DomainError::validation(
                "external accounts require an external_subject",
            ));
        }

        Ok(Self {
            id,
            email,
            full_name: clean(cmd.full_name),
            auth_provider: cmd.auth_provider,
            external_subject,
            organization_slug: clean(cmd.organization_slug),
            is_active: cmd.is_active,
            is_superuser: cmd.is_superuser,
            primary_role_id: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a partial update. Email uniqueness is checked by the caller.
    pub fn apply_update(&mut self, cmd: UpdateUser, now: DateTime<Utc>) -> DomainResult<()> {
        let email = cmd.email.as_deref().map(normalize_email).transpose()?;

        if let Some(email) = email {
            self.email = email;
        }
        if let Some(full_name) = cmd.full_name {
            self.full_name = clean(Some(full_name));
        }
        if let Some(slug) = cmd.organization_slug {
            self.organization_slug = clean(Some(slug));
        }
        if let Some(active) = cmd.is_active {
            self.is_active = active;
        }
        if let Some(superuser) = cmd.is_superuser {
            self.is_superuser = superuser;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.is_active {
            self.is_active = false;
            self.updated_at = now;
        }
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            full_name: Some("  Asha Rao ".to_string()),
            auth_provider: AuthProvider::Local,
            external_subject: None,
            organization_slug: None,
            is_active: true,
            is_superuser: false,
            role_ids: Vec::new(),
        }
    }

    #[test]
    fn register_normalizes_email_and_name() {
        let user = User::register(UserId::new(), new_user(" Asha@Pharma.Example "), Utc::now())
            .unwrap();
        assert_eq!(user.email, "asha@pharma.example");
        assert_eq!(user.full_name.as_deref(), Some("Asha Rao"));
        assert_eq!(user.auth_provider, AuthProvider::Local);
        assert!(user.primary_role_id.is_none());
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for email in ["", "no-at-sign", "@pharma.example", "a@b", "a b@pharma.example"] {
            let err = User::register(UserId::new(), new_user(email), Utc::now()).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR", "{email}");
        }
    }

    #[test]
    fn external_accounts_need_a_subject() {
        let mut cmd = new_user("sso@pharma.example");
        cmd.auth_provider = AuthProvider::External;
        assert!(User::register(UserId::new(), cmd.clone(), Utc::now()).is_err());

        cmd.external_subject = Some("sub-123".to_string());
        let user = User::register(UserId::new(), cmd, Utc::now()).unwrap();
        assert_eq!(user.external_subject.as_deref(), Some("sub-123"));
    }

    #[test]
    fn update_is_atomic_on_invalid_email() {
        let mut user =
            User::register(UserId::new(), new_user("asha@pharma.example"), Utc::now()).unwrap();
        let before = user.clone();
        let err = user
            .apply_update(
                UpdateUser {
                    email: Some("broken".to_string()),
                    is_active: Some(false),
                    ..UpdateUser::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(user, before);
    }

    #[test]
    fn deactivate_is_idempotent() {
        let mut user =
            User::register(UserId::new(), new_user("asha@pharma.example"), Utc::now()).unwrap();
        user.deactivate(Utc::now());
        let stamped = user.updated_at;
        user.deactivate(Utc::now());
        assert!(!user.is_active);
        assert_eq!(user.updated_at, stamped);
    }

    #[test]
    fn auth_provider_round_trips_through_its_code() {
        for p in [AuthProvider::Local, AuthProvider::External] {
            assert_eq!(p.as_str().parse::<AuthProvider>().unwrap(), p);
        }
    }
}
