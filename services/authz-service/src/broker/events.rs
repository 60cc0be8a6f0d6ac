//! User lifecycle events and the sync request that produces them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version stamped on every event.
pub const EVENT_VERSION: &str = "1.0";

/// Lifecycle event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEventKind {
    /// First sync of a user
    UserCreated,
    /// Later sync of a known user
    UserUpdated,
}

impl UserEventKind {
    /// Wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "UserCreated",
            Self::UserUpdated => "UserUpdated",
        }
    }
}

impl fmt::Display for UserEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a synced user is new or already known, as decided by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncKind {
    /// First sync; a user id is generated
    New,
    /// Known user with an existing id
    Existing {
        /// Id assigned when the user was created
        user_id: String,
    },
}

/// User data pushed by the identity collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUserRequest {
    /// Identity-provider user id; required
    #[serde(default)]
    pub auth0_id: String,
    /// E-mail address; required
    #[serde(default)]
    pub email: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Whether the identity provider verified the e-mail address
    #[serde(default)]
    pub email_verified: bool,
    /// Preferred locale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Roles held by the user
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SyncUserRequest {
    /// Name of the first required field that is blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.auth0_id.trim().is_empty() {
            Some("auth0_id")
        } else if self.email.trim().is_empty() {
            Some("email")
        } else {
            None
        }
    }
}

/// Immutable user lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    event_id: Uuid,
    event_type: UserEventKind,
    timestamp: DateTime<Utc>,
    version: String,
    user_id: String,
    auth0_id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl LifecycleEvent {
    /// Event announcing `request` as a new or updated user.
    pub fn from_sync(kind: &SyncKind, request: &SyncUserRequest) -> Self {
        let now = Utc::now();
        let (event_type, user_id, created_at, updated_at) = match kind {
            SyncKind::New => (UserEventKind::UserCreated, Uuid::new_v4().to_string(), Some(now), None),
            SyncKind::Existing { user_id } => (UserEventKind::UserUpdated, user_id.clone(), None, Some(now)),
        };

        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: now,
            version: EVENT_VERSION.to_string(),
            user_id,
            auth0_id: request.auth0_id.clone(),
            email: request.email.clone(),
            name: request.name.clone(),
            picture: request.picture.clone(),
            created_at,
            updated_at,
        }
    }

    /// Unique event id.
    pub const fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Created or updated.
    pub const fn event_type(&self) -> UserEventKind {
        self.event_type
    }

    /// When the event was built.
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Schema version, always [`EVENT_VERSION`].
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Partition key of the event.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Identity-provider user id.
    pub fn auth0_id(&self) -> &str {
        &self.auth0_id
    }

    /// E-mail address.
    pub fn email(&self) -> &str {
        &self.email
    }
}
