use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::macros::string_enum;
use super::user::NameUpdate;

/// Number of random bytes behind each invitation token (43 URL-safe chars).
pub const TOKEN_BYTES: usize = 32;

string_enum! {
    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum InvitationStatus {
        Pending => "pending",
        Accepted => "accepted",
        Declined => "declined",
        Expired => "expired",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub status: InvitationStatus,
    pub organization_id: Uuid,
    pub position_id: Option<Uuid>,
    pub invited_by: Uuid,
    pub is_accepted: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_sent_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the token can still be answered.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && !self.is_accepted && self.expires_at > now
    }

    /// Status as seen by readers: a lapsed pending invitation reads as expired
    /// whether or not the sweep has persisted it yet.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        match self.status {
            InvitationStatus::Pending if self.is_expired(now) => InvitationStatus::Expired,
            status => status,
        }
    }

    /// Resend is allowed for anything not yet accepted.
    pub fn can_resend(&self) -> bool {
        !self.is_accepted
            && matches!(
                self.status,
                InvitationStatus::Pending | InvitationStatus::Declined | InvitationStatus::Expired
            )
    }

    /// Lease granted by a resend: a full `ttl` from `now`, and always later
    /// than the current one.
    pub fn renewed_lease(&self, now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
        (now + ttl).max(self.expires_at + Duration::microseconds(1))
    }
}

#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub email: String,
    pub token: String,
    pub organization_id: Uuid,
    pub position_id: Option<Uuid>,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewInvitation {
    pub fn into_invitation(self) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            email: self.email,
            token: self.token,
            status: InvitationStatus::Pending,
            organization_id: self.organization_id,
            position_id: self.position_id,
            invited_by: self.invited_by,
            is_accepted: false,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_sent_at: self.created_at,
        }
    }
}

/// Generate an unguessable, URL-safe invitation token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationInput {
    pub email: String,
    pub organization_id: Uuid,
    pub position_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondInvitationInput {
    pub token: String,
    pub accept: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInvitationsQuery {
    pub status: Option<InvitationStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;
pub const MAX_PAGE: i64 = 10_000;

impl ListInvitationsQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InvitationCounts {
    pub total: i64,
    pub pending: i64,
    pub accepted: i64,
    pub declined: i64,
    pub expired: i64,
}

impl InvitationCounts {
    pub fn record(&mut self, status: InvitationStatus) {
        self.total += 1;
        match status {
            InvitationStatus::Pending => self.pending += 1,
            InvitationStatus::Accepted => self.accepted += 1,
            InvitationStatus::Declined => self.declined += 1,
            InvitationStatus::Expired => self.expired += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationView {
    pub id: Uuid,
    pub email: String,
    pub status: InvitationStatus,
    pub organization_id: Uuid,
    pub position_id: Option<Uuid>,
    pub invited_by: Uuid,
    pub is_accepted: bool,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_sent_at: DateTime<Utc>,
}

impl InvitationView {
    pub fn new(invitation: Invitation, now: DateTime<Utc>) -> Self {
        Self {
            status: invitation.effective_status(now),
            is_expired: invitation.is_expired(now),
            id: invitation.id,
            email: invitation.email,
            organization_id: invitation.organization_id,
            position_id: invitation.position_id,
            invited_by: invitation.invited_by,
            is_accepted: invitation.is_accepted,
            created_at: invitation.created_at,
            expires_at: invitation.expires_at,
            last_sent_at: invitation.last_sent_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationList {
    pub counts: InvitationCounts,
    pub invitations: Vec<InvitationView>,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationPreview {
    pub email: String,
    pub organization_id: Uuid,
    pub organization_name: String,
    pub position_title: Option<String>,
    pub inviter_name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedInvitation {
    pub invitation_id: Uuid,
    pub user_id: Uuid,
    pub employee_id: Uuid,
    pub user_created: bool,
    pub employee_created: bool,
}

/// The account an acceptance attaches to the organization.
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptingIdentity {
    /// The signed-in recipient. Empty names are filled in and a supplied
    /// password replaces the current one.
    Authenticated {
        user_id: Uuid,
        names: NameUpdate,
        password: Option<String>,
    },
    /// An existing account reached with the token alone; it is left untouched.
    Linked { user_id: Uuid },
    /// No account exists yet for the invited email.
    New {
        first_name: String,
        last_name: String,
        password: Option<String>,
    },
}

impl AcceptingIdentity {
    /// Password to store, if this acceptance is allowed to set one.
    pub fn password(&self) -> Option<&str> {
        match self {
            AcceptingIdentity::Authenticated { password, .. }
            | AcceptingIdentity::New { password, .. } => password.as_deref(),
            AcceptingIdentity::Linked { .. } => None,
        }
    }
}

/// Every write of an acceptance. Stores apply it as a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    pub invitation_id: Uuid,
    pub identity: AcceptingIdentity,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespondOutcome {
    Declined { invitation_id: Uuid },
    Accepted(AcceptedInvitation),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondInvitationResponse {
    pub status: InvitationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<AcceptedInvitation>,
    /// Session token for the identity that accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
