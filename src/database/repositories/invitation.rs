use anyhow::{Result, anyhow};
use bcrypt::{DEFAULT_COST, hash};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{employee, organization, user};
use crate::database::{
    PgStore, StoreError,
    models::{
        Acceptance, AcceptedInvitation, AcceptingIdentity, Invitation, InvitationCounts,
        InvitationStatus, ListInvitationsQuery, NewEmployee, NewInvitation, User,
    },
    transaction::settle,
    utils::sql,
};

const TOKEN_CONSTRAINT: &str = "invitations_token_key";
const PENDING_CONSTRAINT: &str = "invitations_one_pending_per_email";

const INVITATION_COLUMNS: &str = r#"
    id,
    email,
    token,
    status,
    organization_id,
    position_id,
    invited_by,
    is_accepted,
    created_at,
    expires_at,
    last_sent_at
"#;

/// Persistence for invitations. Rows are never deleted.
///
/// Emails passed in are expected to be normalized already.
pub trait InvitationStore {
    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>>;

    /// Pending, not accepted and not yet expired.
    async fn find_open_by_token(&self, token: &str, now: DateTime<Utc>)
    -> Result<Option<Invitation>>;

    async fn has_open_pending(
        &self,
        email: &str,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Most recently created invitation for the pair, whatever its status.
    async fn latest_invitation(&self, email: &str, organization_id: Uuid)
    -> Result<Option<Invitation>>;

    /// Persist `expired` on lapsed pending rows for the pair.
    async fn expire_lapsed_for(
        &self,
        email: &str,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn insert_invitation(&self, new: NewInvitation) -> Result<Invitation, StoreError>;

    /// Put an invitation sent by `invited_by` back to pending with the lease
    /// from [`Invitation::renewed_lease`], computed while the row is locked.
    /// Returns `None` when the row is missing, was sent by someone else, or
    /// can no longer be resent.
    async fn renew_invitation(
        &self,
        id: Uuid,
        invited_by: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError>;

    /// Lock the open invitation, resolve the identity, the employee profile
    /// and the membership, then mark it accepted. Nothing is kept unless every
    /// step succeeds.
    async fn accept_invitation(
        &self,
        acceptance: Acceptance,
    ) -> Result<AcceptedInvitation, StoreError>;

    /// Move an open invitation to `accepted` or `declined`. Returns false when
    /// the invitation was no longer open, so only one response can win.
    async fn close_invitation(
        &self,
        id: Uuid,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Persist `expired` on every lapsed pending row.
    async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn list_invitations(
        &self,
        invited_by: Uuid,
        query: &ListInvitationsQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>>;

    async fn count_invitations(
        &self,
        invited_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<InvitationCounts>;
}

fn classify(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.constraint() {
            Some(TOKEN_CONSTRAINT) => return StoreError::DuplicateToken,
            Some(PENDING_CONSTRAINT) => return StoreError::DuplicatePending,
            _ => {}
        }
    }
    StoreError::Other(error.into())
}

impl InvitationStore for PgStore {
    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(&sql(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = ?"
        )))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(invitation)
    }

    async fn find_open_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(&sql(&format!(
            r#"
            SELECT
                {INVITATION_COLUMNS}
            FROM
                invitations
            WHERE
                token = ?
                AND status = 'pending'
                AND is_accepted = FALSE
                AND expires_at > ?
            "#
        )))
        .bind(token)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        Ok(invitation)
    }

    async fn has_open_pending(
        &self,
        email: &str,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&sql(r#"
            SELECT EXISTS (
                SELECT
                    1
                FROM
                    invitations
                WHERE
                    email = ?
                    AND organization_id = ?
                    AND status = 'pending'
                    AND expires_at > ?
            )
        "#))
        .bind(email)
        .bind(organization_id)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(exists)
    }

    async fn latest_invitation(
        &self,
        email: &str,
        organization_id: Uuid,
    ) -> Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(&sql(&format!(
            r#"
            SELECT
                {INVITATION_COLUMNS}
            FROM
                invitations
            WHERE
                email = ?
                AND organization_id = ?
            ORDER BY
                created_at DESC
            LIMIT 1
            "#
        )))
        .bind(email)
        .bind(organization_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(invitation)
    }

    async fn expire_lapsed_for(
        &self,
        email: &str,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(&sql(r#"
            UPDATE invitations
            SET
                status = 'expired'
            WHERE
                email = ?
                AND organization_id = ?
                AND status = 'pending'
                AND expires_at <= ?
        "#))
        .bind(email)
        .bind(organization_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_invitation(&self, new: NewInvitation) -> Result<Invitation, StoreError> {
        let invitation = new.into_invitation();

        sqlx::query_as::<_, Invitation>(&sql(&format!(
            r#"
            INSERT INTO
                invitations (
                    id,
                    email,
                    token,
                    status,
                    organization_id,
                    position_id,
                    invited_by,
                    is_accepted,
                    created_at,
                    expires_at,
                    last_sent_at
                )
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING
                {INVITATION_COLUMNS}
            "#
        )))
        .bind(invitation.id)
        .bind(&invitation.email)
        .bind(&invitation.token)
        .bind(invitation.status)
        .bind(invitation.organization_id)
        .bind(invitation.position_id)
        .bind(invitation.invited_by)
        .bind(invitation.is_accepted)
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .bind(invitation.last_sent_at)
        .fetch_one(self.pool())
        .await
        .map_err(classify)
    }

    async fn renew_invitation(
        &self,
        id: Uuid,
        invited_by: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        let mut tx = self.pool().begin().await?;
        let outcome = renew_locked(&mut tx, id, invited_by, ttl, now).await;
        settle(tx, outcome).await
    }

    async fn accept_invitation(
        &self,
        acceptance: Acceptance,
    ) -> Result<AcceptedInvitation, StoreError> {
        // Hash before any row is locked.
        let password_hash = acceptance
            .identity
            .password()
            .map(|password| hash(password, DEFAULT_COST))
            .transpose()
            .map_err(anyhow::Error::from)?;

        let mut tx = self.pool().begin().await?;
        let outcome = accept_locked(&mut tx, &acceptance, password_hash.as_deref()).await;
        settle(tx, outcome).await
    }

    async fn close_invitation(
        &self,
        id: Uuid,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(&sql(r#"
            UPDATE invitations
            SET
                status = ?,
                is_accepted = ?
            WHERE
                id = ?
                AND status = 'pending'
                AND is_accepted = FALSE
                AND expires_at > ?
        "#))
        .bind(status)
        .bind(status == InvitationStatus::Accepted)
        .bind(id)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(&sql(r#"
            UPDATE invitations
            SET
                status = 'expired'
            WHERE
                status = 'pending'
                AND expires_at <= ?
        "#))
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_invitations(
        &self,
        invited_by: Uuid,
        query: &ListInvitationsQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>> {
        let (status_clause, binds_now) = match query.status {
            None => ("", false),
            Some(InvitationStatus::Pending) => ("AND status = 'pending' AND expires_at > ?", true),
            Some(InvitationStatus::Expired) => (
                "AND (status = 'expired' OR (status = 'pending' AND expires_at <= ?))",
                true,
            ),
            Some(InvitationStatus::Accepted) => ("AND status = 'accepted'", false),
            Some(InvitationStatus::Declined) => ("AND status = 'declined'", false),
        };

        let statement = sql(&format!(
            r#"
            SELECT
                {INVITATION_COLUMNS}
            FROM
                invitations
            WHERE
                invited_by = ?
                {status_clause}
            ORDER BY
                created_at DESC
            LIMIT ?
            OFFSET ?
            "#
        ));

        let mut select = sqlx::query_as::<_, Invitation>(&statement).bind(invited_by);
        if binds_now {
            select = select.bind(now);
        }

        let invitations = select
            .bind(query.per_page())
            .bind(query.offset())
            .fetch_all(self.pool())
            .await?;

        Ok(invitations)
    }

    async fn count_invitations(
        &self,
        invited_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<InvitationCounts> {
        let counts = sqlx::query_as::<_, InvitationCounts>(&sql(r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (
                    WHERE status = 'pending' AND expires_at > ?
                ) AS pending,
                COUNT(*) FILTER (WHERE status = 'accepted') AS accepted,
                COUNT(*) FILTER (WHERE status = 'declined') AS declined,
                COUNT(*) FILTER (
                    WHERE status = 'expired' OR (status = 'pending' AND expires_at <= ?)
                ) AS expired
            FROM
                invitations
            WHERE
                invited_by = ?
        "#))
        .bind(now)
        .bind(now)
        .bind(invited_by)
        .fetch_one(self.pool())
        .await?;

        Ok(counts)
    }
}

async fn renew_locked(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    invited_by: Uuid,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Option<Invitation>, StoreError> {
    let current = sqlx::query_as::<_, Invitation>(&sql(&format!(
        r#"
        SELECT
            {INVITATION_COLUMNS}
        FROM
            invitations
        WHERE
            id = ?
            AND invited_by = ?
        FOR UPDATE
        "#
    )))
    .bind(id)
    .bind(invited_by)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(current) = current.filter(Invitation::can_resend) else {
        return Ok(None);
    };

    let renewed = sqlx::query_as::<_, Invitation>(&sql(&format!(
        r#"
        UPDATE invitations
        SET
            status = 'pending',
            is_accepted = FALSE,
            expires_at = ?,
            last_sent_at = ?
        WHERE
            id = ?
        RETURNING
            {INVITATION_COLUMNS}
        "#
    )))
    .bind(current.renewed_lease(now, ttl))
    .bind(now)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
    .map_err(classify)?;

    Ok(Some(renewed))
}

async fn accept_locked(
    tx: &mut Transaction<'_, Postgres>,
    acceptance: &Acceptance,
    password_hash: Option<&str>,
) -> Result<AcceptedInvitation, StoreError> {
    // A concurrent decline or acceptance waits on this lock and then finds
    // the row closed.
    let invitation = sqlx::query_as::<_, Invitation>(&sql(&format!(
        r#"
        SELECT
            {INVITATION_COLUMNS}
        FROM
            invitations
        WHERE
            id = ?
            AND status = 'pending'
            AND is_accepted = FALSE
            AND expires_at > ?
        FOR UPDATE
        "#
    )))
    .bind(acceptance.invitation_id)
    .bind(acceptance.accepted_at)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StoreError::InvitationClosed)?;

    let (user_id, user_created) = match &acceptance.identity {
        AcceptingIdentity::Authenticated { user_id, names, .. } => {
            user::write_names(&mut **tx, *user_id, names).await?;
            if let Some(password_hash) = password_hash {
                user::write_password_hash(&mut **tx, *user_id, password_hash).await?;
            }
            (*user_id, false)
        }
        AcceptingIdentity::Linked { user_id } => (*user_id, false),
        AcceptingIdentity::New {
            first_name,
            last_name,
            ..
        } => {
            let mut candidate = User::new(
                invitation.email.clone(),
                first_name.trim().to_string(),
                last_name.trim().to_string(),
            );
            candidate.password_hash = password_hash.map(str::to_string);

            match user::insert_if_absent(&mut **tx, &candidate).await? {
                Some(created) => (created.id, true),
                // Registered in the meantime: link it like any existing account.
                None => {
                    let existing = user::select_by_email(&mut **tx, &invitation.email)
                        .await?
                        .ok_or_else(|| anyhow!("Account for {} vanished", invitation.email))?;
                    (existing.id, false)
                }
            }
        }
    };

    let candidate = NewEmployee::joining_today(user_id, invitation.position_id).into_employee();
    let (employee_id, employee_created) =
        match employee::insert_if_absent(&mut **tx, &candidate).await? {
            Some(created) => (created.id, true),
            None => {
                let existing = employee::select_by_user(&mut **tx, user_id)
                    .await?
                    .ok_or_else(|| anyhow!("Employee profile for user {} vanished", user_id))?;
                (existing.id, false)
            }
        };

    if !organization::insert_member(&mut **tx, invitation.organization_id, employee_id).await? {
        return Err(StoreError::AlreadyMember);
    }

    sqlx::query(&sql(r#"
        UPDATE invitations
        SET
            status = 'accepted',
            is_accepted = TRUE
        WHERE
            id = ?
    "#))
    .bind(invitation.id)
    .execute(&mut **tx)
    .await?;

    Ok(AcceptedInvitation {
        invitation_id: invitation.id,
        user_id,
        employee_id,
        user_created,
        employee_created,
    })
}
