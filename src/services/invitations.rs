use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::config::{Config, MAX_DAYS};
use crate::database::{
    StoreError,
    models::{
        Acceptance, AcceptingIdentity, CreateInvitationInput, Invitation, InvitationList,
        InvitationPreview, InvitationStatus, InvitationView, ListInvitationsQuery, NameUpdate,
        NewInvitation, Organization, Position, RespondInvitationInput, RespondOutcome, User,
        generate_token, normalize_email,
    },
    repositories::HrStore,
};
use crate::error::{AppError, InvitationError};
use crate::services::notifier::{Notification, Notifier, TemplateKey};

/// Token generation is retried this many times on a collision.
const TOKEN_ATTEMPTS: usize = 3;

pub const MIN_PASSWORD_LENGTH: usize = 8;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

#[derive(Debug, Clone)]
pub struct InvitationSettings {
    pub ttl: Duration,
    pub frontend_url: String,
}

impl InvitationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: Duration::days(config.invitation_ttl_days),
            frontend_url: config.frontend_url.clone(),
        }
    }

    pub fn acceptance_url(&self, token: &str) -> String {
        format!("{}/accept-invitation?token={}", self.frontend_url, token)
    }
}

/// Issues, resends and settles invitations.
pub struct InvitationService<S, N> {
    store: S,
    notifier: N,
    settings: InvitationSettings,
}

impl<S: HrStore, N: Notifier> InvitationService<S, N> {
    pub fn new(store: S, notifier: N, settings: InvitationSettings) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Invite an email address to an organization on behalf of `inviter`.
    ///
    /// Checks run in a fixed order and the first failure wins: existing
    /// membership, an open pending invitation, then the latest prior outcome.
    pub async fn issue(
        &self,
        inviter: &User,
        input: CreateInvitationInput,
    ) -> Result<Invitation, AppError> {
        let email = normalize_email(&input.email);
        if !EMAIL_PATTERN.is_match(&email) {
            return Err(AppError::BadRequest("Enter a valid email address".to_string()));
        }

        let organization = self.organization(input.organization_id).await?;
        let position = self.position(input.position_id).await?;

        if self.email_is_member(&email, organization.id).await? {
            return Err(InvitationError::AlreadyMember.into());
        }

        let now = Utc::now();
        if self
            .store
            .has_open_pending(&email, organization.id, now)
            .await?
        {
            return Err(InvitationError::DuplicatePending.into());
        }

        if let Some(latest) = self.store.latest_invitation(&email, organization.id).await? {
            match latest.status {
                InvitationStatus::Declined => {
                    return Err(InvitationError::PreviouslyDeclined.into());
                }
                InvitationStatus::Accepted => {
                    return Err(InvitationError::PreviouslyAccepted.into());
                }
                InvitationStatus::Pending | InvitationStatus::Expired => {}
            }
        }

        // Free the one-pending slot held by rows whose lease already ran out.
        self.store
            .expire_lapsed_for(&email, organization.id, now)
            .await?;

        let invitation = self
            .insert_with_fresh_token(&email, &organization, position.as_ref(), inviter, now)
            .await?;

        log::info!(
            "User {} invited {} to organization {}",
            inviter.id,
            invitation.email,
            organization.id
        );

        self.notify(
            TemplateKey::Invitation,
            &invitation,
            &organization,
            position.as_ref(),
            inviter,
        );

        Ok(invitation)
    }

    async fn insert_with_fresh_token(
        &self,
        email: &str,
        organization: &Organization,
        position: Option<&Position>,
        inviter: &User,
        now: DateTime<Utc>,
    ) -> Result<Invitation, AppError> {
        for attempt in 1..=TOKEN_ATTEMPTS {
            let new = NewInvitation {
                email: email.to_string(),
                token: generate_token(),
                organization_id: organization.id,
                position_id: position.map(|position| position.id),
                invited_by: inviter.id,
                created_at: now,
                expires_at: now + self.settings.ttl,
            };

            match self.store.insert_invitation(new).await {
                Ok(invitation) => return Ok(invitation),
                Err(StoreError::DuplicateToken) => {
                    log::warn!("Invitation token collision on attempt {}", attempt);
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(StoreError::DuplicateToken.into())
    }

    /// Renew the lease of an invitation and send a reminder. Only the
    /// original inviter may resend, and never once it has been accepted.
    pub async fn resend(
        &self,
        requester: &User,
        invitation_id: Uuid,
    ) -> Result<Invitation, AppError> {
        let invitation = self
            .store
            .find_invitation(invitation_id)
            .await?
            .filter(|invitation| invitation.invited_by == requester.id && invitation.can_resend())
            .ok_or(InvitationError::InvalidResendTarget)?;

        let organization = self.organization(invitation.organization_id).await?;
        let position = self.position(invitation.position_id).await?;

        let renewed = self
            .store
            .renew_invitation(invitation.id, requester.id, self.settings.ttl, Utc::now())
            .await?
            .ok_or(InvitationError::InvalidResendTarget)?;

        log::info!(
            "User {} resent invitation {} to {}",
            requester.id,
            renewed.id,
            renewed.email
        );

        self.notify(
            TemplateKey::InvitationReminder,
            &renewed,
            &organization,
            position.as_ref(),
            requester,
        );

        Ok(renewed)
    }

    /// Accept or decline an invitation by token.
    ///
    /// `current` is the authenticated caller, if any. The writes of an
    /// acceptance are applied by the store as one unit, so a failed
    /// acceptance leaves no account, profile or membership behind.
    pub async fn respond(
        &self,
        input: RespondInvitationInput,
        current: Option<&User>,
    ) -> Result<RespondOutcome, AppError> {
        let now = Utc::now();
        let invitation = self
            .store
            .find_open_by_token(input.token.trim(), now)
            .await?
            .ok_or(InvitationError::NotFoundOrExpiredOrConsumed)?;

        if let Some(user) = current
            && !user.has_email(&invitation.email)
        {
            return Err(InvitationError::WrongRecipient.into());
        }

        if !input.accept {
            self.close(&invitation, InvitationStatus::Declined, now)
                .await?;
            log::info!("Invitation {} declined", invitation.id);
            return Ok(RespondOutcome::Declined {
                invitation_id: invitation.id,
            });
        }

        if let Some(password) = input.password.as_deref()
            && password.len() < MIN_PASSWORD_LENGTH
        {
            return Err(AppError::BadRequest(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let identity = self.accepting_identity(&invitation, input, current).await?;
        let accepted = self
            .store
            .accept_invitation(Acceptance {
                invitation_id: invitation.id,
                identity,
                accepted_at: now,
            })
            .await?;

        log::info!(
            "Invitation {} accepted by user {} (employee {})",
            invitation.id,
            accepted.user_id,
            accepted.employee_id
        );

        Ok(RespondOutcome::Accepted(accepted))
    }

    async fn accepting_identity(
        &self,
        invitation: &Invitation,
        input: RespondInvitationInput,
        current: Option<&User>,
    ) -> Result<AcceptingIdentity, AppError> {
        if let Some(user) = current {
            return Ok(AcceptingIdentity::Authenticated {
                user_id: user.id,
                names: NameUpdate::fill_empty(
                    user,
                    input.first_name.as_deref(),
                    input.last_name.as_deref(),
                ),
                password: input.password,
            });
        }

        // Someone holding only the token cannot take over an existing account.
        match self.store.find_user_by_email(&invitation.email).await? {
            Some(user) => Ok(AcceptingIdentity::Linked { user_id: user.id }),
            None => Ok(AcceptingIdentity::New {
                first_name: input.first_name.unwrap_or_default(),
                last_name: input.last_name.unwrap_or_default(),
                password: input.password,
            }),
        }
    }

    async fn close(
        &self,
        invitation: &Invitation,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if self
            .store
            .close_invitation(invitation.id, status, now)
            .await?
        {
            Ok(())
        } else {
            Err(InvitationError::NotFoundOrExpiredOrConsumed.into())
        }
    }

    /// What the recipient sees before answering.
    pub async fn preview(&self, token: &str) -> Result<InvitationPreview, AppError> {
        let now = Utc::now();
        let invitation = self
            .store
            .find_open_by_token(token.trim(), now)
            .await?
            .ok_or(InvitationError::NotFoundOrExpiredOrConsumed)?;

        let organization = self.organization(invitation.organization_id).await?;
        let position = self.position(invitation.position_id).await?;
        let inviter_name = self
            .store
            .find_user_by_id(invitation.invited_by)
            .await?
            .map(|user| user.full_name())
            .unwrap_or_default();

        Ok(InvitationPreview {
            email: invitation.email,
            organization_id: organization.id,
            organization_name: organization.name,
            position_title: position.map(|position| position.title),
            inviter_name,
            expires_at: invitation.expires_at,
        })
    }

    /// Invitations sent by `inviter_id`, newest first, with counts per status.
    pub async fn list(
        &self,
        inviter_id: Uuid,
        query: ListInvitationsQuery,
    ) -> Result<InvitationList, AppError> {
        let now = Utc::now();
        let counts = self.store.count_invitations(inviter_id, now).await?;
        let invitations = self
            .store
            .list_invitations(inviter_id, &query, now)
            .await?
            .into_iter()
            .map(|invitation| InvitationView::new(invitation, now))
            .collect();

        Ok(InvitationList {
            counts,
            invitations,
            page: query.page(),
            per_page: query.per_page(),
        })
    }

    /// Persist `expired` on every lapsed pending invitation.
    pub async fn expire_stale(&self) -> Result<u64, AppError> {
        let expired = self.store.expire_lapsed(Utc::now()).await?;
        if expired > 0 {
            log::info!("Marked {} lapsed invitations as expired", expired);
        }
        Ok(expired)
    }

    async fn organization(&self, id: Uuid) -> Result<Organization, AppError> {
        self.store
            .find_organization(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))
    }

    async fn position(&self, id: Option<Uuid>) -> Result<Option<Position>, AppError> {
        match id {
            Some(id) => self
                .store
                .find_position(id)
                .await?
                .map(Some)
                .ok_or_else(|| AppError::NotFound("Position not found".to_string())),
            None => Ok(None),
        }
    }

    async fn email_is_member(&self, email: &str, organization_id: Uuid) -> Result<bool, AppError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            return Ok(false);
        };
        let Some(employee) = self.store.find_employee_by_user(user.id).await? else {
            return Ok(false);
        };

        Ok(self.store.is_member(organization_id, employee.id).await?)
    }

    fn notify(
        &self,
        template: TemplateKey,
        invitation: &Invitation,
        organization: &Organization,
        position: Option<&Position>,
        inviter: &User,
    ) {
        let notification = Notification::for_invitation(
            template,
            &invitation.email,
            &organization.name,
            position.map(|position| position.title.as_str()),
            &inviter.full_name(),
            &self.settings.acceptance_url(&invitation.token),
            invitation.expires_at,
        );

        if let Err(error) = self.notifier.dispatch(notification) {
            log::error!(
                "Failed to queue {} email for invitation {}: {}",
                template.as_str(),
                invitation.id,
                error
            );
        }
    }
}
