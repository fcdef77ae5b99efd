use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use bcrypt::hash;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::database::{
    StoreError,
    models::{
        Acceptance, AcceptedInvitation, AcceptingIdentity, Employee, Invitation,
        InvitationCounts, InvitationStatus, ListInvitationsQuery, NewEmployee,
        NewInvitation, Organization, Position, RoleGrant, Scope, User,
    },
    repositories::{EmployeeStore, IdentityProvider, InvitationStore, OrganizationStore, RoleStore},
};
use crate::services::{
    invitations::{InvitationService, InvitationSettings},
    notifier::{Notification, Notifier, NotifyError},
};

#[derive(Clone, Default)]
struct State {
    users: Vec<User>,
    organizations: Vec<Organization>,
    positions: Vec<Position>,
    employees: Vec<Employee>,
    memberships: HashSet<(Uuid, Uuid)>,
    invitations: Vec<Invitation>,
    roles: Vec<RoleGrant>,
    token_collisions: usize,
    fail_next_acceptance: bool,
}

impl State {
    fn pending_conflict(&self, invitation: &Invitation) -> bool {
        self.invitations.iter().any(|other| {
            other.id != invitation.id
                && other.status == InvitationStatus::Pending
                && other.email == invitation.email
                && other.organization_id == invitation.organization_id
        })
    }

    /// Same steps as the Postgres acceptance, applied to this state.
    fn accept(
        &mut self,
        acceptance: &Acceptance,
        password_hash: Option<String>,
    ) -> Result<AcceptedInvitation, StoreError> {
        let invitation = self
            .invitations
            .iter()
            .find(|invitation| {
                invitation.id == acceptance.invitation_id
                    && invitation.is_open(acceptance.accepted_at)
            })
            .cloned()
            .ok_or(StoreError::InvitationClosed)?;

        let (user_id, user_created) = match &acceptance.identity {
            AcceptingIdentity::Authenticated { user_id, names, .. } => {
                let user = self
                    .users
                    .iter_mut()
                    .find(|user| user.id == *user_id)
                    .ok_or_else(|| anyhow!("no user {user_id}"))?;
                if let Some(first_name) = &names.first_name {
                    user.first_name = first_name.clone();
                }
                if let Some(last_name) = &names.last_name {
                    user.last_name = last_name.clone();
                }
                if password_hash.is_some() {
                    user.password_hash = password_hash;
                }
                (*user_id, false)
            }
            AcceptingIdentity::Linked { user_id } => (*user_id, false),
            AcceptingIdentity::New {
                first_name,
                last_name,
                ..
            } => match self.users.iter().find(|user| user.has_email(&invitation.email)) {
                Some(existing) => (existing.id, false),
                None => {
                    let mut user = User::new(
                        invitation.email.clone(),
                        first_name.trim().to_string(),
                        last_name.trim().to_string(),
                    );
                    user.password_hash = password_hash;
                    let id = user.id;
                    self.users.push(user);
                    (id, true)
                }
            },
        };

        let (employee_id, employee_created) =
            match self.employees.iter().find(|employee| employee.user_id == user_id) {
                Some(existing) => (existing.id, false),
                None => {
                    let employee =
                        NewEmployee::joining_today(user_id, invitation.position_id).into_employee();
                    let id = employee.id;
                    self.employees.push(employee);
                    (id, true)
                }
            };

        if !self
            .memberships
            .insert((invitation.organization_id, employee_id))
        {
            return Err(StoreError::AlreadyMember);
        }

        if let Some(row) = self
            .invitations
            .iter_mut()
            .find(|row| row.id == invitation.id)
        {
            row.status = InvitationStatus::Accepted;
            row.is_accepted = true;
        }

        Ok(AcceptedInvitation {
            invitation_id: invitation.id,
            user_id,
            employee_id,
            user_created,
            employee_created,
        })
    }
}

/// In-memory store with the same uniqueness rules as the Postgres schema.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub async fn add_user(&self, email: &str, first_name: &str, last_name: &str) -> User {
        self.create_user(email, first_name, last_name).await.unwrap()
    }

    pub fn add_organization(&self, name: &str) -> Organization {
        let now = Utc::now();
        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            admin_id: None,
            created_at: now,
            updated_at: now,
        };
        self.state().organizations.push(organization.clone());
        organization
    }

    pub fn add_position(&self, title: &str) -> Position {
        let now = Utc::now();
        let position = Position {
            id: Uuid::new_v4(),
            title: title.to_string(),
            department_id: Uuid::new_v4(),
            description: String::new(),
            salary_range_min: BigDecimal::from(0),
            salary_range_max: BigDecimal::from(0),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.state().positions.push(position.clone());
        position
    }

    pub fn grant_role(&self, user_id: Uuid, scope: Scope, codes: &[&str]) {
        self.state().roles.push(RoleGrant {
            role_id: Uuid::new_v4(),
            role_name: format!("{scope} manager"),
            scope,
            user_id,
            permission_codes: codes.iter().map(|code| code.to_string()).collect(),
        });
    }

    /// Give the user an employee profile that belongs to the organization.
    pub async fn enroll(&self, organization_id: Uuid, user_id: Uuid) -> Employee {
        let (employee, _) = self
            .find_or_create_employee(NewEmployee::joining_today(user_id, None))
            .await
            .unwrap();
        self.add_member(organization_id, employee.id).await.unwrap();
        employee
    }

    /// Move the lease of an invitation into the past without persisting `expired`.
    pub fn lapse(&self, invitation_id: Uuid) {
        let mut state = self.state();
        if let Some(invitation) = state
            .invitations
            .iter_mut()
            .find(|invitation| invitation.id == invitation_id)
        {
            invitation.created_at -= Duration::days(30);
            invitation.expires_at = Utc::now() - Duration::minutes(1);
        }
    }

    /// Make the next acceptance fail after all of its writes were staged, as
    /// if the commit had been lost.
    pub fn fail_next_acceptance(&self) {
        self.state().fail_next_acceptance = true;
    }

    /// Make the next `count` inserts fail as if the token were already taken.
    pub fn inject_token_collisions(&self, count: usize) {
        self.state().token_collisions = count;
    }

    pub fn invitation(&self, id: Uuid) -> Option<Invitation> {
        self.state()
            .invitations
            .iter()
            .find(|invitation| invitation.id == id)
            .cloned()
    }

    pub fn invitations(&self) -> Vec<Invitation> {
        self.state().invitations.clone()
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.state()
            .users
            .iter()
            .find(|user| user.has_email(email))
            .cloned()
    }

    pub fn user_count(&self) -> usize {
        self.state().users.len()
    }

    pub fn employee_count(&self) -> usize {
        self.state().employees.len()
    }

    pub fn member_count(&self, organization_id: Uuid) -> usize {
        self.state()
            .memberships
            .iter()
            .filter(|(organization, _)| *organization == organization_id)
            .count()
    }
}

impl IdentityProvider for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state().users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.user_by_email(email))
    }

    async fn create_user(&self, email: &str, first_name: &str, last_name: &str) -> Result<User> {
        let mut state = self.state();
        if state.users.iter().any(|user| user.has_email(email)) {
            return Err(anyhow!("duplicate key value violates unique constraint users_email_key"));
        }

        let user = User::new(
            email.trim().to_string(),
            first_name.trim().to_string(),
            last_name.trim().to_string(),
        );
        state.users.push(user.clone());
        Ok(user)
    }

    async fn set_password(&self, user_id: Uuid, plaintext: &str) -> Result<()> {
        let password_hash = hash(plaintext, 4)?;
        let mut state = self.state();
        let user = state
            .users
            .iter_mut()
            .find(|user| user.id == user_id)
            .ok_or_else(|| anyhow!("no user {user_id}"))?;
        user.password_hash = Some(password_hash);
        user.updated_at = Utc::now();
        Ok(())
    }
}

impl OrganizationStore for MemoryStore {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        Ok(self
            .state()
            .organizations
            .iter()
            .find(|organization| organization.id == id)
            .cloned())
    }

    async fn find_position(&self, id: Uuid) -> Result<Option<Position>> {
        Ok(self
            .state()
            .positions
            .iter()
            .find(|position| position.id == id)
            .cloned())
    }

    async fn is_member(&self, organization_id: Uuid, employee_id: Uuid) -> Result<bool> {
        Ok(self
            .state()
            .memberships
            .contains(&(organization_id, employee_id)))
    }

    async fn add_member(&self, organization_id: Uuid, employee_id: Uuid) -> Result<()> {
        self.state()
            .memberships
            .insert((organization_id, employee_id));
        Ok(())
    }
}

impl EmployeeStore for MemoryStore {
    async fn find_employee_by_user(&self, user_id: Uuid) -> Result<Option<Employee>> {
        Ok(self
            .state()
            .employees
            .iter()
            .find(|employee| employee.user_id == user_id)
            .cloned())
    }

    async fn find_or_create_employee(&self, new: NewEmployee) -> Result<(Employee, bool)> {
        let mut state = self.state();
        if let Some(existing) = state
            .employees
            .iter()
            .find(|employee| employee.user_id == new.user_id)
        {
            return Ok((existing.clone(), false));
        }

        let employee = new.into_employee();
        state.employees.push(employee.clone());
        Ok((employee, true))
    }
}

impl InvitationStore for MemoryStore {
    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>> {
        Ok(self.invitation(id))
    }

    async fn find_open_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>> {
        Ok(self
            .state()
            .invitations
            .iter()
            .find(|invitation| invitation.token == token && invitation.is_open(now))
            .cloned())
    }

    async fn has_open_pending(
        &self,
        email: &str,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.state().invitations.iter().any(|invitation| {
            invitation.email == email
                && invitation.organization_id == organization_id
                && invitation.status == InvitationStatus::Pending
                && invitation.expires_at > now
        }))
    }

    async fn latest_invitation(
        &self,
        email: &str,
        organization_id: Uuid,
    ) -> Result<Option<Invitation>> {
        Ok(self
            .state()
            .invitations
            .iter()
            .filter(|invitation| {
                invitation.email == email && invitation.organization_id == organization_id
            })
            .max_by_key(|invitation| invitation.created_at)
            .cloned())
    }

    async fn expire_lapsed_for(
        &self,
        email: &str,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut expired = 0;
        for invitation in self.state().invitations.iter_mut() {
            if invitation.email == email
                && invitation.organization_id == organization_id
                && invitation.status == InvitationStatus::Pending
                && invitation.expires_at <= now
            {
                invitation.status = InvitationStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn insert_invitation(&self, new: NewInvitation) -> Result<Invitation, StoreError> {
        let mut state = self.state();
        if state.token_collisions > 0 {
            state.token_collisions -= 1;
            return Err(StoreError::DuplicateToken);
        }

        let invitation = new.into_invitation();
        if state
            .invitations
            .iter()
            .any(|other| other.token == invitation.token)
        {
            return Err(StoreError::DuplicateToken);
        }
        if state.pending_conflict(&invitation) {
            return Err(StoreError::DuplicatePending);
        }

        state.invitations.push(invitation.clone());
        Ok(invitation)
    }

    async fn renew_invitation(
        &self,
        id: Uuid,
        invited_by: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        let mut state = self.state();
        let Some(index) = state.invitations.iter().position(|invitation| {
            invitation.id == id && invitation.invited_by == invited_by && invitation.can_resend()
        }) else {
            return Ok(None);
        };

        let mut renewed = state.invitations[index].clone();
        renewed.status = InvitationStatus::Pending;
        renewed.is_accepted = false;
        renewed.expires_at = renewed.renewed_lease(now, ttl);
        renewed.last_sent_at = now;

        if state.pending_conflict(&renewed) {
            return Err(StoreError::DuplicatePending);
        }

        state.invitations[index] = renewed.clone();
        Ok(Some(renewed))
    }

    async fn accept_invitation(
        &self,
        acceptance: Acceptance,
    ) -> Result<AcceptedInvitation, StoreError> {
        let password_hash = acceptance
            .identity
            .password()
            .map(|password| hash(password, 4))
            .transpose()
            .map_err(anyhow::Error::from)?;

        let mut state = self.state();
        let mut draft = state.clone();
        let accepted = draft.accept(&acceptance, password_hash)?;

        if state.fail_next_acceptance {
            state.fail_next_acceptance = false;
            return Err(StoreError::Other(anyhow!("connection reset before commit")));
        }

        *state = draft;
        Ok(accepted)
    }

    async fn close_invitation(
        &self,
        id: Uuid,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state();
        match state
            .invitations
            .iter_mut()
            .find(|invitation| invitation.id == id && invitation.is_open(now))
        {
            Some(invitation) => {
                invitation.status = status;
                invitation.is_accepted = status == InvitationStatus::Accepted;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut expired = 0;
        for invitation in self.state().invitations.iter_mut() {
            if invitation.status == InvitationStatus::Pending && invitation.expires_at <= now {
                invitation.status = InvitationStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_invitations(
        &self,
        invited_by: Uuid,
        query: &ListInvitationsQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>> {
        let mut matching: Vec<Invitation> = self
            .state()
            .invitations
            .iter()
            .filter(|invitation| invitation.invited_by == invited_by)
            .filter(|invitation| {
                query
                    .status
                    .is_none_or(|status| invitation.effective_status(now) == status)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page() as usize)
            .collect())
    }

    async fn count_invitations(
        &self,
        invited_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<InvitationCounts> {
        let mut counts = InvitationCounts::default();
        for invitation in self
            .state()
            .invitations
            .iter()
            .filter(|invitation| invitation.invited_by == invited_by)
        {
            counts.record(invitation.effective_status(now));
        }
        Ok(counts)
    }
}

impl RoleStore for MemoryStore {
    async fn grants_for_user(&self, user_id: Uuid) -> Result<Vec<RoleGrant>> {
        Ok(self
            .state()
            .roles
            .iter()
            .filter(|grant| grant.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Keeps every dispatched notification for inspection.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Rejects every notification, like a saturated queue.
#[derive(Clone, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn dispatch(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::QueueFull)
    }
}

pub fn test_settings() -> InvitationSettings {
    InvitationSettings::from_config(&Config::test_config())
}

pub fn invitation_service(
    store: &MemoryStore,
    notifier: &RecordingNotifier,
) -> InvitationService<MemoryStore, RecordingNotifier> {
    InvitationService::new(store.clone(), notifier.clone(), test_settings())
}
