pub mod employee;
pub mod invitation;
pub mod organization;
pub mod role;
pub mod user;

pub use employee::EmployeeStore;
pub use invitation::InvitationStore;
pub use organization::OrganizationStore;
pub use role::{RoleStore, seed_permissions};
pub use user::IdentityProvider;

/// Everything the invitation lifecycle reads and writes.
pub trait HrStore:
    IdentityProvider + OrganizationStore + EmployeeStore + InvitationStore + RoleStore
{
}

impl<T> HrStore for T where
    T: IdentityProvider + OrganizationStore + EmployeeStore + InvitationStore + RoleStore
{
}
