pub mod auth;
pub mod invitations;
pub mod shared;
