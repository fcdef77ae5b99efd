pub mod auth;
pub mod invitations;
pub mod notifier;
pub mod permissions;

pub use auth::{AuthService, Claims, OptionalClaims};
pub use invitations::{InvitationService, InvitationSettings};
pub use notifier::{LogMailer, MailQueue, Notifier};
