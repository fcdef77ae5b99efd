pub mod auth;
pub mod employee;
pub mod invitation;
pub(crate) mod macros;
pub mod organization;
pub mod role;
pub mod user;

// Re-export all models for easy importing
pub use auth::*;
pub use employee::*;
pub use invitation::*;
pub use organization::*;
pub use role::*;
pub use user::*;
