use anyhow::Result;
use uuid::Uuid;

use crate::database::{models::RoleGrant, repositories::RoleStore};
use crate::error::AppError;

pub const PERMISSION_DENIED: &str = "You don't have permission to perform this action.";

/// True when any grant, in any scope, carries one of the required codes.
///
/// Scopes are independent and OR-combined: there is no hierarchy and no
/// deny rule. No grants, or no required codes, means no access.
pub fn authorize(grants: &[RoleGrant], required: &[&str]) -> bool {
    grants.iter().any(|grant| grant.grants_any(required))
}

pub async fn has_permission<S: RoleStore>(
    store: &S,
    user_id: Uuid,
    required: &[&str],
) -> Result<bool> {
    if required.is_empty() {
        return Ok(false);
    }

    let grants = store.grants_for_user(user_id).await?;
    Ok(authorize(&grants, required))
}

/// Gate for handlers. The denial never says which scope was consulted.
pub async fn require_permission<S: RoleStore>(
    store: &S,
    user_id: Uuid,
    required: &[&str],
) -> Result<(), AppError> {
    if has_permission(store, user_id, required).await? {
        Ok(())
    } else {
        log::warn!("User {} denied, requires one of {:?}", user_id, required);
        Err(AppError::Forbidden(PERMISSION_DENIED.to_string()))
    }
}
