use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::macros::string_enum;

string_enum! {
    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
    #[serde(rename_all = "lowercase")]
    pub enum Scope {
        Department => "department",
        Position => "position",
        Employee => "employee",
        Organization => "organization",
    }
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::Department,
        Scope::Position,
        Scope::Employee,
        Scope::Organization,
    ];
}

/// A role held by one user, with the permission codes it grants.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    pub role_id: Uuid,
    pub role_name: String,
    pub scope: Scope,
    pub user_id: Uuid,
    pub permission_codes: Vec<String>,
}

impl RoleGrant {
    pub fn grants_any(&self, required: &[&str]) -> bool {
        self.permission_codes
            .iter()
            .any(|code| required.contains(&code.as_str()))
    }
}

/// Capability codes checked by the handlers.
pub mod codes {
    pub const VIEW_INVITATION: &str = "view_invitation";
    pub const ADD_INVITATION: &str = "add_invitation";
}

const ACTIONS: [(&str, &str); 4] = [
    ("view", "Can view"),
    ("add", "Can add"),
    ("change", "Can change"),
    ("delete", "Can delete"),
];

const SUBJECTS: [&str; 5] = [
    "department",
    "position",
    "employee",
    "organization",
    "invitation",
];

/// Every (code, name) pair the service knows about, e.g. `("view_department", "Can view department")`.
pub fn default_permissions() -> Vec<(String, String)> {
    SUBJECTS
        .iter()
        .flat_map(|subject| {
            ACTIONS.iter().map(move |(action, label)| {
                (format!("{action}_{subject}"), format!("{label} {subject}"))
            })
        })
        .collect()
}
