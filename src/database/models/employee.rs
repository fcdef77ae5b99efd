use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::macros::string_enum;

string_enum! {
    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum EmployeeStatus {
        Pending => "PENDING",
        Active => "ACTIVE",
        Rejected => "REJECTED",
        Incomplete => "INCOMPLETE",
    }
}

impl Default for EmployeeStatus {
    fn default() -> Self {
        EmployeeStatus::Pending
    }
}

/// HR profile of a user. One per user, shared across organizations.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: Uuid,
    pub user_id: Uuid,
    pub position_id: Option<Uuid>,
    pub status: EmployeeStatus,
    pub joining_date: NaiveDate, // DATE
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub user_id: Uuid,
    pub position_id: Option<Uuid>,
    pub status: EmployeeStatus,
    pub joining_date: NaiveDate,
}

impl NewEmployee {
    /// Profile for someone joining through an accepted invitation.
    pub fn joining_today(user_id: Uuid, position_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            position_id,
            status: EmployeeStatus::Active,
            joining_date: Utc::now().date_naive(),
        }
    }

    pub fn into_employee(self) -> Employee {
        let now = Utc::now();
        Employee {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            position_id: self.position_id,
            status: self.status,
            joining_date: self.joining_date,
            created_at: now,
            updated_at: now,
        }
    }
}
