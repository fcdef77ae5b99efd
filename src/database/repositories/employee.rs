use anyhow::Result;
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::database::{
    PgStore,
    models::{Employee, NewEmployee},
    utils::sql,
};

pub trait EmployeeStore {
    async fn find_employee_by_user(&self, user_id: Uuid) -> Result<Option<Employee>>;

    /// Returns the user's employee profile, creating it from `new` if absent,
    /// and whether it was created.
    async fn find_or_create_employee(&self, new: NewEmployee) -> Result<(Employee, bool)>;
}

impl EmployeeStore for PgStore {
    async fn find_employee_by_user(&self, user_id: Uuid) -> Result<Option<Employee>> {
        Ok(select_by_user(self.pool(), user_id).await?)
    }

    async fn find_or_create_employee(&self, new: NewEmployee) -> Result<(Employee, bool)> {
        let user_id = new.user_id;

        if let Some(employee) = insert_if_absent(self.pool(), &new.into_employee()).await? {
            return Ok((employee, true));
        }

        let existing = self
            .find_employee_by_user(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Employee profile for user {} vanished", user_id))?;

        Ok((existing, false))
    }
}

pub async fn select_by_user<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
) -> Result<Option<Employee>, sqlx::Error> {
    sqlx::query_as::<_, Employee>(&sql(r#"
        SELECT
            id,
            user_id,
            position_id,
            status,
            joining_date,
            created_at,
            updated_at
        FROM
            employees
        WHERE
            user_id = ?
    "#))
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Insert the profile unless the user already has one. employees.user_id is
/// unique, so a concurrent insert for the same user yields `None`.
pub async fn insert_if_absent<'e>(
    executor: impl PgExecutor<'e>,
    candidate: &Employee,
) -> Result<Option<Employee>, sqlx::Error> {
    sqlx::query_as::<_, Employee>(&sql(r#"
        INSERT INTO
            employees (
                id,
                user_id,
                position_id,
                status,
                joining_date,
                created_at,
                updated_at
            )
        VALUES
            (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id) DO NOTHING
        RETURNING
            id,
            user_id,
            position_id,
            status,
            joining_date,
            created_at,
            updated_at
    "#))
    .bind(candidate.id)
    .bind(candidate.user_id)
    .bind(candidate.position_id)
    .bind(candidate.status)
    .bind(candidate.joining_date)
    .bind(candidate.created_at)
    .bind(candidate.updated_at)
    .fetch_optional(executor)
    .await
}
