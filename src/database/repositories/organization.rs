use anyhow::Result;
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::database::{
    PgStore,
    models::{Organization, Position},
    utils::sql,
};

/// Read access to organizations and positions, plus the membership relation.
pub trait OrganizationStore {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>>;

    async fn find_position(&self, id: Uuid) -> Result<Option<Position>>;

    async fn is_member(&self, organization_id: Uuid, employee_id: Uuid) -> Result<bool>;

    /// Idempotent: adding an existing member is a no-op.
    async fn add_member(&self, organization_id: Uuid, employee_id: Uuid) -> Result<()>;
}

impl OrganizationStore for PgStore {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        let organization = sqlx::query_as::<_, Organization>(&sql(r#"
            SELECT
                id,
                name,
                description,
                admin_id,
                created_at,
                updated_at
            FROM
                organizations
            WHERE
                id = ?
        "#))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(organization)
    }

    async fn find_position(&self, id: Uuid) -> Result<Option<Position>> {
        let position = sqlx::query_as::<_, Position>(&sql(r#"
            SELECT
                id,
                title,
                department_id,
                description,
                salary_range_min,
                salary_range_max,
                is_active,
                created_at,
                updated_at
            FROM
                positions
            WHERE
                id = ?
        "#))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(position)
    }

    async fn is_member(&self, organization_id: Uuid, employee_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&sql(r#"
            SELECT EXISTS (
                SELECT
                    1
                FROM
                    organization_employees
                WHERE
                    organization_id = ?
                    AND employee_id = ?
            )
        "#))
        .bind(organization_id)
        .bind(employee_id)
        .fetch_one(self.pool())
        .await?;

        Ok(exists)
    }

    async fn add_member(&self, organization_id: Uuid, employee_id: Uuid) -> Result<()> {
        insert_member(self.pool(), organization_id, employee_id).await?;

        Ok(())
    }
}

/// Returns false when the employee already belonged to the organization.
pub async fn insert_member<'e>(
    executor: impl PgExecutor<'e>,
    organization_id: Uuid,
    employee_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(&sql(r#"
        INSERT INTO
            organization_employees (organization_id, employee_id)
        VALUES
            (?, ?)
        ON CONFLICT (organization_id, employee_id) DO NOTHING
    "#))
    .bind(organization_id)
    .bind(employee_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}
