use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{
    PgStore,
    models::{RoleGrant, default_permissions},
    utils::sql,
};

pub trait RoleStore {
    /// Every role the user holds, in all scopes, with its granted codes.
    async fn grants_for_user(&self, user_id: Uuid) -> Result<Vec<RoleGrant>>;
}

impl RoleStore for PgStore {
    async fn grants_for_user(&self, user_id: Uuid) -> Result<Vec<RoleGrant>> {
        let grants = sqlx::query_as::<_, RoleGrant>(&sql(r#"
            SELECT
                r.id AS role_id,
                r.name AS role_name,
                r.scope,
                r.user_id,
                COALESCE(
                    ARRAY_AGG(p.code) FILTER (WHERE p.code IS NOT NULL),
                    ARRAY[]::TEXT[]
                ) AS permission_codes
            FROM
                roles r
                LEFT JOIN role_permissions rp ON rp.role_id = r.id
                LEFT JOIN permissions p ON p.id = rp.permission_id
            WHERE
                r.user_id = ?
            GROUP BY
                r.id,
                r.name,
                r.scope,
                r.user_id
        "#))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(grants)
    }
}

/// Insert the known permission codes; existing codes are left untouched.
pub async fn seed_permissions(pool: &PgPool) -> Result<u64> {
    let mut inserted = 0;

    for (code, name) in default_permissions() {
        let result = sqlx::query(&sql(r#"
            INSERT INTO
                permissions (id, code, name)
            VALUES
                (?, ?, ?)
            ON CONFLICT (code) DO NOTHING
        "#))
        .bind(Uuid::new_v4())
        .bind(&code)
        .bind(&name)
        .execute(pool)
        .await?;

        inserted += result.rows_affected();
    }

    Ok(inserted)
}
