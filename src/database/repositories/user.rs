use anyhow::Result;
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::Utc;
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::database::{
    PgStore,
    models::{NameUpdate, User},
    utils::sql,
};

/// Account lookup and credential management.
pub trait IdentityProvider {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn create_user(&self, email: &str, first_name: &str, last_name: &str) -> Result<User>;

    /// Hash and store a new password for the user.
    async fn set_password(&self, user_id: Uuid, plaintext: &str) -> Result<()>;

    /// Returns the user when the password matches the stored hash.
    async fn verify_password(&self, email: &str, plaintext: &str) -> Result<Option<User>> {
        let Some(user) = self.find_user_by_email(email).await? else {
            return Ok(None);
        };

        match user.password_hash.as_deref() {
            Some(password_hash) if verify(plaintext, password_hash)? => Ok(Some(user)),
            _ => Ok(None),
        }
    }
}

impl IdentityProvider for PgStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&sql(r#"
            SELECT
                id,
                email,
                first_name,
                last_name,
                password_hash,
                created_at,
                updated_at
            FROM
                users
            WHERE
                id = ?
        "#))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(select_by_email(self.pool(), email).await?)
    }

    async fn create_user(&self, email: &str, first_name: &str, last_name: &str) -> Result<User> {
        let user = User::new(
            email.trim().to_string(),
            first_name.trim().to_string(),
            last_name.trim().to_string(),
        );

        let user = insert_if_absent(self.pool(), &user)
            .await?
            .ok_or_else(|| anyhow::anyhow!("An account for {} already exists", user.email))?;

        log::info!("Created user {} for {}", user.id, user.email);

        Ok(user)
    }

    async fn set_password(&self, user_id: Uuid, plaintext: &str) -> Result<()> {
        let password_hash = hash(plaintext, DEFAULT_COST)?;
        write_password_hash(self.pool(), user_id, &password_hash).await?;

        Ok(())
    }
}

pub async fn select_by_email<'e>(
    executor: impl PgExecutor<'e>,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&sql(r#"
        SELECT
            id,
            email,
            first_name,
            last_name,
            password_hash,
            created_at,
            updated_at
        FROM
            users
        WHERE
            LOWER(email) = LOWER(?)
    "#))
    .bind(email.trim())
    .fetch_optional(executor)
    .await
}

/// Insert `user` unless an account with the same email already exists, in
/// which case `None` is returned.
pub async fn insert_if_absent<'e>(
    executor: impl PgExecutor<'e>,
    user: &User,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&sql(r#"
        INSERT INTO
            users (
                id,
                email,
                first_name,
                last_name,
                password_hash,
                created_at,
                updated_at
            )
        VALUES
            (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT ((LOWER(email))) DO NOTHING
        RETURNING
            id,
            email,
            first_name,
            last_name,
            password_hash,
            created_at,
            updated_at
    "#))
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(user.password_hash.as_deref())
    .bind(user.created_at)
    .bind(user.updated_at)
    .fetch_optional(executor)
    .await
}

pub async fn write_password_hash<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(&sql(r#"
        UPDATE users
        SET
            password_hash = ?,
            updated_at = ?
        WHERE
            id = ?
    "#))
    .bind(password_hash)
    .bind(Utc::now())
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn write_names<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    update: &NameUpdate,
) -> Result<(), sqlx::Error> {
    if update.is_empty() {
        return Ok(());
    }

    sqlx::query(&sql(r#"
        UPDATE users
        SET
            first_name = COALESCE(?, first_name),
            last_name = COALESCE(?, last_name),
            updated_at = ?
        WHERE
            id = ?
    "#))
    .bind(update.first_name.as_deref())
    .bind(update.last_name.as_deref())
    .bind(Utc::now())
    .bind(user_id)
    .execute(executor)
    .await?;

    Ok(())
}
