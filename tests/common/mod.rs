#![allow(dead_code)]

use std::env;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use bigdecimal::BigDecimal;
use hrm::database::{
    PgStore,
    models::{Scope, User},
    repositories::{IdentityProvider, seed_permissions},
};
use hrm::services::{
    InvitationService, InvitationSettings,
    notifier::{Notification, Notifier, NotifyError},
};
use hrm::Config;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use uuid::Uuid;

/// A freshly created and migrated database on the server named by
/// `TEST_DATABASE_URL`, dropped again by [`TestDb::teardown`].
pub struct TestDb {
    pub pool: PgPool,
    admin: PgPool,
    name: String,
}

impl TestDb {
    pub async fn new() -> Result<Option<Self>> {
        let Ok(url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL is not set, skipping Postgres test");
            return Ok(None);
        };

        let admin = PgPoolOptions::new().max_connections(1).connect(&url).await?;
        let name = format!("hrm_test_{}", Uuid::new_v4().simple());
        sqlx::query(&format!(r#"CREATE DATABASE "{name}""#))
            .execute(&admin)
            .await?;

        let options = PgConnectOptions::from_str(&url)?.database(&name);
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        seed_permissions(&pool).await?;

        Ok(Some(TestDb { pool, admin, name }))
    }

    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }

    pub async fn teardown(self) {
        self.pool.close().await;
        if let Err(error) = sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{}""#, self.name))
            .execute(&self.admin)
            .await
        {
            eprintln!("Could not drop {}: {}", self.name, error);
        }
    }

    pub async fn add_user(&self, email: &str) -> User {
        self.store().create_user(email, "", "").await.unwrap()
    }

    pub async fn add_organization(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO organizations (id, name) VALUES ($1, $2)")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await
            .unwrap();
        id
    }

    pub async fn add_position(&self, title: &str) -> Uuid {
        let department_id = Uuid::new_v4();
        sqlx::query("INSERT INTO departments (id, name) VALUES ($1, $2)")
            .bind(department_id)
            .bind(format!("{title} department"))
            .execute(&self.pool)
            .await
            .unwrap();

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO
                positions (id, title, department_id, salary_range_min, salary_range_max)
            VALUES
                ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(department_id)
        .bind(BigDecimal::from(1000))
        .bind(BigDecimal::from(2000))
        .execute(&self.pool)
        .await
        .unwrap();
        id
    }

    /// Give the user a role in `scope` carrying `codes`.
    pub async fn grant(&self, user_id: Uuid, scope: Scope, codes: &[&str]) -> Uuid {
        let role_id = Uuid::new_v4();
        sqlx::query("INSERT INTO roles (id, name, scope, user_id) VALUES ($1, $2, $3, $4)")
            .bind(role_id)
            .bind(format!("{scope} role"))
            .bind(scope)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .unwrap();

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO
                    role_permissions (role_id, permission_id)
                SELECT
                    $1,
                    id
                FROM
                    permissions
                WHERE
                    code = $2
                "#,
            )
            .bind(role_id)
            .bind(*code)
            .execute(&self.pool)
            .await
            .unwrap();
        }
        role_id
    }

    /// Move the lease into the past without persisting `expired`.
    pub async fn lapse(&self, invitation_id: Uuid) {
        sqlx::query(
            r#"
            UPDATE invitations
            SET
                created_at = NOW() - INTERVAL '30 days',
                expires_at = NOW() - INTERVAL '1 minute'
            WHERE
                id = $1
            "#,
        )
        .bind(invitation_id)
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn count(&self, statement: &str) -> i64 {
        sqlx::query_scalar(statement)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

pub fn invitation_service(db: &TestDb) -> InvitationService<PgStore, RecordingNotifier> {
    InvitationService::new(
        db.store(),
        RecordingNotifier::default(),
        InvitationSettings::from_config(&Config::test_config()),
    )
}
