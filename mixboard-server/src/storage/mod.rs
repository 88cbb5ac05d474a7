pub mod models;
pub mod schema;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::DatabaseErrorKind;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use mixboard_shared::domain::{DomainError, Mix, MixTemplate};
use models::{MixRow, NewUser, TemplateRow, User};
use tracing::trace;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or state precondition failed.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// A committed mix update: the record before and after the change.
#[derive(Debug, Clone)]
pub struct MixChange {
    pub before: Mix,
    pub after: Mix,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    pub async fn create_user(
        &self,
        id: &str,
        email: &str,
        display_name: Option<&str>,
        password_hash: &str,
        created_at_ms: i64,
    ) -> Result<User, StorageError> {
        use schema::users::dsl as u;
        let pool = self.pool.clone();
        let id = id.to_string();
        let email = email.to_string();
        let display_name = display_name.map(str::to_string);
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || -> Result<User, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewUser {
                id: &id,
                email: &email,
                display_name: display_name.as_deref(),
                password_hash: &password_hash,
                created_at_ms,
            };
            match diesel::insert_into(u::users).values(&row).execute(&mut conn) {
                Ok(_) => {}
                Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    return Err(StorageError::Conflict(format!(
                        "email already registered: {email}"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            Ok(u::users
                .find(&id)
                .select(User::as_select())
                .first(&mut conn)?)
        })
        .await?
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        use schema::users::dsl as u;
        let pool = self.pool.clone();
        let email = email.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<User>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(u::users
                .filter(u::email.eq(&email))
                .select(User::as_select())
                .first(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        use schema::users::dsl as u;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<User>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(u::users
                .find(&id)
                .select(User::as_select())
                .first(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn insert_mix(&self, mix: &Mix) -> Result<(), StorageError> {
        use schema::mixes::dsl as m;
        let pool = self.pool.clone();
        let row = MixRow::from_domain(mix)?;
        trace!(mix_id = %row.id, "insert_mix");
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            diesel::insert_into(m::mixes).values(&row).execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn get_mix(&self, id: &str) -> Result<Option<Mix>, StorageError> {
        use schema::mixes::dsl as m;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Mix>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            m::mixes
                .find(&id)
                .select(MixRow::as_select())
                .first(&mut conn)
                .optional()?
                .map(MixRow::into_domain)
                .transpose()
        })
        .await?
    }

    /// Active (not deleted) mixes, oldest first, optionally for one owner.
    pub async fn list_active_mixes(&self, owner_id: Option<&str>) -> Result<Vec<Mix>, StorageError> {
        use schema::mixes::dsl as m;
        let pool = self.pool.clone();
        let owner_id = owner_id.map(str::to_string);
        tokio::task::spawn_blocking(move || -> Result<Vec<Mix>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let mut query = m::mixes
                .filter(m::is_deleted.eq(false))
                .select(MixRow::as_select())
                .order(m::created_at_ms.asc())
                .into_boxed();
            if let Some(owner) = owner_id {
                query = query.filter(m::owner_id.eq(owner));
            }
            query
                .load::<MixRow>(&mut conn)?
                .into_iter()
                .map(MixRow::into_domain)
                .collect()
        })
        .await?
    }

    /// Applies `change` to the stored mix inside one immediate transaction, so
    /// concurrent updates of the same mix are serialized.
    pub async fn update_mix<F>(&self, id: &str, change: F) -> Result<MixChange, StorageError>
    where
        F: FnOnce(&mut Mix) -> Result<(), StorageError> + Send + 'static,
    {
        use schema::mixes::dsl as m;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<MixChange, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let before = m::mixes
                    .find(&id)
                    .select(MixRow::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("mix not found: {id}")))?
                    .into_domain()?;
                let mut after = before.clone();
                change(&mut after)?;
                let row = MixRow::from_domain(&after)?;
                diesel::update(m::mixes.find(&id))
                    .set((
                        m::name.eq(&row.name),
                        m::stages_json.eq(&row.stages_json),
                        m::current_stage_index.eq(row.current_stage_index),
                        m::current_stage_started_at_ms.eq(row.current_stage_started_at_ms),
                        m::category.eq(&row.category),
                        m::color.eq(&row.color),
                        m::description.eq(&row.description),
                        m::batch_number.eq(&row.batch_number),
                        m::is_deleted.eq(row.is_deleted),
                    ))
                    .execute(conn)?;
                Ok(MixChange { before, after })
            })
        })
        .await?
    }

    pub async fn insert_template(&self, template: &MixTemplate) -> Result<(), StorageError> {
        use schema::templates::dsl as t;
        let pool = self.pool.clone();
        let row = TemplateRow::from_domain(template)?;
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            diesel::insert_into(t::templates)
                .values(&row)
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<MixTemplate>, StorageError> {
        use schema::templates::dsl as t;
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<MixTemplate>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            t::templates
                .find(&id)
                .select(TemplateRow::as_select())
                .first(&mut conn)
                .optional()?
                .map(TemplateRow::into_domain)
                .transpose()
        })
        .await?
    }

    pub async fn list_templates(&self, owner_id: &str) -> Result<Vec<MixTemplate>, StorageError> {
        use schema::templates::dsl as t;
        let pool = self.pool.clone();
        let owner_id = owner_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<MixTemplate>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            t::templates
                .filter(t::owner_id.eq(&owner_id))
                .select(TemplateRow::as_select())
                .order(t::name.asc())
                .load::<TemplateRow>(&mut conn)?
                .into_iter()
                .map(TemplateRow::into_domain)
                .collect()
        })
        .await?
    }

    /// Deletes a template owned by `owner_id`. Returns false if none matched.
    pub async fn delete_template(&self, id: &str, owner_id: &str) -> Result<bool, StorageError> {
        use schema::templates::dsl as t;
        let pool = self.pool.clone();
        let id = id.to_string();
        let owner_id = owner_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(
                t::templates
                    .filter(t::id.eq(&id))
                    .filter(t::owner_id.eq(&owner_id)),
            )
            .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixboard_shared::domain::{MixId, MixMetadata, Owner, Stage};

    async fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let store = Store::connect_sqlite(path.to_str().unwrap()).await.unwrap();
        store
            .create_user("u1", "ann@example.com", Some("Ann"), "hash", 1)
            .await
            .unwrap();
        (store, dir)
    }

    fn mix(id: &str, created: i64) -> Mix {
        Mix {
            id: MixId::from(id),
            name: format!("Mix {id}"),
            stages: vec![Stage::new("Powder 1", 60_000), Stage::new("Powder 2", 60_000)],
            current_stage_index: 0,
            current_stage_started_at_ms: created,
            owner: Owner {
                id: "u1".into(),
                email: "ann@example.com".into(),
                display_name: Some("Ann".into()),
            },
            created_at_ms: created,
            is_deleted: false,
            metadata: MixMetadata {
                category: Some("Powder".into()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let (store, _dir) = store().await;
        let err = store
            .create_user("u2", "ann@example.com", None, "hash", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)), "{err:?}");
        assert!(store.find_user_by_email("ann@example.com").await.unwrap().is_some());
        assert!(store.get_user("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mix_roundtrip_and_active_listing() {
        let (store, _dir) = store().await;
        store.insert_mix(&mix("b", 20)).await.unwrap();
        store.insert_mix(&mix("a", 10)).await.unwrap();
        assert_eq!(store.get_mix("a").await.unwrap(), Some(mix("a", 10)));

        store
            .update_mix("a", |m| {
                m.is_deleted = true;
                Ok(())
            })
            .await
            .unwrap();
        let active = store.list_active_mixes(None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, MixId::from("b"));
        assert_eq!(store.list_active_mixes(Some("nobody")).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn update_reports_before_and_after_and_rolls_back_on_error() {
        let (store, _dir) = store().await;
        store.insert_mix(&mix("a", 10)).await.unwrap();
        let change = store
            .update_mix("a", |m| Ok(m.advance(0, 99)?))
            .await
            .unwrap();
        assert_eq!(change.before.current_stage_index, 0);
        assert_eq!(change.after.current_stage_index, 1);

        let err = store
            .update_mix("a", |m| Ok(m.advance(1, 100)?))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Domain(DomainError::FinalStage)));
        let stored = store.get_mix("a").await.unwrap().unwrap();
        assert_eq!(stored.current_stage_started_at_ms, 99);

        let err = store.update_mix("zzz", |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn templates_are_scoped_to_owner() {
        let (store, _dir) = store().await;
        let t = MixTemplate {
            id: "t1".into(),
            owner_id: "u1".into(),
            name: "Standard".into(),
            stages: vec![Stage::new("Blend", 300_000)],
            metadata: MixMetadata::default(),
            created_at_ms: 5,
        };
        store.insert_template(&t).await.unwrap();
        assert_eq!(store.list_templates("u1").await.unwrap(), vec![t.clone()]);
        assert!(!store.delete_template("t1", "someone-else").await.unwrap());
        assert!(store.delete_template("t1", "u1").await.unwrap());
        assert!(store.get_template("t1").await.unwrap().is_none());
    }
}
