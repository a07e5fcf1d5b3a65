use crate::{
    domain::AssociationRepository,
    errors::PersistenceError,
    models::{AssociationRecord, ImageRecord, NewAssociation, NewImage, ParentKind, ParentRef},
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{error::ErrorKind, FromRow, PgPool};
use tracing::{self, info};

#[derive(Debug, Clone)]
pub struct PgAssociationRepository {
    pool: PgPool,
}

impl PgAssociationRepository {
    pub fn new(pool: PgPool) -> Self {
        info!("Initializing PgAssociationRepository");
        Self { pool }
    }
}

/// An `images` row joined with the parent column of its link row.
#[derive(Debug, FromRow)]
struct AssociationRow {
    pkimage: i64,
    identifier: String,
    url: String,
    caption: Option<String>,
    fk_user_image: i64,
    created_on: DateTime<Utc>,
    fk_parent: i64,
}

impl AssociationRow {
    fn into_record(self, kind: ParentKind) -> AssociationRecord {
        AssociationRecord {
            id: self.pkimage,
            object_key: self.identifier,
            object_location: self.url,
            caption: self.caption,
            parent: ParentRef { kind, id: self.fk_parent },
            uploading_user_id: self.fk_user_image,
            created_at: self.created_on,
        }
    }
}

#[derive(Debug, FromRow)]
struct ImageRow {
    pkimage: i64,
    identifier: String,
    url: String,
    caption: Option<String>,
    fk_user_image: i64,
    created_on: DateTime<Utc>,
}

impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        ImageRecord {
            id: row.pkimage,
            object_key: row.identifier,
            object_location: row.url,
            caption: row.caption,
            uploading_user_id: row.fk_user_image,
            created_at: row.created_on,
        }
    }
}

#[derive(Debug, FromRow)]
struct DeletedRow {
    #[sqlx(flatten)]
    row: AssociationRow,
    kind: String,
}

#[async_trait]
impl AssociationRepository for PgAssociationRepository {
    /// Inserts the image row and its link row in one statement, so a missing
    /// parent or user leaves neither behind.
    async fn associate(&self, new: NewAssociation) -> Result<AssociationRecord, PersistenceError> {
        let kind = new.parent.kind;
        let sql = format!(
            r#"
            WITH image AS (
                INSERT INTO images (identifier, url, caption, fk_user_image)
                VALUES ($1, $2, $3, $4)
                RETURNING pkimage, identifier, url, caption, fk_user_image, created_on
            ), link AS (
                INSERT INTO {table} ({column}, fk_image)
                SELECT $5, pkimage FROM image
                RETURNING {column} AS fk_parent
            )
            SELECT image.pkimage, image.identifier, image.url, image.caption,
                   image.fk_user_image, image.created_on, link.fk_parent
            FROM image, link
            "#,
            table = kind.link_table(),
            column = kind.link_column(),
        );

        let row = sqlx::query_as::<_, AssociationRow>(&sql)
            .bind(&new.object_key)
            .bind(&new.object_location)
            .bind(&new.caption)
            .bind(new.uploading_user_id)
            .bind(new.parent.id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, &new.parent.to_string(), new.parent.kind.as_str()))?;

        let record = row.into_record(kind);
        tracing::debug!(record_id = record.id, parent = %new.parent, s3_key = %record.object_key, "Postgres: Association created");
        Ok(record)
    }

    async fn create_image(&self, new: NewImage) -> Result<ImageRecord, PersistenceError> {
        let target = format!("user#{}", new.uploading_user_id);
        let row = sqlx::query_as::<_, ImageRow>(
            r#"
            INSERT INTO images (identifier, url, caption, fk_user_image)
            VALUES ($1, $2, $3, $4)
            RETURNING pkimage, identifier, url, caption, fk_user_image, created_on
            "#,
        )
        .bind(&new.object_key)
        .bind(&new.object_location)
        .bind(&new.caption)
        .bind(new.uploading_user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &target, "user"))?;

        let record = ImageRecord::from(row);
        tracing::debug!(record_id = record.id, user_id = new.uploading_user_id, s3_key = %record.object_key, "Postgres: Unlinked image created");
        Ok(record)
    }

    async fn delete(&self, id: i64) -> Result<AssociationRecord, PersistenceError> {
        tracing::debug!(record_id = id, "Postgres: Deleting association");

        let deleted = sqlx::query_as::<_, DeletedRow>(
            r#"
            WITH link AS (
                SELECT 'adventure'::text AS kind, fk_adventure AS fk_parent FROM adventure_images WHERE fk_image = $1
                UNION ALL
                SELECT 'review'::text, fk_review FROM review_images WHERE fk_image = $1
                UNION ALL
                SELECT 'experience'::text, fk_experience FROM experience_images WHERE fk_image = $1
            ), removed AS (
                DELETE FROM images
                WHERE pkimage = $1 AND EXISTS (SELECT 1 FROM link)
                RETURNING pkimage, identifier, url, caption, fk_user_image, created_on
            )
            SELECT removed.pkimage, removed.identifier, removed.url, removed.caption,
                   removed.fk_user_image, removed.created_on, link.fk_parent, link.kind
            FROM removed, link
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context(format!("Postgres: Failed to delete association (id: {})", id))
        .map_err(PersistenceError::BackendError)?
        .ok_or(PersistenceError::NotFound(id))?;

        let kind = deleted
            .kind
            .parse::<ParentKind>()
            .map_err(|e| PersistenceError::BackendError(anyhow::anyhow!(e)))?;
        tracing::info!(record_id = id, %kind, "Postgres: Association deleted");
        Ok(deleted.row.into_record(kind))
    }

    async fn list_for_parent(&self, parent: ParentRef) -> Result<Vec<AssociationRecord>, PersistenceError> {
        let sql = format!(
            r#"
            SELECT i.pkimage, i.identifier, i.url, i.caption, i.fk_user_image, i.created_on,
                   l.{column} AS fk_parent
            FROM {table} l
            JOIN images i ON i.pkimage = l.fk_image
            WHERE l.{column} = $1
            ORDER BY i.created_on, i.pkimage
            "#,
            table = parent.kind.link_table(),
            column = parent.kind.link_column(),
        );

        let rows = sqlx::query_as::<_, AssociationRow>(&sql)
            .bind(parent.id)
            .fetch_all(&self.pool)
            .await
            .context(format!("Postgres: Failed to list associations for {}", parent))
            .map_err(PersistenceError::BackendError)?;

        tracing::debug!(%parent, count = rows.len(), "Postgres: Listed associations");
        Ok(rows.into_iter().map(|row| row.into_record(parent.kind)).collect())
    }
}

/// Sorts a failed insert into the persistence error taxonomy.
/// `parent_entity` names the row a non-user foreign key points at.
fn map_write_error(err: sqlx::Error, target: &str, parent_entity: &'static str) -> PersistenceError {
    if let sqlx::Error::Database(db_err) = &err {
        let constraint = db_err.constraint().unwrap_or("unknown").to_string();
        match db_err.kind() {
            ErrorKind::ForeignKeyViolation => {
                let entity = if constraint.contains("fk_user") { "user" } else { parent_entity };
                tracing::warn!(%target, %constraint, "Postgres: Insert references a missing {}", entity);
                return PersistenceError::MissingReference { entity, constraint };
            }
            ErrorKind::UniqueViolation | ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                return PersistenceError::Constraint(format!("{} ({})", db_err.message(), constraint));
            }
            _ => {}
        }
    }
    PersistenceError::BackendError(
        anyhow::Error::new(err).context(format!("Postgres: Failed to create image row for {}", target)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    // Integration tests - run with DATABASE_URL set
    // cargo test -- --ignored

    async fn repo_with_fixtures() -> (PgAssociationRepository, i64, i64) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = db::create_pool(&url).await.expect("pool creation failed");
        db::run_migrations(&pool).await.expect("migrations failed");

        let suffix = uuid::Uuid::new_v4();
        let (user_id,): (i64,) = sqlx::query_as(
            "INSERT INTO users (username, email) VALUES ($1, $2) RETURNING pkuser",
        )
        .bind(format!("hiker-{}", suffix))
        .bind(format!("hiker-{}@example.com", suffix))
        .fetch_one(&pool)
        .await
        .expect("user insert failed");
        let (adventure_id,): (i64,) = sqlx::query_as(
            "INSERT INTO adventures (title, fk_user_adventure) VALUES ('Half Dome', $1) RETURNING pkadventure",
        )
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .expect("adventure insert failed");

        (PgAssociationRepository::new(pool), user_id, adventure_id)
    }

    fn new_association(parent: ParentRef, user_id: i64) -> NewAssociation {
        NewAssociation {
            parent,
            object_key: "6f1c2e9a-cable-route.jpg".into(),
            object_location: "https://photos.example/6f1c2e9a-cable-route.jpg".into(),
            caption: Some("On the cables".into()),
            uploading_user_id: user_id,
        }
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn identical_calls_create_distinct_records() {
        let (repo, user_id, adventure_id) = repo_with_fixtures().await;
        let parent = ParentRef::adventure(adventure_id);

        let first = repo.associate(new_association(parent, user_id)).await.unwrap();
        let second = repo.associate(new_association(parent, user_id)).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.object_key, second.object_key);
        let listed = repo.list_for_parent(parent).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn missing_parent_is_a_foreign_key_failure_and_writes_nothing() {
        let (repo, user_id, _) = repo_with_fixtures().await;
        let parent = ParentRef::adventure(i64::MAX);

        let err = repo.associate(new_association(parent, user_id)).await.unwrap_err();

        assert!(matches!(err, PersistenceError::MissingReference { entity: "adventure", .. }));
        assert!(repo.list_for_parent(parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn missing_user_is_reported_as_user() {
        let (repo, _, adventure_id) = repo_with_fixtures().await;

        let err = repo
            .associate(new_association(ParentRef::adventure(adventure_id), i64::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, PersistenceError::MissingReference { entity: "user", .. }));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn unlinked_image_belongs_to_user_only() {
        let (repo, user_id, adventure_id) = repo_with_fixtures().await;
        let new = NewImage {
            object_key: "1b2c-profile.jpg".into(),
            object_location: "https://photos.example/1b2c-profile.jpg".into(),
            caption: None,
            uploading_user_id: user_id,
        };

        let record = repo.create_image(new).await.unwrap();

        assert_eq!(record.uploading_user_id, user_id);
        assert_eq!(record.object_key, "1b2c-profile.jpg");
        assert!(repo.list_for_parent(ParentRef::adventure(adventure_id)).await.unwrap().is_empty());
        // Not an association, so delete-by-id does not see it.
        assert!(matches!(repo.delete(record.id).await, Err(PersistenceError::NotFound(_))));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn unlinked_image_for_missing_user_is_rejected() {
        let (repo, _, _) = repo_with_fixtures().await;
        let new = NewImage {
            object_key: "9e8d-ghost.jpg".into(),
            object_location: "https://photos.example/9e8d-ghost.jpg".into(),
            caption: None,
            uploading_user_id: i64::MAX,
        };

        let err = repo.create_image(new).await.unwrap_err();
        assert!(matches!(err, PersistenceError::MissingReference { entity: "user", .. }));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn delete_removes_record_once() {
        let (repo, user_id, adventure_id) = repo_with_fixtures().await;
        let record = repo
            .associate(new_association(ParentRef::adventure(adventure_id), user_id))
            .await
            .unwrap();

        let deleted = repo.delete(record.id).await.unwrap();
        assert_eq!(deleted, record);
        assert!(matches!(repo.delete(record.id).await, Err(PersistenceError::NotFound(id)) if id == record.id));
    }
}
