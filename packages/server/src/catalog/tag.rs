//! Tag persistence (§3).

use super::Catalog;
use crate::entities::Tag;
use crate::error::{NetRavenError, Result};
use crate::id::TagId;

const TAG_COLUMNS: &str = "id, name, tag_type, created_at";

impl Catalog {
    pub async fn insert_tag(&self, tag: &Tag) -> Result<Tag> {
        // §3: "display name (unique, case-insensitive)" — a duplicate insert
        // surfaces as a unique-violation, translated to `conflict` (§7).
        sqlx::query_as::<_, Tag>(&format!(
            "INSERT INTO tags (id, name, tag_type, created_at) VALUES ($1, $2, $3, $4) \
             RETURNING {TAG_COLUMNS}"
        ))
        .bind(tag.id)
        .bind(&tag.name)
        .bind(&tag.tag_type)
        .bind(tag.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                NetRavenError::Conflict(format!("tag name {:?} already in use", tag.name))
            }
            _ => NetRavenError::from(e),
        })
    }

    pub async fn get_tag(&self, id: TagId) -> Result<Tag> {
        sqlx::query_as::<_, Tag>(&format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| NetRavenError::not_found("tag", id))
    }

    pub async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        sqlx::query_as::<_, Tag>(&format!(
            "SELECT {TAG_COLUMNS} FROM tags WHERE LOWER(name) = LOWER($1)"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        sqlx::query_as::<_, Tag>(&format!("SELECT {TAG_COLUMNS} FROM tags ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// §3: "deletion is allowed only if it would not orphan a credential
    /// binding (binding is cascaded)" — the cascade is the FK on
    /// `credential_tag_bindings`; nothing is orphaned because the binding
    /// row disappears along with the Tag, not the Credential itself.
    pub async fn delete_tag(&self, id: TagId) -> Result<()> {
        sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
