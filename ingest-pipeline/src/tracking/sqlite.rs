//! SQLite-backed tracking client
//!
//! Every entity lives in the `entities` table; `data` holds the JSON
//! payload without `type` and `id`. Filters are evaluated in Rust after
//! loading the rows of the requested type.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use super::{Entity, Filter, TrackingClient};
use crate::error::{IngestError, IngestResult};

#[derive(Clone)]
pub struct SqliteTrackingClient {
    pool: SqlitePool,
}

impl SqliteTrackingClient {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load(&self, entity_type: &str, id: i64) -> IngestResult<Option<Entity>> {
        let row = sqlx::query("SELECT id, entity_type, data FROM entities WHERE entity_type = ? AND id = ?")
            .bind(entity_type)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_entity(&row)).transpose()
    }
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> IngestResult<Entity> {
    let id: i64 = row.get("id");
    let entity_type: String = row.get("entity_type");
    let data: String = row.get("data");

    let mut entity = match serde_json::from_str::<Value>(&data)
        .map_err(|e| IngestError::Remote(format!("Corrupt payload for {} {}: {}", entity_type, id, e)))?
    {
        Value::Object(map) => map,
        _ => Entity::new(),
    };
    entity.insert("type".to_string(), Value::String(entity_type));
    entity.insert("id".to_string(), Value::from(id));
    Ok(entity)
}

fn strip_identity(mut data: Entity) -> Entity {
    data.remove("type");
    data.remove("id");
    data
}

fn select_fields(entity: Entity, fields: &[&str]) -> Entity {
    if fields.is_empty() {
        return entity;
    }
    entity
        .into_iter()
        .filter(|(key, _)| key == "type" || key == "id" || fields.contains(&key.as_str()))
        .collect()
}

#[async_trait]
impl TrackingClient for SqliteTrackingClient {
    async fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[&str],
    ) -> IngestResult<Vec<Entity>> {
        let rows = sqlx::query("SELECT id, entity_type, data FROM entities WHERE entity_type = ? ORDER BY id")
            .bind(entity_type)
            .fetch_all(&self.pool)
            .await?;

        let mut found = Vec::new();
        for row in &rows {
            let entity = row_to_entity(row)?;
            if filters.iter().all(|f| f.matches(&entity)) {
                found.push(select_fields(entity, fields));
            }
        }

        tracing::trace!(entity_type, filters = filters.len(), found = found.len(), "find");
        Ok(found)
    }

    async fn create(&self, entity_type: &str, data: Entity) -> IngestResult<Entity> {
        let data = strip_identity(data);
        let payload = serde_json::to_string(&Value::Object(data.clone()))
            .map_err(|e| IngestError::Remote(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO entities (entity_type, data, created_at, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(entity_type)
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!(entity_type, id, "Created entity");

        let mut entity = data;
        entity.insert("type".to_string(), Value::String(entity_type.to_string()));
        entity.insert("id".to_string(), Value::from(id));
        Ok(entity)
    }

    async fn update(&self, entity_type: &str, id: i64, data: Entity) -> IngestResult<Entity> {
        let existing = self
            .load(entity_type, id)
            .await?
            .ok_or_else(|| IngestError::Remote(format!("{} {} not found", entity_type, id)))?;

        let mut merged = strip_identity(existing);
        for (key, value) in strip_identity(data) {
            merged.insert(key, value);
        }
        let payload = serde_json::to_string(&Value::Object(merged.clone()))
            .map_err(|e| IngestError::Remote(e.to_string()))?;

        sqlx::query("UPDATE entities SET data = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(&payload)
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(entity_type, id, "Updated entity");

        merged.insert("type".to_string(), Value::String(entity_type.to_string()));
        merged.insert("id".to_string(), Value::from(id));
        Ok(merged)
    }

    async fn delete(&self, entity_type: &str, id: i64) -> IngestResult<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE entity_type = ? AND id = ?")
            .bind(entity_type)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        tracing::debug!(entity_type, id, deleted, "Deleted entity");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_common::db::init_memory_database;
    use serde_json::json;

    async fn client() -> SqliteTrackingClient {
        SqliteTrackingClient::new(init_memory_database().await.unwrap())
    }

    fn data(value: Value) -> Entity {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_find_update_delete() {
        let client = client().await;

        let shot = client
            .create("Shot", data(json!({"code": "sh010", "sg_status_list": "ip"})))
            .await
            .unwrap();
        let id = shot["id"].as_i64().unwrap();
        assert_eq!(shot["type"], "Shot");

        let found = client
            .find_one("Shot", &[Filter::is("code", "sh010")], &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["id"], id);

        let updated = client
            .update("Shot", id, data(json!({"sg_status_list": Value::Null})))
            .await
            .unwrap();
        assert_eq!(updated["code"], "sh010");
        assert!(updated["sg_status_list"].is_null());

        assert!(client.delete("Shot", id).await.unwrap());
        assert!(!client.delete("Shot", id).await.unwrap());
        assert!(client.find("Shot", &[], &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_limits_fields_and_types() {
        let client = client().await;
        client
            .create("Shot", data(json!({"code": "sh010", "description": "x"})))
            .await
            .unwrap();
        client.create("Asset", data(json!({"code": "sh010"}))).await.unwrap();

        let shots = client.find("Shot", &[], &["code"]).await.unwrap();
        assert_eq!(shots.len(), 1);
        assert!(shots[0].contains_key("code"));
        assert!(!shots[0].contains_key("description"));
        assert!(shots[0].contains_key("id"));
    }

    #[tokio::test]
    async fn test_update_missing_entity_is_remote_error() {
        let client = client().await;
        let err = client.update("Shot", 99, Entity::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Remote(_)));
    }
}
