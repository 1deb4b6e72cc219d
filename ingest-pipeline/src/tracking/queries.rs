//! Publish and plate lookups shared by validation and publishing

use serde_json::Value;
use std::path::Path;

use super::{entity_id, Entity, Filter, TrackingClient};
use crate::error::IngestResult;
use crate::models::records::{PLATE_ENTITY, PUBLISH_ENTITY};
use crate::models::{Context, PlateRecord, PublishRecord};
use crate::services::path_info::version_agnostic_path;

/// Project and entity filters for records in `context`
pub fn context_filters(context: &Context) -> Vec<Filter> {
    let mut filters = vec![Filter::is("project", context.project.to_link())];
    if let Some(entity) = &context.entity {
        filters.push(Filter::is("entity", entity.to_link()));
    }
    filters
}

/// Publishes of `name` in `context`, any status
pub async fn find_publishes(
    client: &dyn TrackingClient,
    context: &Context,
    name: &str,
) -> IngestResult<Vec<PublishRecord>> {
    let mut filters = context_filters(context);
    filters.push(Filter::is("name", name));
    let entities = client.find(PUBLISH_ENTITY, &filters, &[]).await?;
    Ok(entities.iter().filter_map(PublishRecord::from_entity).collect())
}

/// Version for a new publish of `name`
///
/// The larger of the version found on the path (1 when absent) and one past
/// the highest version already registered.
pub async fn next_publish_version(
    client: &dyn TrackingClient,
    context: &Context,
    name: &str,
    path_version: Option<i64>,
) -> IngestResult<i64> {
    let floor = path_version.unwrap_or(1).max(1);
    let existing = find_publishes(client, context, name)
        .await?
        .iter()
        .map(|record| record.version_number)
        .max();

    let next = match existing {
        Some(max) => floor.max(max + 1),
        None => floor,
    };
    tracing::debug!(name, ?path_version, ?existing, next, "Resolved publish version");
    Ok(next)
}

/// Active publishes of `name` in `context` at any version of `path`
pub async fn conflicting_publishes(
    client: &dyn TrackingClient,
    context: &Context,
    name: &str,
    path: &Path,
) -> IngestResult<Vec<PublishRecord>> {
    let mut filters = context_filters(context);
    filters.push(Filter::is("name", name));
    filters.push(Filter::is_not("sg_status_list", Value::Null));

    let wanted = version_agnostic_path(path);
    let entities = client.find(PUBLISH_ENTITY, &filters, &[]).await?;
    Ok(entities
        .iter()
        .filter_map(PublishRecord::from_entity)
        .filter(|record| record.is_active())
        .filter(|record| version_agnostic_path(&record.path) == wanted)
        .collect())
}

/// Link field a plate uses for the context entity
pub fn plate_entity_field(context: &Context) -> Option<&'static str> {
    match context.entity_type() {
        Some("Shot") => Some("sg_shot"),
        Some("Sequence") => Some("sg_sequence"),
        _ => None,
    }
}

pub fn plate_filters(context: &Context, code: &str) -> Vec<Filter> {
    let mut filters = vec![
        Filter::is("project", context.project.to_link()),
        Filter::is("code", code),
    ];
    if let (Some(field), Some(entity)) = (plate_entity_field(context), &context.entity) {
        filters.push(Filter::is(field, entity.to_link()));
    }
    filters
}

pub async fn find_plate(
    client: &dyn TrackingClient,
    context: &Context,
    code: &str,
) -> IngestResult<Option<PlateRecord>> {
    let entity = client
        .find_one(PLATE_ENTITY, &plate_filters(context, code), &[])
        .await?;
    Ok(entity.and_then(|e| PlateRecord::from_entity(&e, false)))
}

/// First entity matching `filters`, or a new one made from `data`
///
/// Returns the entity and whether it was created.
pub async fn find_or_create(
    client: &dyn TrackingClient,
    entity_type: &str,
    filters: &[Filter],
    data: Entity,
) -> IngestResult<(Entity, bool)> {
    if let Some(found) = client.find_one(entity_type, filters, &[]).await? {
        return Ok((found, false));
    }
    let created = client.create(entity_type, data).await?;
    tracing::info!(entity_type, id = ?entity_id(&created), "Created tracking entity");
    Ok((created, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::SqliteTrackingClient;
    use ingest_common::db::init_memory_database;
    use ingest_common::EntityRef;
    use serde_json::json;

    fn context() -> Context {
        Context::new(EntityRef::new("Project", 1, "demo")).with_entity(EntityRef::new("Shot", 2, "sh010"))
    }

    fn publish(version: i64, status: Value) -> Entity {
        json!({
            "project": {"type": "Project", "id": 1},
            "entity": {"type": "Shot", "id": 2},
            "name": "bg.exr",
            "path": {"local_path": format!("/p/bg/v{:03}/bg_v{:03}.%04d.exr", version, version)},
            "version_number": version,
            "sg_status_list": status,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[tokio::test]
    async fn test_next_version_uses_registered_max() {
        let client = SqliteTrackingClient::new(init_memory_database().await.unwrap());
        assert_eq!(next_publish_version(&client, &context(), "bg.exr", None).await.unwrap(), 1);
        assert_eq!(next_publish_version(&client, &context(), "bg.exr", Some(5)).await.unwrap(), 5);

        client.create(PUBLISH_ENTITY, publish(3, json!("cmpt"))).await.unwrap();
        assert_eq!(next_publish_version(&client, &context(), "bg.exr", None).await.unwrap(), 4);
        assert_eq!(next_publish_version(&client, &context(), "bg.exr", Some(9)).await.unwrap(), 9);
        assert_eq!(next_publish_version(&client, &context(), "fg.exr", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conflicts_ignore_inactive_and_other_paths() {
        let client = SqliteTrackingClient::new(init_memory_database().await.unwrap());
        client.create(PUBLISH_ENTITY, publish(1, Value::Null)).await.unwrap();
        let active = client.create(PUBLISH_ENTITY, publish(2, json!("cmpt"))).await.unwrap();
        let mut elsewhere = publish(2, json!("cmpt"));
        elsewhere.insert("path".to_string(), json!({"local_path": "/other/bg_v002.%04d.exr"}));
        client.create(PUBLISH_ENTITY, elsewhere).await.unwrap();

        let conflicts = conflicting_publishes(
            &client,
            &context(),
            "bg.exr",
            Path::new("/p/bg/v003/bg_v003.%04d.exr"),
        )
        .await
        .unwrap();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(Some(conflicts[0].id), active.get("id").and_then(Value::as_i64));
    }

    #[tokio::test]
    async fn test_find_or_create_reuses_match() {
        let client = SqliteTrackingClient::new(init_memory_database().await.unwrap());
        let data = json!({"code": "sh010"}).as_object().cloned().unwrap();
        let filters = [Filter::is("code", "sh010")];

        let (first, created) = find_or_create(&client, "Shot", &filters, data.clone()).await.unwrap();
        assert!(created);
        let (second, created) = find_or_create(&client, "Shot", &filters, data).await.unwrap();
        assert!(!created);
        assert_eq!(entity_id(&first), entity_id(&second));
    }
}
