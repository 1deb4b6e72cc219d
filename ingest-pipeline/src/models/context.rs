//! Pipeline context: where in the project an item belongs

use ingest_common::{EntityRef, FieldMap};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::templates::Template;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub project: EntityRef,
    /// Shot, Sequence or Asset
    pub entity: Option<EntityRef>,
    /// Sequence that owns a Shot entity
    pub parent_sequence: Option<EntityRef>,
    pub task: Option<EntityRef>,
    /// Step; `name` holds the step short name
    pub step: Option<EntityRef>,
    pub user: Option<EntityRef>,
}

impl Context {
    pub fn new(project: EntityRef) -> Self {
        Self {
            project,
            entity: None,
            parent_sequence: None,
            task: None,
            step: None,
            user: None,
        }
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_parent_sequence(mut self, sequence: EntityRef) -> Self {
        self.parent_sequence = Some(sequence);
        self
    }

    pub fn with_task(mut self, task: EntityRef) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_step(mut self, step: EntityRef) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_user(mut self, user: EntityRef) -> Self {
        self.user = Some(user);
        self
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.entity.as_ref().map(|e| e.entity_type.as_str())
    }

    /// Every field this context can provide
    pub fn fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        if let Some(name) = &self.project.name {
            fields.insert("Project", name.as_str());
        }
        if let Some(entity) = &self.entity {
            if let Some(name) = &entity.name {
                fields.insert(entity.entity_type.clone(), name.as_str());
            }
        }
        if let Some(sequence) = &self.parent_sequence {
            if let Some(name) = &sequence.name {
                fields.insert_missing("Sequence", name.as_str());
            }
        }
        if let Some(step) = self.step.as_ref().and_then(|s| s.name.as_ref()) {
            fields.insert("Step", step.as_str());
        }
        if let Some(task) = self.task.as_ref().and_then(|t| t.name.as_ref()) {
            fields.insert("task_name", task.as_str());
        }
        if let Some(user) = self.user.as_ref().and_then(|u| u.name.as_ref()) {
            fields.insert("user", user.as_str());
        }
        fields
    }

    /// Context fields restricted to the keys `template` uses
    pub fn as_template_fields(&self, template: &Template) -> FieldMap {
        self.fields()
            .iter()
            .filter(|(key, _)| template.key(key).is_some())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Link fields for a record created in this context
    pub fn record_links(&self) -> Map<String, Value> {
        let mut links = Map::new();
        links.insert("project".to_string(), self.project.to_link());
        if let Some(entity) = &self.entity {
            links.insert("entity".to_string(), entity.to_link());
        }
        if let Some(task) = &self.task {
            links.insert("task".to_string(), task.to_link());
        }
        links
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let project = self.project.name.as_deref().unwrap_or("?");
        match (&self.entity, &self.task) {
            (Some(entity), Some(task)) => write!(
                f,
                "{} {} {}, task {}",
                project,
                entity.entity_type,
                entity.name.as_deref().unwrap_or("?"),
                task.name.as_deref().unwrap_or("?")
            ),
            (Some(entity), None) => write!(
                f,
                "{} {} {}",
                project,
                entity.entity_type,
                entity.name.as_deref().unwrap_or("?")
            ),
            _ => write!(f, "{}", project),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_from_shot_context() {
        let context = Context::new(EntityRef::new("Project", 1, "demo"))
            .with_entity(EntityRef::new("Shot", 10, "sh010"))
            .with_parent_sequence(EntityRef::new("Sequence", 5, "sq01"))
            .with_step(EntityRef::new("Step", 3, "vendor"))
            .with_task(EntityRef::new("Task", 20, "Vendor"));

        let fields = context.fields();
        assert_eq!(fields.get_str("Project"), Some("demo"));
        assert_eq!(fields.get_str("Shot"), Some("sh010"));
        assert_eq!(fields.get_str("Sequence"), Some("sq01"));
        assert_eq!(fields.get_str("Step"), Some("vendor"));
        assert_eq!(fields.get_str("task_name"), Some("Vendor"));

        let links = context.record_links();
        assert_eq!(links["entity"]["type"], "Shot");
        assert_eq!(links["task"]["id"], 20);
    }
}
