//! Path templates (PathFieldResolver)
//!
//! All templates are compiled once from configuration and shared read-only.

pub mod key;
pub mod template;

pub use key::TemplateKey;
pub use template::Template;

use ingest_common::config::TemplatesConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{IngestError, IngestResult};

/// Every configured template, by name
#[derive(Debug, Clone)]
pub struct TemplateSet {
    project_root: PathBuf,
    keys: BTreeMap<String, TemplateKey>,
    templates: BTreeMap<String, Arc<Template>>,
}

impl TemplateSet {
    pub fn from_config(config: &TemplatesConfig, project_root: &Path) -> IngestResult<Self> {
        let mut keys = BTreeMap::new();
        for (name, key_config) in &config.keys {
            let key = TemplateKey::from_config(name, key_config)
                .map_err(|e| IngestError::Common(ingest_common::Error::Config(e)))?;
            keys.insert(name.clone(), key);
        }

        let mut templates = BTreeMap::new();
        for (name, definition) in &config.paths {
            let template = Template::new(name, definition, Some(project_root), &keys)
                .map_err(|e| IngestError::Common(ingest_common::Error::Config(e)))?;
            templates.insert(name.clone(), Arc::new(template));
        }

        tracing::debug!(
            root = %project_root.display(),
            templates = templates.len(),
            "Compiled templates"
        );

        Ok(Self {
            project_root: project_root.to_path_buf(),
            keys,
            templates,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn get(&self, name: &str) -> IngestResult<Arc<Template>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| IngestError::UnknownTemplate(name.to_string()))
    }

    pub fn key(&self, name: &str) -> Option<&TemplateKey> {
        self.keys.get(name)
    }

    /// First template (by name) that fully matches `path`
    pub fn template_from_path(&self, path: &Path) -> Option<Arc<Template>> {
        self.templates
            .values()
            .find(|template| template.validate(path))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Template>> {
        self.templates.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates_compile() {
        let config = TemplatesConfig::default();
        let set = TemplateSet::from_config(&config, Path::new("/mnt/proj")).unwrap();

        let publish = set.get("vendor_image_publish").unwrap();
        assert!(publish.definition().starts_with("/mnt/proj/sequences/"));
        assert!(matches!(set.get("nope"), Err(IngestError::UnknownTemplate(_))));
    }

    #[test]
    fn test_template_from_path() {
        let config = TemplatesConfig::default();
        let set = TemplateSet::from_config(&config, Path::new("/mnt/proj")).unwrap();

        let path = Path::new("/mnt/proj/sequences/sq01/sh010/vendor/publish/cdl/sh010_grade_v002.cc");
        let template = set.template_from_path(path).unwrap();
        assert_eq!(template.name(), "vendor_cdl_publish");
        assert!(set.template_from_path(Path::new("/tmp/elsewhere.exr")).is_none());
    }
}
