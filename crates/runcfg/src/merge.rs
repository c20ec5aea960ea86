//! Merges templates from the main document and every included source into
//! a single read-only registry, detecting cross-file duplicate names.

use indexmap::IndexMap;

use crate::error::Error;
use crate::spec::CommandTemplate;

/// One file's worth of templates, tagged with where they came from.
#[derive(Clone, Debug)]
pub struct TemplateSource {
    pub file_path: String,
    pub templates: IndexMap<String, CommandTemplate>,
}

/// The merged, read-only template registry.
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, CommandTemplate>,
}

impl TemplateRegistry {
    pub fn get(&self, name: &str) -> Option<&CommandTemplate> {
        self.templates.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CommandTemplate)> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Merges `sources` in order into a single [`TemplateRegistry`].
///
/// Sources are iterated in the order given; callers append the main
/// document's own templates last so every source is checked for
/// cross-file duplicates uniformly. On a duplicate name, the error lists
/// every file that defined it, including the first.
pub fn merge_templates(sources: &[TemplateSource]) -> Result<TemplateRegistry, Error> {
    let mut templates = IndexMap::new();
    let mut locations: IndexMap<String, Vec<String>> = IndexMap::new();

    for source in sources {
        for (name, template) in &source.templates {
            locations
                .entry(name.clone())
                .or_default()
                .push(source.file_path.clone());
            templates.entry(name.clone()).or_insert_with(|| template.clone());
        }
    }

    for (name, locs) in &locations {
        if locs.len() > 1 {
            return Err(Error::DuplicateTemplateName {
                name: name.clone(),
                locations: locs.clone(),
            });
        }
    }

    Ok(TemplateRegistry { templates })
}
