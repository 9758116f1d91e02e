use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::{Deprecation, Subtag, SubtagCategory, SubtagDeps, SubtagDescriptor};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Subtag name '{name}' is registered by both {existing} and {duplicate}")]
    DuplicateName {
        name: String,
        existing: String,
        duplicate: String,
    },
}

/// A built subtag together with its descriptor metadata.
pub struct RegisteredSubtag {
    pub name: String,
    pub category: SubtagCategory,
    pub deprecated: Option<Deprecation>,
    pub subtag: Arc<dyn Subtag>,
}

impl std::fmt::Debug for RegisteredSubtag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSubtag")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("deprecated", &self.deprecated)
            .finish()
    }
}

/// Name to implementation map, built once per engine.
#[derive(Debug, Default)]
pub struct SubtagRegistry {
    entries: HashMap<String, Arc<RegisteredSubtag>>,
}

impl SubtagRegistry {
    /// Builds every descriptor and registers its lower-cased name and aliases. A name
    /// claimed twice is an error, never an overwrite.
    pub fn new<I>(descriptors: I, deps: &SubtagDeps<'_>) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = SubtagDescriptor>,
    {
        let mut entries: HashMap<String, Arc<RegisteredSubtag>> = HashMap::new();

        for descriptor in descriptors {
            let registered = Arc::new(RegisteredSubtag {
                name: descriptor.name.to_lowercase(),
                category: descriptor.category,
                deprecated: descriptor.deprecated.clone(),
                subtag: (descriptor.build)(deps),
            });

            let names = std::iter::once(&descriptor.name).chain(descriptor.aliases.iter());
            for name in names {
                let key = name.to_lowercase();
                if let Some(existing) = entries.get(&key) {
                    return Err(RegistryError::DuplicateName {
                        name: key,
                        existing: existing.name.clone(),
                        duplicate: registered.name.clone(),
                    });
                }
                entries.insert(key, registered.clone());
            }
        }

        debug!(names = entries.len(), "built subtag registry");
        Ok(Self { entries })
    }

    /// Looks up a lower-cased name. `family.member` falls back to a `family.` handler.
    pub fn resolve(&self, name: &str) -> Option<&Arc<RegisteredSubtag>> {
        if let Some(entry) = self.entries.get(name) {
            return Some(entry);
        }
        let (family, _) = name.split_once('.')?;
        self.entries.get(&format!("{}.", family))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
