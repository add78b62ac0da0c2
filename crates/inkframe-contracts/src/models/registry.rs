use indexmap::IndexMap;

pub const CAPABILITY_TEXT: &str = "text";
pub const CAPABILITY_IMAGE: &str = "image";
pub const CAPABILITY_EDIT: &str = "edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str, provider: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider && model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str, provider: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.provider == provider && model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("openai/gpt-4o-mini", "openrouter", &["text"]);
    insert("openai/gpt-4o", "openrouter", &["text"]);
    insert("anthropic/claude-3.5-haiku", "openrouter", &["text"]);
    insert("google/gemini-2.5-flash", "openrouter", &["text"]);
    insert(
        "google/gemini-2.5-flash-image-preview",
        "openrouter",
        &["image", "edit"],
    );
    insert("google/gemini-2.5-flash-image", "openrouter", &["image", "edit"]);
    insert("dryrun-text-1", "dryrun", &["text"]);
    insert("dryrun-image-1", "dryrun", &["image", "edit"]);

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT};

    #[test]
    fn default_registry_lists_openrouter_models_first() {
        let registry = ModelRegistry::new(None);
        let first = registry.list().next().map(|model| model.provider.clone());
        assert_eq!(first.as_deref(), Some("openrouter"));
    }

    #[test]
    fn by_capability_filters_on_provider() {
        let registry = ModelRegistry::new(None);
        let images = registry.by_capability(CAPABILITY_IMAGE, "dryrun");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "dryrun-image-1");
        assert!(images[0].supports(CAPABILITY_EDIT));
    }

    #[test]
    fn ensure_rejects_wrong_capability_or_provider() {
        let registry = ModelRegistry::new(None);
        assert!(registry
            .ensure("openai/gpt-4o-mini", CAPABILITY_TEXT, "openrouter")
            .is_some());
        assert!(registry
            .ensure("openai/gpt-4o-mini", CAPABILITY_IMAGE, "openrouter")
            .is_none());
        assert!(registry
            .ensure("openai/gpt-4o-mini", CAPABILITY_TEXT, "dryrun")
            .is_none());
    }
}
