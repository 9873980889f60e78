use crate::domain::EntityType;

/// Schema-template lookup used when synthesizing process content.
pub trait TemplateStore: Send + Sync {
    fn schema_url(&self, kind: EntityType) -> String;
}

/// Serves schema URLs under a fixed base, one document per kind.
#[derive(Debug, Clone)]
pub struct FixedTemplateStore {
    base_url: String,
}

impl FixedTemplateStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }
}

impl TemplateStore for FixedTemplateStore {
    fn schema_url(&self, kind: EntityType) -> String {
        format!("{}/{}", self.base_url, kind.as_str())
    }
}
