use crate::renderer::Renderer;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of renderers by subsystem name, built once at startup and
/// immutable thereafter (grounded on `ando-plugin`'s `PluginRegistry`).
pub struct RendererCatalog {
    renderers: HashMap<String, Arc<dyn Renderer>>,
}

impl RendererCatalog {
    pub fn new() -> Self {
        Self {
            renderers: HashMap::new(),
        }
    }

    pub fn register(&mut self, renderer: Arc<dyn Renderer>) {
        let name = renderer.name().to_string();
        tracing::info!(renderer = %name, "registered renderer");
        self.renderers.insert(name, renderer);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Renderer>> {
        self.renderers.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.renderers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

impl Default for RendererCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::RenderInput;
    use agent_core::types::ArtifactBundle;
    use async_trait::async_trait;

    struct StubRenderer(&'static str);

    #[async_trait]
    impl Renderer for StubRenderer {
        fn name(&self) -> &str {
            self.0
        }

        async fn render(&self, _input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
            Ok(ArtifactBundle::default())
        }
    }

    #[test]
    fn empty_catalog_has_no_renderers() {
        let catalog = RendererCatalog::new();
        assert!(catalog.is_empty());
        assert!(catalog.get("easytier").is_none());
    }

    #[test]
    fn register_and_get_round_trips() {
        let mut catalog = RendererCatalog::new();
        catalog.register(Arc::new(StubRenderer("easytier")));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("easytier").is_some());
        assert!(catalog.get("clash").is_none());
    }

    #[test]
    fn registering_same_name_overwrites() {
        let mut catalog = RendererCatalog::new();
        catalog.register(Arc::new(StubRenderer("clash")));
        catalog.register(Arc::new(StubRenderer("clash")));
        assert_eq!(catalog.len(), 1);
    }
}
