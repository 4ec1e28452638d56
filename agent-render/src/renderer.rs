use agent_core::types::ArtifactBundle;
use async_trait::async_trait;
use serde_json::Value;

/// A subsystem's slice of committed configuration, handed to its
/// renderer (spec §3 Slice, §4.3). `node` is this node's own prefix
/// subtree; `global` is the fleet-wide prefix subtree; `all_nodes` is
/// populated only for renderers that declared they need fleet-wide
/// visibility (spec §4.3: "switched mesh... requires an `all_nodes`
/// slice").
#[derive(Debug, Clone)]
pub struct RenderInput {
    pub node_id: String,
    pub node: Value,
    pub global: Value,
    pub all_nodes: Option<Value>,
}

/// A pure function from a subsystem slice to the artifacts that
/// subsystem should have on disk (spec §4.3 Renderer Invoker).
///
/// Generalized from `ando-plugin`'s `Plugin` trait: where a `Plugin`
/// mutates a per-request context across HTTP lifecycle phases, a
/// `Renderer` takes one immutable slice and returns one bundle, with no
/// phases and no short-circuiting — only a render or a rejection.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Subsystem name this renderer owns (matches the etcd key
    /// component, e.g. `"easytier"`, `"clash"`).
    fn name(&self) -> &str;

    /// Whether this renderer's slice needs the `all_nodes` view.
    fn needs_all_nodes(&self) -> bool {
        false
    }

    /// Render the slice into artifacts. An `Err` is a handler-scoped
    /// failure (spec §7): the reconciler logs it and moves on to the
    /// next handler rather than aborting the whole pass.
    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRenderer;

    #[async_trait]
    impl Renderer for EchoRenderer {
        fn name(&self) -> &str {
            "echo"
        }

        async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
            let _ = input;
            Ok(ArtifactBundle::default())
        }
    }

    #[tokio::test]
    async fn renderer_returns_empty_bundle_for_empty_slice() {
        let r = EchoRenderer;
        let input = RenderInput {
            node_id: "n1".to_string(),
            node: serde_json::json!({}),
            global: serde_json::json!({}),
            all_nodes: None,
        };
        let bundle = r.render(&input).await.unwrap();
        assert!(bundle.files.is_empty());
    }

    #[test]
    fn default_needs_all_nodes_is_false() {
        let r = EchoRenderer;
        assert!(!r.needs_all_nodes());
    }
}
