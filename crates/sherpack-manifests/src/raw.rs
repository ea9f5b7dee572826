//! Raw document renderer
//!
//! Every `.yaml`, `.yml` and `.json` file under the directory is rendered as a
//! template with the service configuration bound to `configuration`, then
//! split into documents. Namespaced resources without a namespace are placed
//! in the service namespace.

use minijinja::{Environment, UndefinedBehavior};
use sherpack_core::{GroupVersionKind, Manifest, ServiceDescriptor};
use sherpack_discovery::DiscoveryCache;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{ManifestError, Result};
use crate::render::Renderer;

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];
const LOCAL_CONFIG_ANNOTATION: &str = "config.kubernetes.io/local-config";

/// Kinds known to be cluster scoped when discovery has no answer
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

/// Renders plain (optionally templated) resource files
#[derive(Default)]
pub struct RawRenderer {
    discovery: Option<Arc<DiscoveryCache>>,
}

impl RawRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up resource scope through the discovery cache
    pub fn with_discovery(discovery: Arc<DiscoveryCache>) -> Self {
        Self {
            discovery: Some(discovery),
        }
    }

    fn is_namespaced(&self, gvk: &GroupVersionKind) -> bool {
        self.discovery
            .as_ref()
            .and_then(|d| d.snapshot().is_namespaced(gvk))
            .unwrap_or_else(|| !CLUSTER_SCOPED_KINDS.contains(&gvk.kind.as_str()))
    }

    fn render_file(
        &self,
        env: &Environment<'_>,
        path: &Path,
        relative: &str,
        service: &ServiceDescriptor,
    ) -> Result<Vec<Manifest>> {
        let source = std::fs::read_to_string(path)?;
        let rendered = env
            .render_str(
                &source,
                minijinja::context! { configuration => &service.configuration },
            )
            .map_err(|e| ManifestError::render(relative, format!("templating error: {}", e)))?;

        let documents = Manifest::parse_documents(&rendered)
            .map_err(|e| ManifestError::render(relative, format!("failed to parse: {}", e)))?;

        Ok(documents
            .into_iter()
            .filter(|m| m.annotation(LOCAL_CONFIG_ANNOTATION) != Some("true"))
            .collect())
    }
}

impl Renderer for RawRenderer {
    fn render(&self, dir: &Path, service: &ServiceDescriptor) -> Result<Vec<Manifest>> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);

        let mut manifests = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| ManifestError::render(dir.display().to_string(), e))?;
            if !entry.file_type().is_file() || !has_manifest_extension(entry.path()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            manifests.extend(self.render_file(&env, entry.path(), &relative, service)?);
        }

        for manifest in &mut manifests {
            if manifest.namespace().is_none() && self.is_namespaced(&manifest.gvk()) {
                manifest.set_namespace(&service.namespace);
            }
        }

        Ok(manifests)
    }
}

fn has_manifest_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sherpack_core::GroupVersion;
    use sherpack_discovery::{ApiResourceInfo, ApiResourceList, MockDiscoveryClient};
    use tempfile::TempDir;

    fn service() -> ServiceDescriptor {
        let mut service = ServiceDescriptor::new("svc-1", "web", "apps");
        service
            .configuration
            .insert("replicas".to_string(), "3".to_string());
        service
    }

    fn write(dir: &Path, file: &str, content: &str) {
        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_renders_templated_multi_doc_files() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "app/deploy.yaml",
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: {{ configuration.replicas }}\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: web\n  namespace: edge\n",
        );
        write(dir.path(), "README.md", "not a manifest");

        let manifests = RawRenderer::new().render(dir.path(), &service()).unwrap();

        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].pointer("/spec/replicas"), Some(&serde_json::json!(3)));
        assert_eq!(manifests[0].namespace(), Some("apps"));
        assert_eq!(manifests[1].namespace(), Some("edge"));
    }

    #[test]
    fn test_missing_configuration_is_lenient() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "cm.yml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  value: \"{{ configuration.missing }}\"\n",
        );

        let manifests = RawRenderer::new().render(dir.path(), &service()).unwrap();
        assert_eq!(manifests[0].pointer("/data/value"), Some(&serde_json::json!("")));
    }

    #[test]
    fn test_json_and_local_config() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "ns.json",
            r#"{"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "apps"}}"#,
        );
        write(
            dir.path(),
            "local.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: local\n  annotations:\n    config.kubernetes.io/local-config: \"true\"\n",
        );

        let manifests = RawRenderer::new().render(dir.path(), &service()).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].kind(), "Namespace");
        assert_eq!(manifests[0].namespace(), None);
    }

    #[tokio::test]
    async fn test_scope_from_discovery() {
        let mock = MockDiscoveryClient::with_resources(vec![ApiResourceList {
            group_version: GroupVersion::new("example.io", "v1"),
            resources: vec![ApiResourceInfo::new("globals", "Global", false)],
        }]);
        let cache = Arc::new(DiscoveryCache::new(Arc::new(mock.clone()), Arc::new(mock)));
        cache.refresh().await.unwrap();

        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "crs.yaml",
            "apiVersion: example.io/v1\nkind: Global\nmetadata:\n  name: g\n---\napiVersion: example.io/v1\nkind: Local\nmetadata:\n  name: l\n",
        );

        let manifests = RawRenderer::with_discovery(cache)
            .render(dir.path(), &service())
            .unwrap();
        assert_eq!(manifests[0].namespace(), None);
        assert_eq!(manifests[1].namespace(), Some("apps"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.yaml", "kind: [unterminated\n");

        let err = RawRenderer::new().render(dir.path(), &service()).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
