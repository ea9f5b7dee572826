//! Renderer selection and fan-out
//!
//! A fetched artifact directory is rendered by exactly one engine, chosen by
//! the marker files it contains. A descriptor may also list extra renderer
//! entries for sub-paths; their output is appended to the default render and
//! the combined set is de-duplicated by resource identity.

use sherpack_core::{Manifest, RendererKind, ServiceDescriptor};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{ManifestError, Result};

const CHART_MARKERS: &[&str] = &["Chart.yaml", "values.yaml"];
const KUSTOMIZE_MARKER: &str = "kustomization.yaml";

/// Turns a directory of sources into resource documents
pub trait Renderer: Send + Sync {
    fn render(&self, dir: &Path, service: &ServiceDescriptor) -> Result<Vec<Manifest>>;
}

/// Pick the renderer for a directory by marker-file presence
///
/// Chart files select Helm, a kustomization selects Kustomize and anything
/// else is rendered as raw documents.
pub fn detect_renderer(dir: &Path) -> RendererKind {
    let mut kustomize = false;

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if CHART_MARKERS.contains(&name.as_ref()) {
            return RendererKind::Helm;
        }
        if name == KUSTOMIZE_MARKER {
            kustomize = true;
        }
    }

    if kustomize {
        RendererKind::Kustomize
    } else {
        RendererKind::Raw
    }
}

/// Registry of rendering engines keyed by kind
#[derive(Clone, Default)]
pub struct RendererSet {
    renderers: HashMap<RendererKind, Arc<dyn Renderer>>,
}

impl RendererSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: RendererKind, renderer: Arc<dyn Renderer>) -> Self {
        self.renderers.insert(kind, renderer);
        self
    }

    pub fn supports(&self, kind: RendererKind) -> bool {
        self.renderers.contains_key(&kind)
    }

    /// Render the artifact directory for a service
    pub fn render(&self, dir: &Path, service: &ServiceDescriptor) -> Result<Vec<Manifest>> {
        let mut manifests = self.render_with(RendererKind::Auto, dir, service)?;

        for spec in &service.renderers {
            let path = join_relative(dir, &spec.path)?;
            let rendered = self
                .render_with(spec.kind, &path, service)
                .map_err(|e| {
                    ManifestError::render(
                        spec.path.clone(),
                        format!("error rendering with type {}: {}", spec.kind, e),
                    )
                })?;
            manifests.extend(rendered);
        }

        Ok(dedupe_keep_last(manifests))
    }

    fn render_with(
        &self,
        kind: RendererKind,
        dir: &Path,
        service: &ServiceDescriptor,
    ) -> Result<Vec<Manifest>> {
        let kind = match kind {
            RendererKind::Auto => detect_renderer(dir),
            kind => kind,
        };

        let renderer = self
            .renderers
            .get(&kind)
            .ok_or(ManifestError::UnsupportedRenderer { kind })?;
        renderer.render(dir, service)
    }
}

/// Resolve a renderer sub-path without escaping the artifact directory
fn join_relative(dir: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(ManifestError::render(
            relative.display().to_string(),
            "renderer path must stay inside the manifest directory",
        ));
    }
    Ok(dir.join(relative))
}

/// Drop earlier duplicates of the same resource, keeping the order of the survivors
pub fn dedupe_keep_last(manifests: Vec<Manifest>) -> Vec<Manifest> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Manifest> = manifests
        .into_iter()
        .rev()
        .filter(|m| seen.insert(m.key()))
        .collect();
    unique.reverse();
    unique
}
