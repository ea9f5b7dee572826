//! Kubernetes resource documents
//!
//! Resource kinds are open-ended, so a [`Manifest`] keeps the whole document
//! as a JSON tree and only exposes the handful of fields the agent reads or
//! writes: type coordinates, name, namespace, labels and annotations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, Result};
use crate::gvk::GroupVersionKind;

/// A single Kubernetes resource document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Manifest {
    object: Value,
}

impl Manifest {
    /// Wrap a JSON object, requiring `apiVersion` and `kind`
    pub fn from_value(object: Value) -> Result<Self> {
        if !object.is_object() {
            return Err(CoreError::invalid_manifest("document is not a mapping"));
        }
        for field in ["apiVersion", "kind"] {
            match object.get(field).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => {}
                _ => {
                    return Err(CoreError::invalid_manifest(format!(
                        "missing required field '{}'",
                        field
                    )));
                }
            }
        }
        Ok(Self { object })
    }

    /// Parse a single YAML (or JSON) document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_value(value)
    }

    /// Parse a multi-document YAML stream, skipping empty documents
    pub fn parse_documents(content: &str) -> Result<Vec<Self>> {
        let mut manifests = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            manifests.push(Self::from_value(value)?);
        }
        Ok(manifests)
    }

    pub fn api_version(&self) -> &str {
        self.str_field("apiVersion").unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.str_field("kind").unwrap_or_default()
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version(self.api_version(), self.kind())
    }

    pub fn name(&self) -> &str {
        self.metadata_str("name").unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace").filter(|ns| !ns.is_empty())
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".to_string(), Value::String(namespace.to_string()));
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("labels")
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map("annotations")
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.object
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.nested_map_mut("annotations")
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        self.nested_map_mut("labels")
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    /// True when the object is controlled by another object
    pub fn has_owner_references(&self) -> bool {
        self.object
            .get("metadata")
            .and_then(|m| m.get("ownerReferences"))
            .and_then(Value::as_array)
            .is_some_and(|refs| !refs.is_empty())
    }

    pub fn is_pending_deletion(&self) -> bool {
        self.metadata_str("deletionTimestamp").is_some()
    }

    /// Look up a nested field by JSON pointer, e.g. `/status/readyReplicas`
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.object.pointer(pointer)
    }

    pub fn key(&self) -> ResourceKey {
        let gvk = self.gvk();
        ResourceKey {
            group: gvk.group,
            kind: gvk.kind,
            namespace: self.namespace().unwrap_or_default().to_string(),
            name: self.name().to_string(),
        }
    }

    /// SHA256 over the canonical JSON encoding, hex encoded
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.object).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn as_value(&self) -> &Value {
        &self.object
    }

    pub fn into_value(self) -> Value {
        self.object
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.object.get(field).and_then(Value::as_str)
    }

    fn metadata_str(&self, field: &str) -> Option<&str> {
        self.object
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
    }

    fn string_map(&self, field: &str) -> BTreeMap<String, String> {
        self.object
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let root = ensure_object(&mut self.object);
        ensure_object(
            root.entry("metadata")
                .or_insert_with(|| Value::Object(Map::new())),
        )
    }

    fn nested_map_mut(&mut self, field: &str) -> &mut Map<String, Value> {
        ensure_object(
            self.metadata_mut()
                .entry(field)
                .or_insert_with(|| Value::Object(Map::new())),
        )
    }
}

/// Coerce a value into an object in place and borrow its map
fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

impl TryFrom<Value> for Manifest {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Manifest> for Value {
    fn from(manifest: Manifest) -> Self {
        manifest.object
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace() {
            Some(ns) => write!(f, "{}/{}/{}", self.kind(), ns, self.name()),
            None => write!(f, "{}/{}", self.kind(), self.name()),
        }
    }
}

/// Identity of a resource independent of its version
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.group, self.kind, self.namespace, self.name
        )
    }
}
