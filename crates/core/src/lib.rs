//! Lookout core types shared by the transport, store and informer crates.

#![forbid(unsafe_code)]

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A watched resource kind: its name plus the URL path template it is
/// served under. The template may carry a `{namespace}` placeholder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceKind {
    pub name: String,
    pub path_template: String,
}

impl ResourceKind {
    pub fn new(name: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self { name: name.into(), path_template: path_template.into() }
    }

    /// Resolve the path template against a namespace scope. Templates
    /// without the placeholder (cluster-scoped kinds) pass through.
    pub fn path_for(&self, namespace: &str) -> String {
        self.path_template.replace("{namespace}", namespace)
    }
}

/// Wire-level change classification. Unrecognized types map to `Unknown`
/// and are applied as no-ops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    Unknown,
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ADDED" => Self::Added,
            "MODIFIED" => Self::Modified,
            "DELETED" => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

/// One decoded change for a single object of one kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: EventKind,
    pub name: String,
    /// Full document payload; present for Added/Modified.
    pub object: Option<serde_json::Value>,
}

/// Inner mapping for one kind: object name -> full document.
pub type KindState = FxHashMap<String, serde_json::Value>;

/// The whole cached view: kind name -> objects of that kind.
pub type ClusterState = FxHashMap<String, KindState>;

/// Body shape of a list response: items plus the resourceVersion the
/// follow-up watch resumes from.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMeta {
    #[serde(rename = "resourceVersion")]
    pub resource_version: Option<String>,
}

/// Object identity is the declared `metadata.name` field.
pub fn object_name(doc: &serde_json::Value) -> Option<&str> {
    doc.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str())
}
