//! Minimal manifest loading: multi-document YAML files to identified resources.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::resource::{
    is_cluster_scoped, Resource, ResourceId, ResourceSet, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};
use crate::sync::ResourceError;

/// Namespace assumed for namespaced manifests that do not name one.
const DEFAULT_NAMESPACE: &str = "default";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Duplicate resource {id} in '{first}' and '{second}'")]
    Duplicate {
        id: ResourceId,
        first: String,
        second: String,
    },

    #[error("Failed to parse exported resources: {0}")]
    Export(String),
}

/// Resources parsed from a checkout, plus documents that could not be used.
#[derive(Debug, Default)]
pub struct LoadedManifests {
    pub resources: ResourceSet,
    pub errors: Vec<ResourceError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestHeader {
    #[serde(default)]
    api_version: String,
    kind: String,
    #[serde(default)]
    metadata: ManifestMeta,
    #[serde(default)]
    items: Vec<serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    #[serde(default)]
    owner_references: Vec<serde_yaml::Value>,
}

/// Loads every YAML manifest under `dirs`, which are relative to `base`.
///
/// Unparseable documents become resource errors; a resource ID declared twice
/// is a hard error.
pub fn load_manifests(base: &Path, dirs: &[PathBuf]) -> Result<LoadedManifests, ManifestError> {
    let roots: Vec<PathBuf> = if dirs.is_empty() {
        vec![base.to_path_buf()]
    } else {
        dirs.iter().map(|d| base.join(d)).collect()
    };

    let mut files = Vec::new();
    for root in &roots {
        if !root.exists() {
            return Err(ManifestError::DirectoryNotFound(root.clone()));
        }
        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_manifest_file(path) {
                continue;
            }

            // Skip anything under a hidden directory, including .git
            if let Ok(relative) = path.strip_prefix(base) {
                let hidden = relative.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
                });
                if hidden {
                    continue;
                }
            }
            files.push(path.to_path_buf());
        }
    }

    load_files(base, &files)
}

/// Loads specific manifest files, reporting their sources relative to `base`.
pub fn load_files(base: &Path, files: &[PathBuf]) -> Result<LoadedManifests, ManifestError> {
    let mut loaded = LoadedManifests::default();

    for path in files {
        let bytes = fs::read(path).map_err(|e| ManifestError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let source = path
            .strip_prefix(base)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        for parsed in parse_declared(&bytes, &source) {
            match parsed {
                Ok(resource) => {
                    if let Err(dup) = loaded.resources.try_insert(resource) {
                        let first = loaded
                            .resources
                            .get(dup.id())
                            .map(|r| r.source().to_string())
                            .unwrap_or_default();
                        return Err(ManifestError::Duplicate {
                            id: dup.id().clone(),
                            first,
                            second: source,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(source = %err.source, error = %err.error, "skipping unparseable manifest");
                    loaded.errors.push(err);
                }
            }
        }
    }

    Ok(loaded)
}

/// Whether a path looks like a YAML manifest.
pub fn is_manifest_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    ext == "yaml" || ext == "yml"
}

/// Parses a multi-document YAML stream. `List` documents are flattened.
pub fn parse_documents(bytes: &[u8], source: &str) -> Vec<Result<Resource, ResourceError>> {
    parse_stream(bytes, source, false)
}

/// Like [`parse_documents`], but every resource is labelled as managed by
/// gitwarden so the export selector finds it once applied.
pub fn parse_declared(bytes: &[u8], source: &str) -> Vec<Result<Resource, ResourceError>> {
    parse_stream(bytes, source, true)
}

fn parse_stream(bytes: &[u8], source: &str, managed: bool) -> Vec<Result<Resource, ResourceError>> {
    let mut out = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(bytes) {
        match serde_yaml::Value::deserialize(document) {
            Ok(serde_yaml::Value::Null) => {}
            Ok(value) => parse_value(value, source, managed, &mut out),
            Err(e) => {
                // A syntax error leaves the rest of the stream unreadable.
                out.push(Err(ResourceError::unidentified(source, e.to_string())));
                break;
            }
        }
    }
    out
}

fn parse_value(
    mut value: serde_yaml::Value,
    source: &str,
    managed: bool,
    out: &mut Vec<Result<Resource, ResourceError>>,
) {
    let header: ManifestHeader = match serde_yaml::from_value(value.clone()) {
        Ok(h) => h,
        Err(e) => {
            out.push(Err(ResourceError::unidentified(
                source,
                format!("not a resource: {}", e),
            )));
            return;
        }
    };

    if header.kind.ends_with("List") {
        for item in header.items {
            parse_value(item, source, managed, out);
        }
        return;
    }

    if header.metadata.name.is_empty() {
        out.push(Err(ResourceError::unidentified(
            source,
            format!("{} without metadata.name", header.kind),
        )));
        return;
    }

    let namespace = if is_cluster_scoped(&header.kind) {
        String::new()
    } else {
        header
            .metadata
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    };
    let id = ResourceId::new(namespace, &header.kind, &header.metadata.name);

    let mut labels = header.metadata.labels;
    if managed {
        mark_managed(&mut value);
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    }

    let bytes = match serde_yaml::to_string(&value) {
        Ok(s) => s.into_bytes(),
        Err(e) => {
            out.push(Err(ResourceError::new(id, source, e.to_string())));
            return;
        }
    };

    out.push(Ok(Resource::new(id, header.api_version, source, bytes)
        .with_kind(header.kind)
        .with_labels(labels)
        .with_annotations(&header.metadata.annotations)));
}

/// Sets the managed-by label in `metadata.labels`, creating the mapping if needed.
fn mark_managed(value: &mut serde_yaml::Value) {
    let Some(metadata) = value.get_mut("metadata").and_then(|m| m.as_mapping_mut()) else {
        return;
    };
    let labels = metadata
        .entry(serde_yaml::Value::from("labels"))
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    if !labels.is_mapping() {
        *labels = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    if let Some(labels) = labels.as_mapping_mut() {
        labels.insert(
            serde_yaml::Value::from(MANAGED_BY_LABEL),
            serde_yaml::Value::from(MANAGED_BY_VALUE),
        );
    }
}

/// Parses `kubectl get -o yaml` output into the observed resource set.
///
/// Objects owned by another object (replica sets of a deployment and the
/// like) are left out, and repeated IDs collapse into one entry.
pub fn parse_exported(bytes: &[u8]) -> Result<ResourceSet, ManifestError> {
    let mut set = ResourceSet::new();
    for document in serde_yaml::Deserializer::from_slice(bytes) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| ManifestError::Export(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        collect_exported(value, &mut set)?;
    }
    Ok(set)
}

fn collect_exported(value: serde_yaml::Value, set: &mut ResourceSet) -> Result<(), ManifestError> {
    let header: ManifestHeader =
        serde_yaml::from_value(value.clone()).map_err(|e| ManifestError::Export(e.to_string()))?;
    if header.kind.ends_with("List") {
        for item in header.items {
            collect_exported(item, set)?;
        }
        return Ok(());
    }
    if !header.metadata.owner_references.is_empty() {
        return Ok(());
    }

    let mut parsed = Vec::new();
    parse_value(value, "cluster", false, &mut parsed);
    for resource in parsed {
        let resource = resource.map_err(|e| ManifestError::Export(e.to_string()))?;
        set.upsert(resource);
    }
    Ok(())
}
