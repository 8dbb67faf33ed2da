//! Resource identity and the minimal manifest model the engine works with.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Namespace placeholder used for cluster-scoped resources.
pub const CLUSTER_SCOPE: &str = "<cluster>";

/// Annotation prefix for per-resource policies.
pub const POLICY_PREFIX: &str = "gitwarden.io/";

/// Policy that excludes a resource from reconciliation.
pub const POLICY_IGNORE: &str = "ignore";

/// Labels that mark an object as owned by the cluster addon manager.
const ADDON_SERVICE_LABEL: &str = "kubernetes.io/cluster-service";
const ADDON_MODE_LABEL: &str = "addonmanager.kubernetes.io/mode";

/// Label put on every applied object so the export can find it again.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "gitwarden";

/// Highest rank; used for every kind outside [`KnownKind`].
pub const DEFAULT_RANK: u8 = 4;

/// Kinds with a fixed place in the apply order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownKind {
    Namespace,
    CustomResourceDefinition,
    ServiceAccount,
    ClusterRole,
    Role,
    PersistentVolume,
    Service,
    ResourceQuota,
    LimitRange,
    Secret,
    ConfigMap,
    RoleBinding,
    ClusterRoleBinding,
    PersistentVolumeClaim,
    Ingress,
    DaemonSet,
    Deployment,
    ReplicationController,
    ReplicaSet,
    Job,
    CronJob,
    StatefulSet,
}

impl KnownKind {
    /// Returns all ranked kinds.
    pub fn all() -> &'static [KnownKind] {
        use KnownKind::*;
        &[
            Namespace,
            CustomResourceDefinition,
            ServiceAccount,
            ClusterRole,
            Role,
            PersistentVolume,
            Service,
            ResourceQuota,
            LimitRange,
            Secret,
            ConfigMap,
            RoleBinding,
            ClusterRoleBinding,
            PersistentVolumeClaim,
            Ingress,
            DaemonSet,
            Deployment,
            ReplicationController,
            ReplicaSet,
            Job,
            CronJob,
            StatefulSet,
        ]
    }

    /// Position in the apply order; lower ranks are applied first.
    pub fn rank(self) -> u8 {
        use KnownKind::*;
        match self {
            Namespace => 0,
            CustomResourceDefinition | ServiceAccount | ClusterRole | Role | PersistentVolume
            | Service => 1,
            ResourceQuota | LimitRange | Secret | ConfigMap | RoleBinding | ClusterRoleBinding
            | PersistentVolumeClaim | Ingress => 2,
            DaemonSet | Deployment | ReplicationController | ReplicaSet | Job | CronJob
            | StatefulSet => 3,
        }
    }

    /// Lower-case kind name as it appears in a resource ID.
    pub fn as_str(self) -> &'static str {
        use KnownKind::*;
        match self {
            Namespace => "namespace",
            CustomResourceDefinition => "customresourcedefinition",
            ServiceAccount => "serviceaccount",
            ClusterRole => "clusterrole",
            Role => "role",
            PersistentVolume => "persistentvolume",
            Service => "service",
            ResourceQuota => "resourcequota",
            LimitRange => "limitrange",
            Secret => "secret",
            ConfigMap => "configmap",
            RoleBinding => "rolebinding",
            ClusterRoleBinding => "clusterrolebinding",
            PersistentVolumeClaim => "persistentvolumeclaim",
            Ingress => "ingress",
            DaemonSet => "daemonset",
            Deployment => "deployment",
            ReplicationController => "replicationcontroller",
            ReplicaSet => "replicaset",
            Job => "job",
            CronJob => "cronjob",
            StatefulSet => "statefulset",
        }
    }

    /// Looks a kind up case-insensitively.
    pub fn from_kind(kind: &str) -> Option<Self> {
        let lower = kind.to_lowercase();
        Self::all().iter().copied().find(|k| k.as_str() == lower)
    }
}

impl fmt::Display for KnownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rank of an arbitrary kind name.
pub fn rank_of(kind: &str) -> u8 {
    KnownKind::from_kind(kind)
        .map(KnownKind::rank)
        .unwrap_or(DEFAULT_RANK)
}

/// Whether objects of `kind` live outside any namespace.
pub fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind.to_lowercase().as_str(),
        "namespace"
            | "customresourcedefinition"
            | "clusterrole"
            | "clusterrolebinding"
            | "persistentvolume"
            | "storageclass"
            | "priorityclass"
            | "node"
            | "apiservice"
            | "mutatingwebhookconfiguration"
            | "validatingwebhookconfiguration"
    )
}

/// Identity of a resource: `<namespace>:<kind>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    namespace: String,
    kind: String,
    name: String,
}

impl ResourceId {
    /// Creates an ID; the kind is lower-cased and an empty namespace becomes [`CLUSTER_SCOPE`].
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() {
                CLUSTER_SCOPE.to_string()
            } else {
                namespace
            },
            kind: kind.into().to_lowercase(),
            name: name.into(),
        }
    }

    /// Creates the ID of a cluster-scoped resource.
    pub fn cluster_scoped(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(CLUSTER_SCOPE, kind, name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace == CLUSTER_SCOPE
    }

    pub fn rank(&self) -> u8 {
        rank_of(&self.kind)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid resource ID '{}': missing ':'", s))?;
        let (kind, name) = rest
            .split_once('/')
            .ok_or_else(|| format!("Invalid resource ID '{}': missing '/'", s))?;
        if namespace.is_empty() || kind.is_empty() || name.is_empty() {
            return Err(format!("Invalid resource ID '{}': empty component", s));
        }
        Ok(Self::new(namespace, kind, name))
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A single manifest: identity, raw bytes, and the metadata the engine inspects.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    id: ResourceId,
    api_version: String,
    /// Kind as written in the document; the ID holds it lower-cased.
    kind: String,
    source: String,
    bytes: Vec<u8>,
    labels: BTreeMap<String, String>,
    policies: BTreeMap<String, String>,
}

impl Resource {
    pub fn new(
        id: ResourceId,
        api_version: impl Into<String>,
        source: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let kind = kind_display_name(&id.kind);
        Self {
            id,
            api_version: api_version.into(),
            kind,
            source: source.into(),
            bytes,
            labels: BTreeMap::new(),
            policies: BTreeMap::new(),
        }
    }

    /// Keeps the kind's original casing for documents sent to the cluster.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Keeps annotations carrying [`POLICY_PREFIX`] as policies, prefix stripped.
    pub fn with_annotations(mut self, annotations: &BTreeMap<String, String>) -> Self {
        self.policies = annotations
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(POLICY_PREFIX)
                    .map(|p| (p.to_string(), v.clone()))
            })
            .collect();
        self
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Where the resource came from; informational only.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn policies(&self) -> &BTreeMap<String, String> {
        &self.policies
    }

    pub fn policy(&self, name: &str) -> Option<&str> {
        self.policies.get(name).map(String::as_str)
    }

    /// Owned by the cluster addon manager, so never applied or deleted here.
    pub fn is_addon(&self) -> bool {
        self.labels
            .get(ADDON_SERVICE_LABEL)
            .is_some_and(|v| v == "true")
            || self
                .labels
                .get(ADDON_MODE_LABEL)
                .is_some_and(|v| v == "Reconcile" || v == "EnsureExists")
    }

    /// Opted out of reconciliation through the ignore policy.
    pub fn is_ignored(&self) -> bool {
        self.policy(POLICY_IGNORE).is_some_and(|v| v == "true")
    }

    /// Skipped in both directions.
    pub fn is_excluded(&self) -> bool {
        self.is_addon() || self.is_ignored()
    }

    /// Minimal document identifying this object, used as a delete payload.
    pub fn identity_document(&self) -> Vec<u8> {
        let mut doc = format!(
            "apiVersion: {}\nkind: {}\nmetadata:\n  name: {}\n",
            self.api_version, self.kind, self.id.name
        );
        if !self.id.is_cluster_scoped() {
            doc.push_str(&format!("  namespace: {}\n", self.id.namespace));
        }
        doc.into_bytes()
    }
}

/// Restores the canonical casing of a known kind for documents sent to the cluster.
fn kind_display_name(kind: &str) -> String {
    use KnownKind::*;
    let known = match KnownKind::from_kind(kind) {
        Some(k) => k,
        None => return kind.to_string(),
    };
    match known {
        Namespace => "Namespace",
        CustomResourceDefinition => "CustomResourceDefinition",
        ServiceAccount => "ServiceAccount",
        ClusterRole => "ClusterRole",
        Role => "Role",
        PersistentVolume => "PersistentVolume",
        Service => "Service",
        ResourceQuota => "ResourceQuota",
        LimitRange => "LimitRange",
        Secret => "Secret",
        ConfigMap => "ConfigMap",
        RoleBinding => "RoleBinding",
        ClusterRoleBinding => "ClusterRoleBinding",
        PersistentVolumeClaim => "PersistentVolumeClaim",
        Ingress => "Ingress",
        DaemonSet => "DaemonSet",
        Deployment => "Deployment",
        ReplicationController => "ReplicationController",
        ReplicaSet => "ReplicaSet",
        Job => "Job",
        CronJob => "CronJob",
        StatefulSet => "StatefulSet",
    }
    .to_string()
}

/// Resources keyed by ID. Iteration order is incidental.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
    resources: BTreeMap<ResourceId, Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource, handing it back if the ID is already present.
    pub fn try_insert(&mut self, resource: Resource) -> Result<(), Resource> {
        match self.resources.entry(resource.id.clone()) {
            btree_map::Entry::Occupied(_) => Err(resource),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(resource);
                Ok(())
            }
        }
    }

    /// Inserts a resource, replacing any previous one with the same ID.
    pub fn upsert(&mut self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }
}

impl FromIterator<Resource> for ResourceSet {
    /// Later duplicates replace earlier ones.
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut set = ResourceSet::new();
        for resource in iter {
            set.upsert(resource);
        }
        set
    }
}
