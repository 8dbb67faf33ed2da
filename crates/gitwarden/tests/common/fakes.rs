//! In-memory stand-ins for the external collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use gitwarden::cluster::{Cluster, ClusterError, Transport, TransportError, Verb};
use gitwarden::events::{Event, EventError, EventSink, EventType};
use gitwarden::git::{Checkout, Commit, GitError, GitSource};
use gitwarden::manifest::parse_documents;
use gitwarden::state::{MarkerUpdate, StateError, SyncStateProvider};
use gitwarden::ResourceId;

// ─── Git ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct History {
    commits: Vec<Commit>,
    /// Tree of every revision: path -> content.
    trees: HashMap<String, BTreeMap<String, String>>,
    /// Paths touched by every revision.
    touched: HashMap<String, Vec<String>>,
    notes: HashMap<String, String>,
}

/// Linear history held in memory; checkouts are written under `root`.
pub struct FakeGit {
    root: PathBuf,
    history: Mutex<History>,
    checkouts: AtomicUsize,
    pub refreshes: AtomicUsize,
}

impl FakeGit {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            history: Mutex::new(History::default()),
            checkouts: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Adds a commit on top of the branch. `None` content deletes the file.
    pub fn commit(&self, message: &str, files: &[(&str, Option<&str>)]) -> String {
        let mut history = self.history.lock().unwrap();
        let mut tree = history
            .commits
            .last()
            .and_then(|c| history.trees.get(&c.revision))
            .cloned()
            .unwrap_or_default();
        for (path, content) in files {
            match content {
                Some(content) => tree.insert(path.to_string(), content.to_string()),
                None => tree.remove(*path),
            };
        }

        let revision = format!("{:040x}", history.commits.len() + 1);
        history.trees.insert(revision.clone(), tree);
        history.touched.insert(
            revision.clone(),
            files.iter().map(|(p, _)| p.to_string()).collect(),
        );
        history.commits.push(Commit::new(revision.clone(), message));
        revision
    }

    pub fn add_note(&self, revision: &str, note: &str) {
        self.history
            .lock()
            .unwrap()
            .notes
            .insert(revision.to_string(), note.to_string());
    }

    fn position(history: &History, revision: &str) -> Result<usize, GitError> {
        history
            .commits
            .iter()
            .position(|c| c.revision == revision)
            .ok_or_else(|| GitError::UnknownRevision(revision.to_string()))
    }

    fn under(path: &str, paths: &[String]) -> bool {
        paths.is_empty() || paths.iter().any(|p| path.starts_with(p.trim_matches('/')))
    }
}

#[async_trait]
impl GitSource for FakeGit {
    async fn refresh(&self) -> gitwarden::git::Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn head_revision(&self) -> gitwarden::git::Result<String> {
        self.history
            .lock()
            .unwrap()
            .commits
            .last()
            .map(|c| c.revision.clone())
            .ok_or_else(|| GitError::UnknownRevision("branch 'main'".to_string()))
    }

    async fn checkout(&self, revision: &str) -> gitwarden::git::Result<Checkout> {
        let tree = {
            let history = self.history.lock().unwrap();
            history
                .trees
                .get(revision)
                .cloned()
                .ok_or_else(|| GitError::UnknownRevision(revision.to_string()))?
        };
        let n = self.checkouts.fetch_add(1, Ordering::SeqCst);
        let dir = self.root.join(format!("checkout-{}", n));
        for (path, content) in &tree {
            let file = dir.join(path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&file, content).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        Ok(Checkout::borrowed(dir, revision))
    }

    async fn commits_between(&self, old: &str, new: &str, paths: &[String]) -> gitwarden::git::Result<Vec<Commit>> {
        let history = self.history.lock().unwrap();
        let from = Self::position(&history, old)? + 1;
        let to = Self::position(&history, new)?;
        if from > to {
            return Ok(Vec::new());
        }
        Ok(history.commits[from..=to]
            .iter()
            .filter(|c| history.touched[&c.revision].iter().any(|p| Self::under(p, paths)))
            .cloned()
            .collect())
    }

    async fn commits_before(&self, new: &str, paths: &[String]) -> gitwarden::git::Result<Vec<Commit>> {
        let history = self.history.lock().unwrap();
        let to = Self::position(&history, new)?;
        Ok(history.commits[..=to]
            .iter()
            .filter(|c| history.touched[&c.revision].iter().any(|p| Self::under(p, paths)))
            .cloned()
            .collect())
    }

    async fn changed_files(&self, since: &str, to: &str, paths: &[String]) -> gitwarden::git::Result<Vec<String>> {
        let history = self.history.lock().unwrap();
        let from = Self::position(&history, since)? + 1;
        let to = Self::position(&history, to)?;
        let mut files: Vec<String> = Vec::new();
        for commit in history.commits.iter().take(to + 1).skip(from) {
            for path in &history.touched[&commit.revision] {
                if Self::under(path, paths) && !files.contains(path) {
                    files.push(path.clone());
                }
            }
        }
        Ok(files)
    }

    async fn note_revisions(&self) -> gitwarden::git::Result<HashSet<String>> {
        Ok(self.history.lock().unwrap().notes.keys().cloned().collect())
    }

    async fn get_note(&self, revision: &str) -> gitwarden::git::Result<Option<String>> {
        Ok(self.history.lock().unwrap().notes.get(revision).cloned())
    }
}

// ─── Cluster ────────────────────────────────────────────────────────────────

/// Object store that rejects whole payloads mentioning a failing name, the
/// way kubectl rejects a batch with one invalid document.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ResourceId, String>>,
    failing: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    calls: Mutex<Vec<(Verb, Vec<ResourceId>)>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places an object in the cluster without going through the transport.
    pub fn seed(&self, yaml: &str) {
        let mut objects = self.objects.lock().unwrap();
        for resource in parse_documents(yaml.as_bytes(), "seed") {
            let resource = resource.unwrap();
            objects.insert(
                resource.id().clone(),
                String::from_utf8(resource.bytes().to_vec()).unwrap(),
            );
        }
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.failing.lock().unwrap().remove(name);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn ids(&self) -> Vec<ResourceId> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        let id: ResourceId = id.parse().unwrap();
        self.objects.lock().unwrap().contains_key(&id)
    }

    pub fn object(&self, id: &str) -> Option<String> {
        let id: ResourceId = id.parse().unwrap();
        self.objects.lock().unwrap().get(&id).cloned()
    }

    /// Edits an object behind gitwarden's back.
    pub fn drift(&self, id: &str, yaml: &str) {
        let id: ResourceId = id.parse().unwrap();
        self.objects.lock().unwrap().insert(id, yaml.to_string());
    }

    pub fn calls(&self) -> Vec<(Verb, Vec<ResourceId>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for FakeCluster {
    async fn execute(&self, verb: Verb, payload: &[u8]) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "Unable to connect to the server".to_string(),
            ));
        }
        let resources: Vec<_> = parse_documents(payload, "stdin")
            .into_iter()
            .map(|r| r.expect("payload documents parse"))
            .collect();
        self.calls
            .lock()
            .unwrap()
            .push((verb, resources.iter().map(|r| r.id().clone()).collect()));

        let failing = self.failing.lock().unwrap();
        if let Some(bad) = resources.iter().find(|r| failing.contains(r.id().name())) {
            return Err(TransportError::Rejected {
                verb,
                message: format!("admission webhook denied {}", bad.id()),
            });
        }

        let mut objects = self.objects.lock().unwrap();
        for resource in resources {
            match verb {
                Verb::Apply => {
                    objects.insert(
                        resource.id().clone(),
                        String::from_utf8_lossy(resource.bytes()).into_owned(),
                    );
                }
                Verb::Delete => {
                    objects.remove(resource.id());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn export(&self) -> Result<Vec<u8>, ClusterError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClusterError::Command {
                command: "get".to_string(),
                message: "Unable to connect to the server".to_string(),
            });
        }
        let objects = self.objects.lock().unwrap();
        let mut out = String::new();
        for yaml in objects.values() {
            out.push_str("---\n");
            out.push_str(yaml);
        }
        Ok(out.into_bytes())
    }

    fn transport(&self) -> &dyn Transport {
        self
    }
}

// ─── Sync marker ────────────────────────────────────────────────────────────

/// Marker held in memory, with a hook to simulate a concurrent writer.
#[derive(Default)]
pub struct MemoryState {
    revision: Mutex<Option<String>>,
    interloper: Mutex<Option<String>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> Option<String> {
        self.revision.lock().unwrap().clone()
    }

    pub fn set(&self, revision: &str) {
        *self.revision.lock().unwrap() = Some(revision.to_string());
    }

    /// The next update finds the marker already moved to `revision`.
    pub fn race_with(&self, revision: &str) {
        *self.interloper.lock().unwrap() = Some(revision.to_string());
    }
}

#[async_trait]
impl SyncStateProvider for MemoryState {
    async fn get_revision(&self) -> Result<Option<String>, StateError> {
        Ok(self.revision())
    }

    async fn update_marker(&self, expected_old: Option<&str>, new: &str) -> Result<MarkerUpdate, StateError> {
        if let Some(other) = self.interloper.lock().unwrap().take() {
            *self.revision.lock().unwrap() = Some(other);
        }
        let mut current = self.revision.lock().unwrap();
        if current.as_deref() != expected_old {
            return Ok(MarkerUpdate::LostRace {
                observed: current.clone(),
            });
        }
        *current = Some(new.to_string());
        Ok(MarkerUpdate::Moved)
    }

    async fn delete_marker(&self) -> Result<(), StateError> {
        *self.revision.lock().unwrap() = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Keeps every logged event in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn log_event(&self, event: Event) -> Result<(), EventError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
