//! Daemon settings, loaded from a single YAML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resource::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Annotation that carries the sync marker when the annotation backend is used.
pub const SYNC_POINT_ANNOTATION: &str = "gitwarden.io/sync-point";

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Directory holding the git mirror and per-cycle checkouts.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Git repository settings.
    pub git: GitSettings,

    /// Reconciliation loop settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Cluster access settings.
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Job dispatch settings.
    #[serde(default)]
    pub jobs: JobSettings,
}

impl Settings {
    /// Loads and validates settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks values that serde defaults cannot guard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "git.url must not be empty".to_string(),
            });
        }
        if self.git.branch.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "git.branch must not be empty".to_string(),
            });
        }
        if self.sync.interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "sync.intervalSecs must be greater than zero".to_string(),
            });
        }
        if let SyncStateSettings::Annotation { name, .. } = &self.sync.state {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation {
                    message: "sync.state.name is required for the annotation backend"
                        .to_string(),
                });
            }
        }
        Ok(())
    }

    /// Ensures the work directory exists.
    pub fn prepare_work_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.work_dir).map_err(|e| ConfigError::WorkDir {
            path: self.work_dir.clone(),
            source: e,
        })
    }
}

fn default_work_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("gitwarden"))
        .unwrap_or_else(|| PathBuf::from(".gitwarden"))
}

/// Git repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSettings {
    /// Upstream repository URL.
    pub url: String,

    /// Branch to reconcile from.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Manifest directories relative to the repository root. Empty means the root.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Tag used as the sync marker by the git-tag backend.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    /// Notes ref that jobs annotate their commits under.
    #[serde(default = "default_notes_ref")]
    pub notes_ref: String,

    /// Git user name for tags and commits.
    #[serde(default = "default_user_name")]
    pub user_name: String,

    /// Git user email for tags and commits.
    #[serde(default = "default_user_email")]
    pub user_email: String,

    /// Deadline for a single git command, in seconds.
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,

    /// Authentication settings.
    #[serde(default)]
    pub auth: GitAuthSettings,
}

impl GitSettings {
    /// Creates settings for `url` with every other field defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: default_branch(),
            paths: Vec::new(),
            sync_tag: default_sync_tag(),
            notes_ref: default_notes_ref(),
            user_name: default_user_name(),
            user_email: default_user_email(),
            timeout_secs: default_git_timeout(),
            auth: GitAuthSettings::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_sync_tag() -> String {
    "gitwarden-sync".to_string()
}

fn default_notes_ref() -> String {
    "gitwarden".to_string()
}

fn default_user_name() -> String {
    "Gitwarden".to_string()
}

fn default_user_email() -> String {
    "gitwarden@localhost".to_string()
}

fn default_git_timeout() -> u64 {
    20
}

/// Git authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuthSettings {
    /// Authentication type: none, token, or ssh-key.
    #[serde(default, rename = "type")]
    pub auth_type: GitAuthType,

    /// Environment variable containing the token.
    #[serde(default)]
    pub token_env_var: String,

    /// Path to a file containing the token (for mounted secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,

    /// Path to SSH key file.
    #[serde(default)]
    pub ssh_key_path: String,
}

/// Git authentication type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitAuthType {
    #[default]
    None,
    Token,
    SshKey,
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Seconds between scheduled cycles.
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Deadline for a single cluster command, in seconds.
    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,

    /// Where the sync marker lives.
    #[serde(default)]
    pub state: SyncStateSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            timeout_secs: default_sync_timeout(),
            state: SyncStateSettings::default(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_sync_interval() -> u64 {
    300 // 5 minutes
}

fn default_sync_timeout() -> u64 {
    120
}

/// Sync marker backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum SyncStateSettings {
    /// Annotated tag in the upstream repository.
    #[default]
    GitTag,
    /// Annotation on a cluster object.
    Annotation {
        namespace: String,
        #[serde(default = "default_marker_kind")]
        kind: String,
        name: String,
    },
}

fn default_marker_kind() -> String {
    "secret".to_string()
}

/// Cluster access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSettings {
    /// Path to the kubectl binary.
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    /// Explicit kubeconfig; kubectl's own discovery applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// What the export step reads back from the cluster.
    #[serde(default)]
    pub export: ExportSettings,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            kubeconfig: None,
            context: None,
            export: ExportSettings::default(),
        }
    }
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

/// Selection of cluster objects considered observed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    /// Resource types passed to `kubectl get`.
    #[serde(default = "default_export_kinds")]
    pub kinds: Vec<String>,

    /// Namespaces to export. Empty means all namespaces.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Label selector restricting the export to managed objects.
    #[serde(default = "default_export_selector")]
    pub selector: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            kinds: default_export_kinds(),
            namespaces: Vec::new(),
            selector: default_export_selector(),
        }
    }
}

fn default_export_kinds() -> Vec<String> {
    [
        "namespaces",
        "serviceaccounts",
        "services",
        "configmaps",
        "secrets",
        "persistentvolumeclaims",
        "ingresses",
        "deployments",
        "statefulsets",
        "daemonsets",
        "cronjobs",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_export_selector() -> Option<String> {
    Some(format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE))
}

/// Job dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    /// Number of finished job statuses kept for lookup.
    #[serde(default = "default_status_cache_size")]
    pub status_cache_size: usize,

    /// Deadline for a single job, in seconds.
    #[serde(default = "default_job_timeout")]
    pub timeout_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            status_cache_size: default_status_cache_size(),
            timeout_secs: default_job_timeout(),
        }
    }
}

impl JobSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_status_cache_size() -> usize {
    100
}

fn default_job_timeout() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_settings_use_defaults() {
        let yaml = r#"
git:
  url: https://example.com/ops.git
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.git.branch, "main");
        assert_eq!(settings.git.sync_tag, "gitwarden-sync");
        assert_eq!(settings.git.notes_ref, "gitwarden");
        assert_eq!(settings.git.timeout_secs, 20);
        assert_eq!(settings.sync.interval_secs, 300);
        assert_eq!(settings.sync.state, SyncStateSettings::GitTag);
        assert_eq!(settings.jobs.status_cache_size, 100);
        assert_eq!(settings.cluster.kubectl, "kubectl");
        assert!(settings.cluster.export.kinds.contains(&"deployments".to_string()));
        settings.validate().unwrap();
    }

    #[test]
    fn test_annotation_backend() {
        let yaml = r#"
git:
  url: git@example.com:ops.git
  paths: [clusters/prod]
  auth:
    type: ssh-key
    sshKeyPath: /keys/id_ed25519
sync:
  intervalSecs: 60
  state:
    backend: annotation
    namespace: gitwarden
    name: gitwarden-git-deploy
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.git.paths, vec!["clusters/prod".to_string()]);
        assert_eq!(settings.git.auth.auth_type, GitAuthType::SshKey);
        assert_eq!(
            settings.sync.state,
            SyncStateSettings::Annotation {
                namespace: "gitwarden".to_string(),
                kind: "secret".to_string(),
                name: "gitwarden-git-deploy".to_string(),
            }
        );
        assert_eq!(settings.sync.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let settings = Settings {
            work_dir: PathBuf::from("/tmp"),
            git: GitSettings::new(""),
            sync: SyncSettings::default(),
            cluster: ClusterSettings::default(),
            jobs: JobSettings::default(),
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut settings = Settings {
            work_dir: PathBuf::from("/tmp"),
            git: GitSettings::new("https://example.com/ops.git"),
            sync: SyncSettings::default(),
            cluster: ClusterSettings::default(),
            jobs: JobSettings::default(),
        };
        settings.sync.interval_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gitwarden.yaml");
        fs::write(
            &path,
            "workDir: /var/lib/gitwarden\ngit:\n  url: https://example.com/ops.git\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.work_dir, PathBuf::from("/var/lib/gitwarden"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Settings::load(Path::new("/nonexistent/gitwarden.yaml"));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gitwarden.yaml");
        fs::write(&path, "git: [not, a, map").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::ParseYaml { .. })
        ));
    }
}
