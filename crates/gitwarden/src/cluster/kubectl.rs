//! kubectl-backed cluster access.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{
    AnnotatedObject, AnnotationPatch, AnnotationStore, Cluster, ClusterError, ObjectRef,
    PatchOutcome, Transport, TransportError, Verb,
};
use crate::config::ClusterSettings;

/// Runs kubectl with the configured kubeconfig and context.
pub struct Kubectl {
    settings: ClusterSettings,
    timeout: Duration,
}

impl Kubectl {
    /// `timeout` bounds every individual kubectl invocation.
    pub fn new(settings: ClusterSettings, timeout: Duration) -> Self {
        Self { settings, timeout }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.settings.kubectl);
        if let Some(kubeconfig) = &self.settings.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.settings.context {
            cmd.arg("--context").arg(context);
        }
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, ClusterError> {
        let mut cmd = self.command(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(ClusterError::Spawn)?;
        let pipe = child.stdin.take();
        let payload = stdin.map(<[u8]>::to_vec);

        let feed = async move {
            if let (Some(mut pipe), Some(data)) = (pipe, payload) {
                pipe.write_all(&data).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let run = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            if let Err(e) = fed {
                tracing::debug!(error = %e, "kubectl closed stdin early");
            }
            output
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => output.map_err(ClusterError::Spawn),
            Err(_) => Err(ClusterError::Timeout {
                command: args.first().copied().unwrap_or_default().to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }

    fn verb_args(verb: Verb) -> &'static [&'static str] {
        match verb {
            Verb::Apply => &["apply", "-f", "-"],
            Verb::Delete => &["delete", "--ignore-not-found", "-f", "-"],
        }
    }
}

/// Separates "the cluster is unreachable" from "the cluster said no".
pub fn classify_kubectl_error(verb: Verb, stderr: &str) -> TransportError {
    let lower = stderr.to_lowercase();
    if lower.contains("unable to connect to the server")
        || lower.contains("connection refused")
        || lower.contains("i/o timeout")
        || lower.contains("no such host")
        || lower.contains("tls handshake timeout")
        || lower.contains("the server is currently unable to handle the request")
        || lower.contains("couldn't get current server api group list")
    {
        return TransportError::Unavailable(stderr.trim().to_string());
    }
    TransportError::Rejected {
        verb,
        message: stderr.trim().to_string(),
    }
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl Transport for Kubectl {
    async fn execute(&self, verb: Verb, payload: &[u8]) -> Result<(), TransportError> {
        let output = self
            .run(Self::verb_args(verb), Some(payload))
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_kubectl_error(verb, &stderr_text(&output)))
        }
    }
}

#[async_trait]
impl Cluster for Kubectl {
    async fn export(&self) -> Result<Vec<u8>, ClusterError> {
        let export = &self.settings.export;
        let kinds = export.kinds.join(",");
        let mut base: Vec<&str> = vec!["get", &kinds, "-o", "yaml"];
        if let Some(selector) = &export.selector {
            base.push("-l");
            base.push(selector);
        }

        if export.namespaces.is_empty() {
            let mut args = base.clone();
            args.push("--all-namespaces");
            let output = self.run(&args, None).await?;
            return expect_success("get", output).map(|o| o.stdout);
        }

        let mut combined = Vec::new();
        for namespace in &export.namespaces {
            let mut args = base.clone();
            args.push("-n");
            args.push(namespace);
            let output = expect_success("get", self.run(&args, None).await?)?;
            combined.extend_from_slice(b"---\n");
            combined.extend_from_slice(&output.stdout);
        }
        Ok(combined)
    }

    fn transport(&self) -> &dyn Transport {
        self
    }
}

fn expect_success(command: &str, output: Output) -> Result<Output, ClusterError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(ClusterError::Command {
            command: command.to_string(),
            message: stderr_text(&output),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ObjectJson {
    #[serde(default)]
    metadata: ObjectMetaJson,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetaJson {
    #[serde(default)]
    resource_version: String,
    #[serde(default)]
    annotations: std::collections::BTreeMap<String, String>,
}

#[async_trait]
impl AnnotationStore for Kubectl {
    async fn read_annotations(&self, target: &ObjectRef) -> Result<Option<AnnotatedObject>, ClusterError> {
        let output = self
            .run(
                &["get", &target.kind, &target.name, "-n", &target.namespace, "-o", "json"],
                None,
            )
            .await?;
        if !output.status.success() {
            let stderr = stderr_text(&output);
            if stderr.contains("NotFound") || stderr.to_lowercase().contains("not found") {
                return Ok(None);
            }
            return Err(ClusterError::Command {
                command: "get".to_string(),
                message: stderr,
            });
        }

        let object: ObjectJson = serde_json::from_slice(&output.stdout)
            .map_err(|e| ClusterError::Output(e.to_string()))?;
        Ok(Some(AnnotatedObject {
            resource_version: object.metadata.resource_version,
            annotations: object.metadata.annotations,
        }))
    }

    async fn patch_annotations(
        &self,
        target: &ObjectRef,
        patch: &AnnotationPatch,
    ) -> Result<PatchOutcome, ClusterError> {
        let body = patch.to_json().to_string();
        let output = self
            .run(
                &[
                    "patch",
                    &target.kind,
                    &target.name,
                    "-n",
                    &target.namespace,
                    "--type",
                    "merge",
                    "-p",
                    &body,
                ],
                None,
            )
            .await?;
        if output.status.success() {
            return Ok(PatchOutcome::Applied);
        }
        let stderr = stderr_text(&output);
        if stderr.contains("Conflict") || stderr.contains("the object has been modified") {
            return Ok(PatchOutcome::Conflict);
        }
        Err(ClusterError::Command {
            command: "patch".to_string(),
            message: stderr,
        })
    }
}
