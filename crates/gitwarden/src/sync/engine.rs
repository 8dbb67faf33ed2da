//! Ordered, failure-isolating execution of a change set.
//!
//! Each direction is sent to the cluster as one multi-document batch first.
//! When the cluster rejects the batch every action is retried on its own so a
//! single bad resource cannot block the rest. Resources that failed in the
//! previous run skip the batch and go straight to individual execution.

use std::collections::HashSet;

use serde::Serialize;

use super::error::{ResourceError, SyncError};
use super::order::{apply_order, delete_order};
use super::planner::{ChangeSet, SyncAction};
use crate::cluster::{Transport, TransportError, Verb};
use crate::resource::ResourceId;

/// Document separator used when joining a batch payload.
const DOCUMENT_SEPARATOR: &[u8] = b"---\n";

/// How an action reached the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Batch,
    Single,
}

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub id: ResourceId,
    pub verb: Verb,
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one engine run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub errors: SyncError,
    pub applied: Vec<ResourceId>,
    pub deleted: Vec<ResourceId>,
    pub records: Vec<ActionRecord>,
}

impl SyncReport {
    fn succeeded(&mut self, action: &SyncAction, mode: ExecutionMode) {
        match action.verb {
            Verb::Apply => self.applied.push(action.id.clone()),
            Verb::Delete => self.deleted.push(action.id.clone()),
        }
        self.records.push(ActionRecord {
            id: action.id.clone(),
            verb: action.verb,
            mode,
            error: None,
        });
    }

    fn failed(&mut self, action: &SyncAction, message: String) {
        self.errors.insert(
            action.id.clone(),
            ResourceError::new(action.id.clone(), action.source.clone(), message.clone()),
        );
        self.records.push(ActionRecord {
            id: action.id.clone(),
            verb: action.verb,
            mode: ExecutionMode::Single,
            error: Some(message),
        });
    }
}

/// Partition of ordered actions into a batch and individually executed ones.
///
/// Entries keep their index in the ordered input so the two halves can be
/// merged back without losing rank order.
#[derive(Debug)]
pub struct BatchPlan<'a> {
    pub batch: Vec<(usize, &'a SyncAction)>,
    pub singletons: Vec<(usize, &'a SyncAction)>,
}

impl<'a> BatchPlan<'a> {
    /// Actions on resources in `carried` run individually; the rest are batched.
    pub fn plan(ordered: &'a [SyncAction], carried: &HashSet<ResourceId>) -> Self {
        let (singletons, batch) = ordered
            .iter()
            .enumerate()
            .partition(|(_, action)| carried.contains(&action.id));
        Self { batch, singletons }
    }

    /// Moves every batched action into the singletons.
    pub fn replan_after_batch_failure(self) -> Self {
        let mut singletons = self.singletons;
        singletons.extend(self.batch);
        singletons.sort_by_key(|(index, _)| *index);
        Self {
            batch: Vec::new(),
            singletons,
        }
    }
}

fn batch_payload(actions: &[(usize, &SyncAction)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (_, action) in actions {
        payload.extend_from_slice(DOCUMENT_SEPARATOR);
        payload.extend_from_slice(&action.payload);
        if !action.payload.ends_with(b"\n") {
            payload.push(b'\n');
        }
    }
    payload
}

/// Two-phase execution of one direction over an injected transport.
pub struct BatchStrategy<'t> {
    transport: &'t dyn Transport,
}

impl<'t> BatchStrategy<'t> {
    pub fn new(transport: &'t dyn Transport) -> Self {
        Self { transport }
    }

    /// Runs `ordered` (all sharing `verb`), recording outcomes in `report`.
    ///
    /// Only [`TransportError::Unavailable`] is returned; rejections are
    /// recorded per resource.
    pub async fn execute(
        &self,
        verb: Verb,
        ordered: &[SyncAction],
        carried: &HashSet<ResourceId>,
        report: &mut SyncReport,
    ) -> Result<(), TransportError> {
        if ordered.is_empty() {
            return Ok(());
        }

        let mut plan = BatchPlan::plan(ordered, carried);
        if !plan.batch.is_empty() {
            match self.attempt(verb, &plan.batch).await {
                Ok(()) => {
                    for (_, action) in &plan.batch {
                        report.succeeded(action, ExecutionMode::Batch);
                    }
                    plan.batch.clear();
                }
                Err(TransportError::Rejected { message, .. }) => {
                    tracing::warn!(
                        verb = %verb,
                        count = plan.batch.len(),
                        error = %message,
                        "batch rejected, retrying resources individually"
                    );
                    plan = plan.replan_after_batch_failure();
                }
                Err(e) => return Err(e),
            }
        }

        for (_, action) in plan.singletons {
            match self.transport.execute(verb, &action.payload).await {
                Ok(()) => report.succeeded(action, ExecutionMode::Single),
                Err(TransportError::Rejected { message, .. }) => {
                    tracing::warn!(resource = %action.id, verb = %verb, error = %message, "resource failed to sync");
                    report.failed(action, message);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn attempt(&self, verb: Verb, batch: &[(usize, &SyncAction)]) -> Result<(), TransportError> {
        tracing::debug!(verb = %verb, count = batch.len(), "executing batch");
        self.transport.execute(verb, &batch_payload(batch)).await
    }
}

/// Applies change sets in rank order and remembers which resources failed.
#[derive(Debug, Default)]
pub struct OrderedApplyEngine {
    carried: HashSet<ResourceId>,
}

impl OrderedApplyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources that failed in the last completed run.
    pub fn carried_errors(&self) -> &HashSet<ResourceId> {
        &self.carried
    }

    /// Runs all deletes, then all applies.
    ///
    /// An unreachable cluster aborts the run and keeps the previous carried set.
    pub async fn sync(
        &mut self,
        transport: &dyn Transport,
        changes: ChangeSet,
    ) -> Result<SyncReport, TransportError> {
        let strategy = BatchStrategy::new(transport);
        let mut report = SyncReport::default();

        let deletes = delete_order(changes.deletes);
        strategy
            .execute(Verb::Delete, &deletes, &self.carried, &mut report)
            .await?;

        let applies = apply_order(changes.applies);
        strategy
            .execute(Verb::Apply, &applies, &self.carried, &mut report)
            .await?;

        self.carried = report.errors.ids().cloned().collect();
        tracing::info!(
            applied = report.applied.len(),
            deleted = report.deleted.len(),
            failed = report.errors.len(),
            "sync run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Rejects any payload mentioning a bad name; records every call.
    #[derive(Default)]
    struct FakeTransport {
        bad: Vec<String>,
        unavailable: bool,
        calls: Mutex<Vec<(Verb, String)>>,
    }

    impl FakeTransport {
        fn rejecting(bad: &[&str]) -> Self {
            Self {
                bad: bad.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(Verb, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn execute(&self, verb: Verb, payload: &[u8]) -> Result<(), TransportError> {
            let text = String::from_utf8_lossy(payload).to_string();
            self.calls.lock().unwrap().push((verb, text.clone()));
            if self.unavailable {
                return Err(TransportError::Unavailable("connection refused".to_string()));
            }
            if self.bad.iter().any(|b| text.contains(&format!("name: {}\n", b))) {
                return Err(TransportError::Rejected {
                    verb,
                    message: "invalid".to_string(),
                });
            }
            Ok(())
        }
    }

    fn action(verb: Verb, kind: &str, name: &str) -> SyncAction {
        SyncAction {
            verb,
            id: ResourceId::new("default", kind, name),
            source: format!("{}.yaml", name),
            payload: format!("kind: {}\nmetadata:\n  name: {}\n", kind, name).into_bytes(),
        }
    }

    fn applies(names: &[&str]) -> ChangeSet {
        ChangeSet {
            deletes: Vec::new(),
            applies: names.iter().map(|n| action(Verb::Apply, "configmap", n)).collect(),
        }
    }

    #[test]
    fn test_batch_plan_partitions_carried() {
        let ordered = vec![
            action(Verb::Apply, "configmap", "a"),
            action(Verb::Apply, "configmap", "b"),
            action(Verb::Apply, "configmap", "c"),
        ];
        let carried: HashSet<ResourceId> = [ResourceId::new("default", "configmap", "b")].into();
        let plan = BatchPlan::plan(&ordered, &carried);
        assert_eq!(plan.batch.len(), 2);
        assert_eq!(plan.singletons.len(), 1);
        assert_eq!(plan.singletons[0].1.id.name(), "b");

        let replanned = plan.replan_after_batch_failure();
        assert!(replanned.batch.is_empty());
        let order: Vec<&str> = replanned.singletons.iter().map(|(_, a)| a.id.name()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_batch_payload_is_multi_document() {
        let ordered = vec![
            action(Verb::Apply, "configmap", "a"),
            action(Verb::Apply, "configmap", "b"),
        ];
        let plan = BatchPlan::plan(&ordered, &HashSet::new());
        let payload = String::from_utf8(batch_payload(&plan.batch)).unwrap();
        assert_eq!(payload.matches("---\n").count(), 2);
        assert!(payload.contains("name: a\n---\nkind: configmap"));
    }

    #[tokio::test]
    async fn test_clean_batch_is_one_call() {
        let transport = FakeTransport::default();
        let mut engine = OrderedApplyEngine::new();

        let report = engine.sync(&transport, applies(&["a", "b", "c"])).await.unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.applied.len(), 3);
        assert!(report.records.iter().all(|r| r.mode == ExecutionMode::Batch));
        assert_eq!(transport.calls().len(), 1);
        assert!(engine.carried_errors().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_batch_isolates_bad_resource() {
        let transport = FakeTransport::rejecting(&["bad"]);
        let mut engine = OrderedApplyEngine::new();

        let report = engine
            .sync(&transport, applies(&["a", "b", "bad", "c", "d"]))
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        let bad = ResourceId::new("default", "configmap", "bad");
        assert!(report.errors.contains(&bad));
        assert_eq!(report.errors.get(&bad).unwrap().source, "bad.yaml");
        assert_eq!(report.applied.len(), 4);
        // one batch plus five singles
        assert_eq!(transport.calls().len(), 6);
        assert!(engine.carried_errors().contains(&bad));
    }

    #[tokio::test]
    async fn test_carried_resource_skips_batch_next_run() {
        let transport = FakeTransport::rejecting(&["bad"]);
        let mut engine = OrderedApplyEngine::new();
        engine
            .sync(&transport, applies(&["a", "bad", "c"]))
            .await
            .unwrap();

        let second = FakeTransport::rejecting(&["bad"]);
        let report = engine
            .sync(&second, applies(&["a", "bad", "c"]))
            .await
            .unwrap();

        // The batch without the carried resource succeeds, the carried one runs alone.
        let calls = second.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].1.contains("name: bad\n"));
        assert!(calls[1].1.contains("name: bad\n"));
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_carried_set_is_replaced() {
        let mut engine = OrderedApplyEngine::new();
        engine
            .sync(&FakeTransport::rejecting(&["bad"]), applies(&["a", "bad"]))
            .await
            .unwrap();
        assert_eq!(engine.carried_errors().len(), 1);

        engine
            .sync(&FakeTransport::default(), applies(&["a", "bad"]))
            .await
            .unwrap();
        assert!(engine.carried_errors().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_aborts_and_keeps_carried() {
        let mut engine = OrderedApplyEngine::new();
        engine
            .sync(&FakeTransport::rejecting(&["bad"]), applies(&["a", "bad"]))
            .await
            .unwrap();

        let down = FakeTransport {
            unavailable: true,
            ..Default::default()
        };
        let result = engine.sync(&down, applies(&["a", "bad"])).await;
        assert!(matches!(result, Err(TransportError::Unavailable(_))));
        assert!(engine
            .carried_errors()
            .contains(&ResourceId::new("default", "configmap", "bad")));
    }

    #[tokio::test]
    async fn test_deletes_run_before_applies_in_reverse_rank() {
        let transport = FakeTransport::rejecting(&["gone-ns", "gone-deploy", "web"]);
        let mut engine = OrderedApplyEngine::new();
        let changes = ChangeSet {
            deletes: vec![
                action(Verb::Delete, "namespace", "gone-ns"),
                action(Verb::Delete, "deployment", "gone-deploy"),
            ],
            applies: vec![action(Verb::Apply, "deployment", "web")],
        };

        engine.sync(&transport, changes).await.unwrap();
        let singles: Vec<(Verb, String)> = transport
            .calls()
            .into_iter()
            .filter(|(_, payload)| payload.matches("kind:").count() == 1)
            .collect();
        assert_eq!(singles[0].0, Verb::Delete);
        assert!(singles[0].1.contains("gone-deploy"));
        assert!(singles[1].1.contains("gone-ns"));
        assert_eq!(singles.last().unwrap().0, Verb::Apply);
    }

    #[tokio::test]
    async fn test_empty_change_set_makes_no_calls() {
        let transport = FakeTransport::default();
        let mut engine = OrderedApplyEngine::new();
        let report = engine.sync(&transport, ChangeSet::default()).await.unwrap();
        assert!(report.records.is_empty());
        assert!(transport.calls().is_empty());
    }
}
