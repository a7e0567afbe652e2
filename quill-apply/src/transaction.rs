use crate::audit::AuditAction;
use crate::audit::AuditEvent;
use crate::audit::AuditLog;
use crate::config::ApplyConfig;
use crate::error::ErrorCategory;
use crate::hash::normalize_line_endings;
use crate::hash::normalized_sha256;
use crate::ops::ExpectedFileResult;
use crate::ops::FileBaseSignature;
use crate::ops::FileEditOperation;
use crate::snapshot::SnapshotFile;
use crate::snapshot::SnapshotOutcome;
use crate::snapshot::SnapshotStore;
use crate::stash::AutoStash;
use crate::text_edits::apply_text_edits;
use quill_workspace::BufferRegistry;
use quill_workspace::FileSystemService;
use quill_workspace::StashRef;
use quill_workspace::VcsService;
use quill_workspace::WorkspaceContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub operation_id: Option<String>,
}

/// Structured result of one transaction. Failures never surface as
/// `Err`; `error_category` classifies them and the rollback fields
/// report what recovery was attempted.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub success: bool,
    pub applied_files: Vec<String>,
    pub failed_file: Option<String>,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub rollback_attempted: bool,
    pub rollback_success: Option<bool>,
}

impl TransactionOutcome {
    fn ok(applied_files: Vec<String>) -> Self {
        Self {
            success: true,
            applied_files,
            failed_file: None,
            error: None,
            error_category: None,
            rollback_attempted: false,
            rollback_success: None,
        }
    }
}

struct Failure {
    category: ErrorCategory,
    message: String,
    failed_file: Option<String>,
}

impl Failure {
    fn new(category: ErrorCategory, message: impl Into<String>, file: Option<String>) -> Self {
        Self {
            category,
            message: message.into(),
            failed_file: file,
        }
    }
}

struct PlannedOp {
    op: FileEditOperation,
    path: PathBuf,
    display: String,
}

struct CapturedBase {
    /// `None` when the file was absent before the transaction.
    content: Option<String>,
    is_dirty: bool,
    hash: Option<String>,
}

/// Post-apply target for one operation: the content to write, or `None`
/// for deletes where the path must be gone afterwards.
struct ExpectedState {
    post_content: Option<String>,
    expected_hash: Option<String>,
}

/// Atomic multi-file mutation engine. One instance per workspace; the
/// engine itself is stateless across transactions apart from the
/// snapshot store, so concurrent transactions on disjoint files
/// interleave freely while overlapping ones are caught by the base
/// re-check.
pub struct ApplyEngine {
    workspace: WorkspaceContext,
    fs: Arc<dyn FileSystemService>,
    buffers: Arc<dyn BufferRegistry>,
    snapshots: SnapshotStore,
    stash: AutoStash,
    audit: Arc<AuditLog>,
}

impl ApplyEngine {
    pub fn new(
        workspace: WorkspaceContext,
        fs: Arc<dyn FileSystemService>,
        buffers: Arc<dyn BufferRegistry>,
        vcs: Arc<dyn VcsService>,
        audit: Arc<AuditLog>,
        config: ApplyConfig,
    ) -> Self {
        let snapshots = SnapshotStore::new(
            config.snapshot_enabled,
            config.snapshot_max_bytes,
            fs.clone(),
            buffers.clone(),
        );
        let stash = AutoStash::new(config.git_auto_stash_mode, vcs);
        Self {
            workspace,
            fs,
            buffers,
            snapshots,
            stash,
            audit,
        }
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Apply a batch of operations as one atomic transaction. The engine
    /// is not cancellable mid-transaction; callers wait for completion.
    pub async fn apply_transaction(
        &self,
        ops: Vec<FileEditOperation>,
        opts: ApplyOptions,
    ) -> TransactionOutcome {
        let operation_id = opts
            .operation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Path safety and shape validation. Nothing executes when any
        // operation is rejected here.
        let mut planned = Vec::with_capacity(ops.len());
        for op in ops {
            if let FileEditOperation::Edit {
                uri,
                content,
                text_edits,
            } = &op
                && content.is_some() == text_edits.is_some()
            {
                let failure = Failure::new(
                    ErrorCategory::WriteFailure,
                    "edit must carry exactly one of content or text_edits",
                    Some(uri.clone()),
                );
                return self.fail_without_writes(failure, &operation_id).await;
            }
            let path = match self.workspace.resolve(op.uri()) {
                Ok(path) => path,
                Err(err) => {
                    let failure = Failure::new(
                        ErrorCategory::WriteFailure,
                        err.to_string(),
                        Some(op.uri().to_string()),
                    );
                    return self.fail_without_writes(failure, &operation_id).await;
                }
            };
            let display = self.workspace.relative_display(&path);
            planned.push(PlannedOp { op, path, display });
        }

        // Deterministic write ordering: identical inputs produce
        // identical write sequences and identical final hashes.
        planned.sort_by(|a, b| a.path.cmp(&b.path));
        for pair in planned.windows(2) {
            if pair[0].path == pair[1].path {
                let failure = Failure::new(
                    ErrorCategory::WriteFailure,
                    "transaction targets the same file twice",
                    Some(pair[0].display.clone()),
                );
                return self.fail_without_writes(failure, &operation_id).await;
            }
        }

        // Base capture, editor buffer first.
        let mut bases = Vec::with_capacity(planned.len());
        let mut base_signatures: Vec<FileBaseSignature> = Vec::new();
        for item in &planned {
            let (content, is_dirty) = self.source(&item.path).await;
            if content.is_none()
                && matches!(item.op, FileEditOperation::Edit { .. })
            {
                let failure = Failure::new(
                    ErrorCategory::WriteFailure,
                    "edit target does not exist",
                    Some(item.display.clone()),
                );
                return self.fail_without_writes(failure, &operation_id).await;
            }
            let hash = content.as_deref().map(normalized_sha256);
            if let Some(hash) = &hash {
                base_signatures.push(FileBaseSignature {
                    uri: item.display.clone(),
                    content_hash: hash.clone(),
                    is_dirty,
                });
            }
            bases.push(CapturedBase {
                content,
                is_dirty,
                hash,
            });
        }

        // Expected post-apply state, synthesized before anything is
        // written so verification compares against a fixed target.
        let mut expected = Vec::with_capacity(planned.len());
        let mut expected_results: Vec<ExpectedFileResult> = Vec::new();
        for (item, base) in planned.iter().zip(&bases) {
            let post_content = match &item.op {
                FileEditOperation::Create { content, .. } => Some(content.clone()),
                FileEditOperation::Edit {
                    content: Some(content),
                    ..
                } => Some(content.clone()),
                FileEditOperation::Edit {
                    text_edits: Some(edits),
                    ..
                } => {
                    let base_content = base.content.as_deref().unwrap_or_default();
                    let normalized = normalize_line_endings(base_content);
                    match apply_text_edits(&normalized, edits) {
                        Ok(post) => Some(post),
                        Err(err) => {
                            let failure = Failure::new(
                                ErrorCategory::HunkApplyFailure,
                                err.to_string(),
                                Some(item.display.clone()),
                            );
                            return self.fail_without_writes(failure, &operation_id).await;
                        }
                    }
                }
                FileEditOperation::Edit { .. } => unreachable!("validated above"),
                FileEditOperation::Delete { .. } => None,
            };
            let expected_hash = post_content.as_deref().map(normalized_sha256);
            if let Some(hash) = &expected_hash {
                expected_results.push(ExpectedFileResult {
                    uri: item.display.clone(),
                    expected_content_hash: hash.clone(),
                });
            }
            expected.push(ExpectedState {
                post_content,
                expected_hash,
            });
        }

        // Snapshot and stash before the first write.
        let snapshot_files: Vec<SnapshotFile> = planned
            .iter()
            .zip(&bases)
            .map(|(item, base)| SnapshotFile {
                path: item.path.clone(),
                content_before_apply: base.content.clone(),
                was_dirty: base.is_dirty,
            })
            .collect();
        let snapshot_outcome = self.snapshots.create_snapshot(snapshot_files);
        match snapshot_outcome {
            SnapshotOutcome::Created(id) => {
                self.audit_event(
                    AuditAction::SnapshotCreate,
                    displays(&planned),
                    true,
                    serde_json::json!({ "operation_id": operation_id, "snapshot_id": id }),
                )
                .await;
            }
            SnapshotOutcome::Skipped {
                requested_bytes,
                limit,
            } => {
                self.audit_event(
                    AuditAction::SnapshotCreate,
                    displays(&planned),
                    false,
                    serde_json::json!({
                        "operation_id": operation_id,
                        "skipped": true,
                        "requested_bytes": requested_bytes,
                        "limit": limit,
                    }),
                )
                .await;
            }
            SnapshotOutcome::Disabled => {}
        }

        let stash_ref = self.stash.create_stash(&operation_id).await;
        if let Some(reference) = &stash_ref {
            self.audit_event(
                AuditAction::GitStash,
                displays(&planned),
                true,
                serde_json::json!({ "operation_id": operation_id, "stash": reference.sha }),
            )
            .await;
        }

        // Race re-check immediately before writing. The window between
        // this read and the first write is the smallest this
        // implementation can achieve without filesystem locks.
        for (item, base) in planned.iter().zip(&bases) {
            let (current, _) = self.source(&item.path).await;
            let current_hash = current.as_deref().map(normalized_sha256);
            if current_hash != base.hash {
                let failure = Failure::new(
                    ErrorCategory::BaseMismatch,
                    "file changed between base capture and write",
                    Some(item.display.clone()),
                );
                if let SnapshotOutcome::Created(id) = snapshot_outcome {
                    self.snapshots.discard_snapshot(id);
                }
                // Nothing was written: restoring the stash would clobber
                // the still-untouched tree, and keeping it would leak a
                // reflog entry on every aborted transaction.
                if let Some(reference) = &stash_ref {
                    self.stash.drop_stash(reference).await;
                }
                return self.fail_without_writes(failure, &operation_id).await;
            }
        }

        // Write phase, aborting on the first error.
        let mut failure: Option<Failure> = None;
        for (item, state) in planned.iter().zip(&expected) {
            let result = self.write_one(item, state).await;
            if let Err(message) = result {
                failure = Some(Failure::new(
                    ErrorCategory::WriteFailure,
                    message,
                    Some(item.display.clone()),
                ));
                break;
            }
        }

        // Post-verify observes every write.
        if failure.is_none() {
            for (item, state) in planned.iter().zip(&expected) {
                let (current, _) = self.source(&item.path).await;
                let matches = match &state.expected_hash {
                    Some(hash) => current.as_deref().map(normalized_sha256).as_ref() == Some(hash),
                    None => current.is_none() && !self.fs.exists(&item.path).await,
                };
                if !matches {
                    failure = Some(Failure::new(
                        ErrorCategory::VerificationFailure,
                        "post-apply content hash does not match the expected hash",
                        Some(item.display.clone()),
                    ));
                    break;
                }
            }
        }

        match failure {
            None => {
                if let SnapshotOutcome::Created(id) = snapshot_outcome {
                    self.snapshots.discard_snapshot(id);
                }
                // The stash is deliberately kept on success.
                self.audit_event(
                    AuditAction::Apply,
                    displays(&planned),
                    true,
                    serde_json::json!({
                        "operation_id": operation_id,
                        "base_signatures": base_signatures,
                        "expected_results": expected_results,
                    }),
                )
                .await;
                TransactionOutcome::ok(displays(&planned))
            }
            Some(failure) => {
                self.rollback_and_report(failure, &operation_id, &planned, snapshot_outcome, stash_ref)
                    .await
            }
        }
    }

    /// Capture step: `source(path) -> (content, is_dirty)` with editor
    /// buffers taking priority over disk so base signatures reflect
    /// what the user sees.
    async fn source(&self, path: &std::path::Path) -> (Option<String>, bool) {
        if let Some(model) = self.buffers.resolve_model(path)
            && !model.is_disposed()
        {
            return (Some(model.get_value()), true);
        }
        match self.fs.read_file(path).await {
            Ok(bytes) => (Some(String::from_utf8_lossy(&bytes).into_owned()), false),
            Err(_) => (None, false),
        }
    }

    async fn write_one(&self, item: &PlannedOp, state: &ExpectedState) -> Result<(), String> {
        match (&item.op, &state.post_content) {
            (FileEditOperation::Delete { recursive, .. }, _) => {
                if self.fs.exists(&item.path).await {
                    self.fs
                        .delete(&item.path, *recursive)
                        .await
                        .map_err(|err| err.to_string())?;
                }
                Ok(())
            }
            (_, Some(post)) => {
                if let Some(model) = self.buffers.resolve_model(&item.path)
                    && !model.is_disposed()
                {
                    model.set_value(post);
                }
                self.fs
                    .write_file(&item.path, post.as_bytes())
                    .await
                    .map_err(|err| err.to_string())
            }
            (_, None) => unreachable!("non-delete operations always have post content"),
        }
    }

    async fn rollback_and_report(
        &self,
        failure: Failure,
        operation_id: &str,
        planned: &[PlannedOp],
        snapshot_outcome: SnapshotOutcome,
        stash_ref: Option<StashRef>,
    ) -> TransactionOutcome {
        let mut rollback_attempted = false;
        let mut rollback_success = None;

        if let SnapshotOutcome::Created(id) = snapshot_outcome {
            rollback_attempted = true;
            let restored = self.snapshots.restore_snapshot(id).await;
            rollback_success = Some(restored);
            self.audit_event(
                AuditAction::SnapshotRestore,
                displays(planned),
                restored,
                serde_json::json!({ "operation_id": operation_id }),
            )
            .await;
        }

        if rollback_success != Some(true)
            && let Some(reference) = &stash_ref
        {
            rollback_attempted = true;
            let restored = self.stash.restore_stash(reference).await;
            rollback_success = Some(restored);
            self.audit_event(
                AuditAction::GitRestore,
                displays(planned),
                restored,
                serde_json::json!({ "operation_id": operation_id, "stash": reference.sha }),
            )
            .await;
        }

        if rollback_success == Some(false) {
            warn!(
                "rollback failed for operation {operation_id}; manual recovery required"
            );
        }

        self.audit_event(
            AuditAction::Apply,
            displays(planned),
            false,
            serde_json::json!({
                "operation_id": operation_id,
                "error_category": failure.category.to_string(),
                "rollback_attempted": rollback_attempted,
                "rollback_success": rollback_success,
            }),
        )
        .await;

        TransactionOutcome {
            success: false,
            applied_files: Vec::new(),
            failed_file: failure.failed_file,
            error: Some(failure.message),
            error_category: Some(failure.category),
            rollback_attempted,
            rollback_success,
        }
    }

    /// Failure before any write: no rollback, only an audit record.
    async fn fail_without_writes(
        &self,
        failure: Failure,
        operation_id: &str,
    ) -> TransactionOutcome {
        self.audit_event(
            AuditAction::Apply,
            failure.failed_file.iter().cloned().collect(),
            false,
            serde_json::json!({
                "operation_id": operation_id,
                "error_category": failure.category.to_string(),
                "rollback_attempted": false,
            }),
        )
        .await;
        TransactionOutcome {
            success: false,
            applied_files: Vec::new(),
            failed_file: failure.failed_file,
            error: Some(failure.message),
            error_category: Some(failure.category),
            rollback_attempted: false,
            rollback_success: None,
        }
    }

    async fn audit_event(
        &self,
        action: AuditAction,
        files: Vec<String>,
        ok: bool,
        meta: serde_json::Value,
    ) {
        let event = AuditEvent::new(action, files, ok, meta);
        if let Err(err) = self.audit.append(&event).await {
            warn!("audit append failed: {err}");
        }
    }
}

fn displays(planned: &[PlannedOp]) -> Vec<String> {
    planned.iter().map(|item| item.display.clone()).collect()
}
