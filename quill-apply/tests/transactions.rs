use futures::future::BoxFuture;
use pretty_assertions::assert_eq;
use quill_apply::ApplyConfig;
use quill_apply::ApplyEngine;
use quill_apply::ApplyOptions;
use quill_apply::AuditAction;
use quill_apply::AuditLog;
use quill_apply::EditRange;
use quill_apply::ErrorCategory;
use quill_apply::FileEditOperation;
use quill_apply::TextEdit;
use quill_apply::normalized_sha256;
use quill_workspace::BufferRegistry;
use quill_workspace::FileStat;
use quill_workspace::FileSystemService;
use quill_workspace::GitStashMode;
use quill_workspace::InMemoryBuffers;
use quill_workspace::LocalFileSystem;
use quill_workspace::StashRef;
use quill_workspace::VcsService;
use quill_workspace::WorkspaceContext;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

struct NullVcs;

impl VcsService for NullVcs {
    fn is_working_tree_dirty(&self) -> BoxFuture<'_, anyhow::Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn stash<'a>(
        &'a self,
        _operation_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<StashRef>>> {
        Box::pin(async { Ok(None) })
    }

    fn stash_pop<'a>(&'a self, _reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stash_drop<'a>(&'a self, _reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Always-dirty VCS that records stash lifecycle calls so tests can
/// assert the engine cleans up what it creates.
#[derive(Default)]
struct SpyVcs {
    stashed: AtomicUsize,
    popped: AtomicUsize,
    dropped: AtomicUsize,
}

impl VcsService for SpyVcs {
    fn is_working_tree_dirty(&self) -> BoxFuture<'_, anyhow::Result<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn stash<'a>(
        &'a self,
        operation_id: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<StashRef>>> {
        Box::pin(async move {
            self.stashed.fetch_add(1, Ordering::SeqCst);
            Ok(Some(StashRef {
                sha: format!("sha-{operation_id}"),
                operation_id: operation_id.to_string(),
            }))
        })
    }

    fn stash_pop<'a>(&'a self, _reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.popped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stash_drop<'a>(&'a self, _reference: &'a StashRef) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Fails the first write to one specific path, simulating a transient
/// IO error mid transaction; the rollback write goes through.
struct FailingWriteFs {
    inner: LocalFileSystem,
    fail_on: PathBuf,
    fired: AtomicUsize,
}

impl FailingWriteFs {
    fn new(fail_on: PathBuf) -> Self {
        Self {
            inner: LocalFileSystem,
            fail_on,
            fired: AtomicUsize::new(0),
        }
    }
}

impl FileSystemService for FailingWriteFs {
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        self.inner.read_file(path)
    }

    fn write_file<'a>(&'a self, path: &'a Path, bytes: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        if path == self.fail_on && self.fired.fetch_add(1, Ordering::SeqCst) == 0 {
            return Box::pin(async {
                Err(io::Error::other("injected write failure"))
            });
        }
        self.inner.write_file(path, bytes)
    }

    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        self.inner.exists(path)
    }

    fn stat<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<FileStat>> {
        self.inner.stat(path)
    }

    fn delete<'a>(&'a self, path: &'a Path, recursive: bool) -> BoxFuture<'a, io::Result<()>> {
        self.inner.delete(path, recursive)
    }

    fn create_folder<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        self.inner.create_folder(path)
    }
}

/// Returns the first read of the target path verbatim, then serves a
/// mutated version on later reads, modelling an external writer racing
/// the transaction between base capture and the re-check.
struct RacingReadFs {
    inner: LocalFileSystem,
    target: PathBuf,
    mutated: Vec<u8>,
    reads: AtomicUsize,
}

impl FileSystemService for RacingReadFs {
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        if path == self.target {
            let call = self.reads.fetch_add(1, Ordering::SeqCst);
            if call > 0 {
                let mutated = self.mutated.clone();
                return Box::pin(async move { Ok(mutated) });
            }
        }
        self.inner.read_file(path)
    }

    fn write_file<'a>(&'a self, path: &'a Path, bytes: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        self.inner.write_file(path, bytes)
    }

    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        self.inner.exists(path)
    }

    fn stat<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<FileStat>> {
        self.inner.stat(path)
    }

    fn delete<'a>(&'a self, path: &'a Path, recursive: bool) -> BoxFuture<'a, io::Result<()>> {
        self.inner.delete(path, recursive)
    }

    fn create_folder<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        self.inner.create_folder(path)
    }
}

/// Corrupts every write by appending garbage so post-verify must fail.
struct TamperingFs {
    inner: LocalFileSystem,
    tampered: Mutex<Vec<PathBuf>>,
}

impl FileSystemService for TamperingFs {
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        self.inner.read_file(path)
    }

    fn write_file<'a>(&'a self, path: &'a Path, bytes: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        let mut corrupted = bytes.to_vec();
        let first_write = {
            let mut tampered = self.tampered.lock().expect("lock");
            let hit = !tampered.contains(&path.to_path_buf());
            if hit {
                tampered.push(path.to_path_buf());
            }
            hit
        };
        if first_write {
            corrupted.extend_from_slice(b"\n# tampered");
        }
        Box::pin(async move {
            let inner = LocalFileSystem;
            inner.write_file(path, &corrupted).await
        })
    }

    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        self.inner.exists(path)
    }

    fn stat<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<FileStat>> {
        self.inner.stat(path)
    }

    fn delete<'a>(&'a self, path: &'a Path, recursive: bool) -> BoxFuture<'a, io::Result<()>> {
        self.inner.delete(path, recursive)
    }

    fn create_folder<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        self.inner.create_folder(path)
    }
}

struct Harness {
    engine: ApplyEngine,
    buffers: Arc<InMemoryBuffers>,
    audit: Arc<AuditLog>,
    temp: TempDir,
}

fn harness_with(
    fs: Arc<dyn FileSystemService>,
    vcs: Arc<dyn VcsService>,
    stash_mode: GitStashMode,
    temp: TempDir,
) -> Harness {
    let workspace = WorkspaceContext::new(temp.path(), temp.path().join(".quill"))
        .expect("workspace context");
    let buffers = Arc::new(InMemoryBuffers::new());
    let audit = Arc::new(AuditLog::new(temp.path().join(".quill/audit.jsonl")));
    let engine = ApplyEngine::new(
        workspace,
        fs,
        buffers.clone(),
        vcs,
        audit.clone(),
        ApplyConfig {
            git_auto_stash_mode: stash_mode,
            ..Default::default()
        },
    );
    Harness {
        engine,
        buffers,
        audit,
        temp,
    }
}

fn harness_with_fs(fs: Arc<dyn FileSystemService>, temp: TempDir) -> Harness {
    harness_with(fs, Arc::new(NullVcs), GitStashMode::Off, temp)
}

fn harness() -> Harness {
    let temp = TempDir::new().expect("tempdir");
    harness_with_fs(Arc::new(LocalFileSystem), temp)
}

async fn seed(temp: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = temp.path().join(name);
    tokio::fs::write(&path, content).await.expect("seed file");
    path
}

async fn disk(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.expect("read file")
}

#[tokio::test]
async fn two_file_apply_succeeds_and_audits() {
    let h = harness();
    seed(&h.temp, "a.txt", "a1").await;
    seed(&h.temp, "b.txt", "b1").await;

    let outcome = h
        .engine
        .apply_transaction(
            vec![
                FileEditOperation::full_edit("a.txt", "a2"),
                FileEditOperation::full_edit("b.txt", "b2"),
            ],
            ApplyOptions::default(),
        )
        .await;

    assert!(outcome.success, "unexpected failure: {outcome:?}");
    assert_eq!(outcome.applied_files, vec!["a.txt", "b.txt"]);
    assert_eq!(disk(&h.temp.path().join("a.txt")).await, "a2");
    assert_eq!(disk(&h.temp.path().join("b.txt")).await, "b2");

    let events = h.audit.read_events().await.expect("audit");
    assert!(events
        .iter()
        .any(|event| event.action == AuditAction::Apply && event.ok));
}

#[tokio::test]
async fn injected_second_write_failure_rolls_back_the_first() {
    let temp = TempDir::new().expect("tempdir");
    let fail_on = temp.path().join("b.txt");
    let h = harness_with_fs(
        Arc::new(FailingWriteFs::new(fail_on)),
        temp,
    );
    seed(&h.temp, "a.txt", "a1").await;
    seed(&h.temp, "b.txt", "b1").await;
    let hash_before = normalized_sha256(&disk(&h.temp.path().join("a.txt")).await);

    let outcome = h
        .engine
        .apply_transaction(
            vec![
                FileEditOperation::full_edit("a.txt", "a2"),
                FileEditOperation::full_edit("b.txt", "b2"),
            ],
            ApplyOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_category, Some(ErrorCategory::WriteFailure));
    assert_eq!(outcome.failed_file.as_deref(), Some("b.txt"));
    assert!(outcome.rollback_attempted);
    assert_eq!(outcome.rollback_success, Some(true));
    assert_eq!(disk(&h.temp.path().join("a.txt")).await, "a1");
    assert_eq!(disk(&h.temp.path().join("b.txt")).await, "b1");
    assert_eq!(
        normalized_sha256(&disk(&h.temp.path().join("a.txt")).await),
        hash_before
    );
}

#[tokio::test]
async fn base_mismatch_aborts_before_any_write() {
    let temp = TempDir::new().expect("tempdir");
    let target = temp.path().join("f.txt");
    let h = harness_with_fs(
        Arc::new(RacingReadFs {
            inner: LocalFileSystem,
            target,
            mutated: b"y".to_vec(),
            reads: AtomicUsize::new(0),
        }),
        temp,
    );
    seed(&h.temp, "f.txt", "x").await;

    let outcome = h
        .engine
        .apply_transaction(
            vec![FileEditOperation::full_edit("f.txt", "z")],
            ApplyOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_category, Some(ErrorCategory::BaseMismatch));
    assert!(!outcome.rollback_attempted);
    let on_disk = disk(&h.temp.path().join("f.txt")).await;
    assert!(on_disk == "x" || on_disk == "y", "unexpected content {on_disk:?}");
    assert_ne!(on_disk, "z");
}

#[tokio::test]
async fn base_mismatch_abort_drops_the_auto_stash() {
    let temp = TempDir::new().expect("tempdir");
    let target = temp.path().join("f.txt");
    let vcs = Arc::new(SpyVcs::default());
    let h = harness_with(
        Arc::new(RacingReadFs {
            inner: LocalFileSystem,
            target,
            mutated: b"y".to_vec(),
            reads: AtomicUsize::new(0),
        }),
        vcs.clone(),
        GitStashMode::Always,
        temp,
    );
    seed(&h.temp, "f.txt", "x").await;

    let outcome = h
        .engine
        .apply_transaction(
            vec![FileEditOperation::full_edit("f.txt", "z")],
            ApplyOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_category, Some(ErrorCategory::BaseMismatch));
    assert_eq!(vcs.stashed.load(Ordering::SeqCst), 1);
    assert_eq!(
        vcs.dropped.load(Ordering::SeqCst),
        1,
        "abandoned stash must be dropped, not leaked"
    );
    assert_eq!(
        vcs.popped.load(Ordering::SeqCst),
        0,
        "nothing was written; restoring would clobber the tree"
    );
}

#[tokio::test]
async fn crlf_and_lf_bases_produce_equal_normalized_hashes() {
    let h = harness();
    seed(&h.temp, "a.txt", "L1\r\nL2\r\n").await;
    seed(&h.temp, "b.txt", "L1\nL2\n").await;

    let outcome = h
        .engine
        .apply_transaction(
            vec![
                FileEditOperation::full_edit("a.txt", "L1\nL2\nL3"),
                FileEditOperation::full_edit("b.txt", "L1\nL2\nL3"),
            ],
            ApplyOptions::default(),
        )
        .await;

    assert!(outcome.success, "unexpected failure: {outcome:?}");
    let hash_a = normalized_sha256(&disk(&h.temp.path().join("a.txt")).await);
    let hash_b = normalized_sha256(&disk(&h.temp.path().join("b.txt")).await);
    assert_eq!(hash_a, hash_b);
}

#[tokio::test]
async fn paths_outside_the_workspace_are_rejected_without_side_effects() {
    let h = harness();
    let outcome = h
        .engine
        .apply_transaction(
            vec![FileEditOperation::Create {
                uri: "/outside/x.txt".to_string(),
                content: "hi".to_string(),
            }],
            ApplyOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_category, Some(ErrorCategory::WriteFailure));
    assert!(!Path::new("/outside/x.txt").exists());
}

#[tokio::test]
async fn operation_order_does_not_change_final_hashes() {
    let ops_forward = vec![
        FileEditOperation::full_edit("a.txt", "first"),
        FileEditOperation::full_edit("b.txt", "second"),
        FileEditOperation::Create {
            uri: "c.txt".to_string(),
            content: "third".to_string(),
        },
    ];
    let mut ops_reversed = ops_forward.clone();
    ops_reversed.reverse();

    let mut hashes = Vec::new();
    for ops in [ops_forward, ops_reversed] {
        let h = harness();
        seed(&h.temp, "a.txt", "a0").await;
        seed(&h.temp, "b.txt", "b0").await;
        let outcome = h.engine.apply_transaction(ops, ApplyOptions::default()).await;
        assert!(outcome.success, "unexpected failure: {outcome:?}");
        let mut run = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            run.push(normalized_sha256(&disk(&h.temp.path().join(name)).await));
        }
        hashes.push(run);
    }
    assert_eq!(hashes[0], hashes[1]);
}

#[tokio::test]
async fn verification_failure_restores_the_original_content() {
    let temp = TempDir::new().expect("tempdir");
    let h = harness_with_fs(
        Arc::new(TamperingFs {
            inner: LocalFileSystem,
            tampered: Mutex::new(Vec::new()),
        }),
        temp,
    );
    seed(&h.temp, "v.txt", "original").await;

    let outcome = h
        .engine
        .apply_transaction(
            vec![FileEditOperation::full_edit("v.txt", "updated")],
            ApplyOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error_category,
        Some(ErrorCategory::VerificationFailure)
    );
    assert!(outcome.rollback_attempted);
    assert_eq!(outcome.rollback_success, Some(true));
    assert_eq!(disk(&h.temp.path().join("v.txt")).await, "original");
}

#[tokio::test]
async fn dirty_buffers_take_priority_over_disk() {
    let h = harness();
    let path = seed(&h.temp, "buf.txt", "disk content").await;
    h.buffers.open(&path, "buffer content");

    let outcome = h
        .engine
        .apply_transaction(
            vec![FileEditOperation::ranged_edit(
                "buf.txt",
                vec![TextEdit {
                    range: EditRange {
                        start_line: 1,
                        start_column: 1,
                        end_line: 1,
                        end_column: 7,
                    },
                    text: "edited".to_string(),
                }],
            )],
            ApplyOptions::default(),
        )
        .await;

    assert!(outcome.success, "unexpected failure: {outcome:?}");
    // The splice ran against the buffer, not the stale disk content.
    assert_eq!(disk(&path).await, "edited content");
    let model = h.buffers.resolve_model(&path).expect("buffer");
    assert_eq!(model.get_value(), "edited content");
}

#[tokio::test]
async fn delete_and_rollback_recreates_the_file() {
    let temp = TempDir::new().expect("tempdir");
    let fail_on = temp.path().join("z.txt");
    let h = harness_with_fs(
        Arc::new(FailingWriteFs::new(fail_on)),
        temp,
    );
    seed(&h.temp, "doomed.txt", "keep me").await;
    seed(&h.temp, "z.txt", "z0").await;

    let outcome = h
        .engine
        .apply_transaction(
            vec![
                FileEditOperation::Delete {
                    uri: "doomed.txt".to_string(),
                    recursive: false,
                    is_folder: false,
                },
                FileEditOperation::full_edit("z.txt", "z1"),
            ],
            ApplyOptions::default(),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.rollback_success, Some(true));
    assert_eq!(disk(&h.temp.path().join("doomed.txt")).await, "keep me");
    assert_eq!(disk(&h.temp.path().join("z.txt")).await, "z0");
}

#[tokio::test]
async fn malformed_edit_operations_are_rejected() {
    let h = harness();
    seed(&h.temp, "m.txt", "content").await;
    let outcome = h
        .engine
        .apply_transaction(
            vec![FileEditOperation::Edit {
                uri: "m.txt".to_string(),
                content: Some("a".to_string()),
                text_edits: Some(vec![]),
            }],
            ApplyOptions::default(),
        )
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.error_category, Some(ErrorCategory::WriteFailure));
    assert_eq!(disk(&h.temp.path().join("m.txt")).await, "content");
}

#[tokio::test]
async fn overlapping_ranged_edits_report_hunk_failure() {
    let h = harness();
    seed(&h.temp, "h.txt", "abcdef").await;
    let overlapping = vec![
        TextEdit {
            range: EditRange {
                start_line: 1,
                start_column: 1,
                end_line: 1,
                end_column: 4,
            },
            text: "X".to_string(),
        },
        TextEdit {
            range: EditRange {
                start_line: 1,
                start_column: 3,
                end_line: 1,
                end_column: 5,
            },
            text: "Y".to_string(),
        },
    ];
    let outcome = h
        .engine
        .apply_transaction(
            vec![FileEditOperation::ranged_edit("h.txt", overlapping)],
            ApplyOptions::default(),
        )
        .await;
    assert!(!outcome.success);
    assert_eq!(
        outcome.error_category,
        Some(ErrorCategory::HunkApplyFailure)
    );
    assert_eq!(disk(&h.temp.path().join("h.txt")).await, "abcdef");
}

#[tokio::test]
async fn concurrent_disjoint_transactions_both_succeed() {
    let h = Arc::new(harness());
    seed(&h.temp, "left.txt", "l0").await;
    seed(&h.temp, "right.txt", "r0").await;

    let left = {
        let h = h.clone();
        tokio::spawn(async move {
            h.engine
                .apply_transaction(
                    vec![FileEditOperation::full_edit("left.txt", "l1")],
                    ApplyOptions::default(),
                )
                .await
        })
    };
    let right = {
        let h = h.clone();
        tokio::spawn(async move {
            h.engine
                .apply_transaction(
                    vec![FileEditOperation::full_edit("right.txt", "r1")],
                    ApplyOptions::default(),
                )
                .await
        })
    };

    let (left, right) = (left.await.expect("join"), right.await.expect("join"));
    assert!(left.success && right.success);
    assert_eq!(disk(&h.temp.path().join("left.txt")).await, "l1");
    assert_eq!(disk(&h.temp.path().join("right.txt")).await, "r1");
}
