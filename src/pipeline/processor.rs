//! Intake orchestrator.
//!
//! Single entry point that drives one submission end to end:
//! stage → extract → validate → persist → release, releasing the staged
//! upload on every path. A submission that cannot release its upload fails
//! and leaves no stored result. Review calls are delegated to
//! [`ReviewWorkflow`].
//!
//! Collaborators are injected behind traits so the orchestrator runs
//! against in-memory SQLite and shell-script engines in tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::contract::clear_artifacts;
use super::staging::{cleanup_orphaned_staging, StagedUpload};
use super::supervisor::{EngineCommand, ExtractionSupervisor};
use super::validator::ResultValidator;
use super::PipelineError;
use crate::authorization::can_submit;
use crate::config::IntakeConfig;
use crate::db::repository::{ResultCursor, ResultFilter, ResultStore, TargetSink};
use crate::models::{Actor, OcrResult, RetentionPolicy, UploadAttempt};
use crate::review::{ApprovalOutcome, ReviewWorkflow};

/// Default per-run deadline for the extraction engine.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// Slack added on top of the longest possible attempt before an attempt
/// directory counts as orphaned.
const ORPHAN_MARGIN: Duration = Duration::from_secs(60);

/// Orchestrates document intake and review. Cheap to clone; clones share
/// the store and nothing else.
#[derive(Clone)]
pub struct IntakeProcessor {
    store: Arc<dyn ResultStore>,
    review: ReviewWorkflow,
    supervisor: ExtractionSupervisor,
    validator: ResultValidator,
    staging_root: PathBuf,
    deadline: Duration,
    timeout_retries: u32,
}

impl IntakeProcessor {
    pub fn new(
        store: Arc<dyn ResultStore>,
        sink: Arc<dyn TargetSink>,
        supervisor: ExtractionSupervisor,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            review: ReviewWorkflow::new(store.clone(), sink),
            store,
            supervisor,
            validator: ResultValidator::default(),
            staging_root: staging_root.into(),
            deadline: DEFAULT_DEADLINE,
            timeout_retries: 0,
        }
    }

    pub fn from_config(config: &IntakeConfig, store: Arc<dyn ResultStore>, sink: Arc<dyn TargetSink>) -> Self {
        let engine = EngineCommand::new(&config.engine).with_args(config.engine_args.iter().cloned());
        Self::new(store, sink, ExtractionSupervisor::new(engine), &config.staging_dir)
            .with_deadline(config.deadline)
            .with_timeout_retries(config.timeout_retries)
            .with_retention(config.retention)
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Extra engine runs allowed after a deadline overrun.
    pub fn with_timeout_retries(mut self, retries: u32) -> Self {
        self.timeout_retries = retries;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.review = self.review.with_retention(retention);
        self
    }

    pub fn with_validator(mut self, validator: ResultValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Age past which an attempt directory cannot belong to a live submission.
    pub fn orphan_age(&self) -> Duration {
        self.deadline
            .saturating_mul(self.timeout_retries.saturating_add(1))
            .saturating_add(ORPHAN_MARGIN)
    }

    /// Remove attempt directories a crashed process left under the staging
    /// root. Directories younger than [`Self::orphan_age`] are kept, so this
    /// is safe while other processes share the root.
    pub fn sweep_orphaned_staging(&self) -> usize {
        cleanup_orphaned_staging(&self.staging_root, self.orphan_age())
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Run one upload through the engine and store the result as `pending`.
    pub async fn submit(&self, bytes: &[u8], content_type: &str, actor: &Actor) -> Result<OcrResult, PipelineError> {
        if !can_submit(actor.role) {
            tracing::warn!(role = actor.role.as_str(), actor = %actor.id, "Submission refused");
            return Err(PipelineError::unauthorized(actor.role, "submit documents"));
        }

        let attempt_id = Uuid::new_v4();
        tracing::info!(
            attempt_id = %attempt_id,
            actor = %actor.id,
            content_type,
            size = bytes.len(),
            "Submission received"
        );

        let staged = StagedUpload::acquire(&self.staging_root, attempt_id, bytes, content_type)?;
        let attempt = UploadAttempt {
            attempt_id,
            source_path: staged.file_path().to_path_buf(),
            content_type: content_type.to_string(),
            actor: actor.clone(),
        };

        let persisted = self.extract_and_persist(&attempt).await;
        let released = staged.release();

        let outcome = match (persisted, released) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(result), Err(e)) => {
                tracing::error!(
                    attempt_id = %attempt_id,
                    result_id = %result.id,
                    "Staged upload left on disk, discarding stored result: {e}"
                );
                if let Err(db_err) = self.store.delete(&result.id) {
                    tracing::error!(result_id = %result.id, "Failed to discard stored result: {db_err}");
                }
                Err(e)
            }
            (Err(e), Err(release_err)) => {
                tracing::error!(attempt_id = %attempt_id, kind = e.kind(), "Staged upload left on disk: {release_err}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        };

        match &outcome {
            Ok(result) => tracing::info!(
                attempt_id = %attempt_id,
                result_id = %result.id,
                suggested_collection = %result.suggested_collection,
                "Submission stored for review"
            ),
            Err(e) => tracing::warn!(attempt_id = %attempt_id, kind = e.kind(), "Submission failed: {e}"),
        }
        outcome
    }

    async fn extract_and_persist(&self, attempt: &UploadAttempt) -> Result<OcrResult, PipelineError> {
        let locations = self.validator.contract().locations(&attempt.source_path);
        let mut retries_left = self.timeout_retries;

        let result = loop {
            clear_artifacts(&locations)?;
            let outcome = self.supervisor.run(&attempt.source_path, self.deadline).await?;
            match self.validator.validate(&outcome, &locations, attempt) {
                Err(e) if e.is_retryable() && retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!(
                        attempt_id = %attempt.attempt_id,
                        retries_left,
                        "Extraction timed out, retrying"
                    );
                }
                other => break other?,
            }
        };

        self.store.create(&result)?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Queries and review
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &Uuid) -> Result<OcrResult, PipelineError> {
        Ok(self.store.get(id)?)
    }

    /// Lazily page through stored results; each call starts from the first.
    pub fn list(&self, filter: ResultFilter) -> ResultCursor<'_> {
        ResultCursor::new(self.store.as_ref(), filter)
    }

    pub fn approve(&self, id: &Uuid, actor: &Actor) -> Result<ApprovalOutcome, PipelineError> {
        self.review.approve(id, actor)
    }

    pub fn reject(&self, id: &Uuid, actor: &Actor) -> Result<(), PipelineError> {
        self.review.reject(id, actor)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Instant, SystemTime};

    use super::*;
    use crate::db::repository::{SqliteResultStore, SqliteTargetSink};
    use crate::db::Database;
    use crate::models::{ReviewState, Role, TargetCollection};
    use crate::pipeline::staging::STAGING_PREFIX;
    use crate::pipeline::test_support::{contract_writer, write_script};

    struct Harness {
        // Held for its Drop.
        _dir: tempfile::TempDir,
        root: PathBuf,
        sink: Arc<SqliteTargetSink>,
        processor: IntakeProcessor,
    }

    fn harness(engine_body: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "engine.sh", engine_body);
        let root = dir.path().join("staging");

        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(SqliteResultStore::new(db.clone()));
        let sink = Arc::new(SqliteTargetSink::new(db));
        let processor = IntakeProcessor::new(
            store,
            sink.clone(),
            ExtractionSupervisor::new(EngineCommand::new(script)),
            &root,
        )
        .with_deadline(Duration::from_secs(10));

        Harness {
            _dir: dir,
            root,
            sink,
            processor,
        }
    }

    fn staged_dirs(root: &Path) -> usize {
        std::fs::read_dir(root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
                    .count()
            })
            .unwrap_or(0)
    }

    fn all(processor: &IntakeProcessor) -> Vec<OcrResult> {
        processor
            .list(ResultFilter::default())
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn hr() -> Actor {
        Actor::new("hr-1", Role::Hr)
    }

    #[tokio::test]
    async fn invoice_submission_then_approval() {
        let h = harness(&contract_writer(
            "Invoice #42 Total 120",
            r#"{"document_type": "invoice", "amount": 120}"#,
        ));

        let result = h.processor.submit(b"%PDF-1.7", "application/pdf", &hr()).await.unwrap();
        assert_eq!(result.suggested_collection, "invoice");
        assert_eq!(result.state, ReviewState::Pending);
        assert_eq!(result.uploaded_by, "hr-1");
        assert_eq!(staged_dirs(&h.root), 0);

        let listed = all(&h.processor);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, result.id);

        let approval = h
            .processor
            .approve(&result.id, &Actor::new("fin-1", Role::Finance))
            .unwrap();
        assert_eq!(approval.target.data["amount"], 120);
        assert_eq!(h.sink.list_by_collection(TargetCollection::Invoice).unwrap().len(), 1);
        assert_eq!(h.processor.get(&result.id).unwrap().state, ReviewState::Approved);
    }

    #[tokio::test]
    async fn engine_failure_stores_nothing() {
        let h = harness(r#"echo "corrupt PDF" >&2; exit 2"#);

        let err = h.processor.submit(b"garbage", "application/pdf", &hr()).await.unwrap_err();
        match err {
            PipelineError::ExtractionFailed { exit_code, ref stderr } => {
                assert_eq!(exit_code, 2);
                assert!(stderr.contains("corrupt PDF"));
            }
            ref other => panic!("unexpected {other:?}"),
        }
        assert!(all(&h.processor).is_empty());
        assert_eq!(staged_dirs(&h.root), 0);
    }

    #[tokio::test]
    async fn timeout_kills_engine_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("engine.pid");
        let h = harness(&format!("echo $$ > {}; exec sleep 30", pid_file.display()));
        let processor = h.processor.clone().with_deadline(Duration::from_millis(300));

        let started = Instant::now();
        let err = processor.submit(b"slow", "image/png", &hr()).await.unwrap_err();
        assert_eq!(err.kind(), "EXTRACTION_TIMEOUT");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(staged_dirs(&h.root), 0);
        assert!(all(&processor).is_empty());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .status()
            .unwrap()
            .success();
        assert!(!alive);
    }

    #[tokio::test]
    async fn timeout_retry_gets_a_fresh_run() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let body = format!(
            "n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}\nif [ $n -eq 1 ]; then exec sleep 30; fi\n{}",
            contract_writer("second try", r#"{"document_type": "payroll"}"#),
            c = counter.display(),
        );
        let h = harness(&body);
        let processor = h
            .processor
            .clone()
            .with_deadline(Duration::from_millis(500))
            .with_timeout_retries(1);

        let result = processor.submit(b"x", "application/pdf", &hr()).await.unwrap();
        assert_eq!(result.raw_text, "second try");
        assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "2");
    }

    #[tokio::test]
    async fn missing_fields_artifact_is_missing_output() {
        let h = harness(r#"echo '{"text": "half"}' > "$(dirname "$1")/processing_result.json""#);
        let err = h.processor.submit(b"x", "application/pdf", &hr()).await.unwrap_err();
        assert_eq!(err.kind(), "MISSING_OUTPUT");
        assert!(all(&h.processor).is_empty());
        assert_eq!(staged_dirs(&h.root), 0);
    }

    #[tokio::test]
    async fn malformed_artifact_is_malformed_output() {
        let h = harness(&contract_writer("ok", "this is not json"));
        let err = h.processor.submit(b"x", "application/pdf", &hr()).await.unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_OUTPUT");
        assert_eq!(staged_dirs(&h.root), 0);
    }

    #[tokio::test]
    async fn missing_engine_is_reported_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("staging");
        let db = Arc::new(Database::open_in_memory().unwrap());
        let processor = IntakeProcessor::new(
            Arc::new(SqliteResultStore::new(db.clone())),
            Arc::new(SqliteTargetSink::new(db)),
            ExtractionSupervisor::new(EngineCommand::new(dir.path().join("absent-engine"))),
            &root,
        );

        let err = processor.submit(b"x", "application/pdf", &hr()).await.unwrap_err();
        assert_eq!(err.kind(), "EXECUTABLE_NOT_FOUND");
        assert_eq!(staged_dirs(&root), 0);
    }

    #[tokio::test]
    async fn unauthorized_role_cannot_submit() {
        let h = harness(&contract_writer("x", "{}"));
        let err = h
            .processor
            .submit(b"x", "application/pdf", &Actor::new("eng", Role::Engineer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UNAUTHORIZED");
        assert!(!h.root.exists() || staged_dirs(&h.root) == 0);
    }

    #[tokio::test]
    async fn concurrent_submissions_do_not_mix() {
        let body = r#"out=$(dirname "$1"); t=$(cat "$1"); sleep 0.1
printf '{"text": "%s"}' "$t" > "$out/processing_result.json"
printf '{"document_type": "report", "source": "%s"}' "$t" > "$out/important_details.json""#;
        let h = harness(body);

        let mut handles = Vec::new();
        for i in 0..8 {
            let processor = h.processor.clone();
            handles.push(tokio::spawn(async move {
                let content = format!("document {i}");
                let result = processor
                    .submit(content.as_bytes(), "text/plain", &Actor::new(format!("user-{i}"), Role::Admin))
                    .await
                    .unwrap();
                (content, result)
            }));
        }

        for handle in handles {
            let (content, result) = handle.await.unwrap();
            assert_eq!(result.raw_text, content);
            assert_eq!(result.parsed_fields["source"], content.as_str());
        }

        let stored = all(&h.processor);
        assert_eq!(stored.len(), 8);
        let mut attempts: Vec<_> = stored.iter().map(|r| r.attempt_id).collect();
        attempts.sort();
        attempts.dedup();
        assert_eq!(attempts.len(), 8);
        assert_eq!(staged_dirs(&h.root), 0);
    }

    #[tokio::test]
    async fn construction_leaves_live_attempts_alone() {
        let body = format!("sleep 1; {}", contract_writer("Timesheet", r#"{"document_type": "attendance"}"#));
        let h = harness(&body);

        let first = h.processor.clone();
        let in_flight = tokio::spawn(async move { first.submit(b"x", "application/pdf", &hr()).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(staged_dirs(&h.root), 1);

        // A second process starting up and sweeping on the same root.
        let db = Arc::new(Database::open_in_memory().unwrap());
        let second = IntakeProcessor::new(
            Arc::new(SqliteResultStore::new(db.clone())),
            Arc::new(SqliteTargetSink::new(db)),
            ExtractionSupervisor::new(EngineCommand::new("/bin/true")),
            &h.root,
        );
        assert_eq!(second.sweep_orphaned_staging(), 0);

        let result = in_flight.await.unwrap().unwrap();
        assert_eq!(result.raw_text, "Timesheet");
        assert_eq!(staged_dirs(&h.root), 0);
    }

    #[tokio::test]
    async fn sweep_removes_stale_attempts() {
        let h = harness("exit 0");
        let orphan = h.root.join(format!("{STAGING_PREFIX}crashed"));
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join("upload.pdf"), b"left behind").unwrap();
        let fresh = h.root.join(format!("{STAGING_PREFIX}recent"));
        std::fs::create_dir_all(&fresh).unwrap();

        let stale = SystemTime::now() - h.processor.orphan_age() - Duration::from_secs(1);
        std::fs::File::open(&orphan).unwrap().set_modified(stale).unwrap();

        assert_eq!(h.processor.sweep_orphaned_staging(), 1);
        assert!(!orphan.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn orphan_age_covers_every_retry() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let processor = IntakeProcessor::new(
            Arc::new(SqliteResultStore::new(db.clone())),
            Arc::new(SqliteTargetSink::new(db)),
            ExtractionSupervisor::new(EngineCommand::new("/bin/true")),
            "/nonexistent",
        )
        .with_deadline(Duration::from_secs(30))
        .with_timeout_retries(2);
        assert_eq!(processor.orphan_age(), Duration::from_secs(90) + ORPHAN_MARGIN);
    }

    #[tokio::test]
    async fn undeletable_staging_fails_submission() {
        use std::os::unix::fs::PermissionsExt;

        // Root ignores permission bits; nothing to assert in that case.
        let scratch = tempfile::tempdir().unwrap();
        let sealed = scratch.path().join("sealed");
        std::fs::create_dir(&sealed).unwrap();
        std::fs::set_permissions(&sealed, std::fs::Permissions::from_mode(0o500)).unwrap();
        if std::fs::write(sealed.join("canary"), b"x").is_ok() {
            return;
        }
        std::fs::set_permissions(&sealed, std::fs::Permissions::from_mode(0o700)).unwrap();

        let body = format!(
            r#"out=$(dirname "$1"); mkdir "$out/pages"; echo x > "$out/pages/1.png"; chmod 500 "$out/pages"
{}"#,
            contract_writer("Invoice", r#"{"document_type": "invoice"}"#)
        );
        let h = harness(&body);

        let err = h.processor.submit(b"x", "application/pdf", &hr()).await.unwrap_err();
        assert_eq!(err.kind(), "STORAGE_ERROR");
        assert!(all(&h.processor).is_empty());

        for entry in std::fs::read_dir(&h.root).unwrap().flatten() {
            let pages = entry.path().join("pages");
            std::fs::set_permissions(&pages, std::fs::Permissions::from_mode(0o700)).unwrap();
        }
    }

    #[tokio::test]
    async fn rejected_submission_is_gone() {
        let h = harness(&contract_writer("Payslip", r#"{"document_type": "payroll"}"#));
        let result = h.processor.submit(b"x", "application/pdf", &hr()).await.unwrap();

        h.processor.reject(&result.id, &hr()).unwrap();
        assert_eq!(h.processor.get(&result.id).unwrap_err().kind(), "NOT_FOUND");
        assert!(all(&h.processor).is_empty());
    }
}
