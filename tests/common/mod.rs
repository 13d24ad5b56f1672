//! Shared fakes for the integration tests: an in-memory DAO and scripted
//! VCS / build / harness / ledger / data-store collaborators.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;

use autograder::collab::{
    BuildOutput, BuildRunner, CommitInfo, DataStore, EvalHarness, Ledger, QueueEntry,
    SubmissionDao, VcsClient,
};
use autograder::config::{
    GradingConfig, PassRule, PhaseConfig, RubricConfig, RubricConfigItem,
};
use autograder::error::{GraderError, Result};
use autograder::model::{
    Phase, RawTest, Rubric, RubricItemKind, Submission, VerificationVerdict, VerifiedStatus,
};
use autograder::pipeline::PipelineDeps;

/// Opt-in log output for debugging a failing test: RUST_LOG=debug cargo test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub const PHASE: Phase = Phase(3);
pub const PREV_PHASE: Phase = Phase(2);
pub const UNGRADED_PHASE: Phase = Phase(0);
pub const REPO_URL: &str = "https://github.com/student/chess.git";
pub const HEAD: &str = "aaaa1111bbbb2222";

// ---------------------------------------------------------------------------
// VCS

pub struct FakeVcs {
    pub head: Mutex<String>,
    pub clone_ok: AtomicBool,
    pub clone_gate: Mutex<Option<Arc<Semaphore>>>,
    pub head_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Files written (empty) into the cloned repository, relative paths.
    pub repo_files: Mutex<Vec<String>>,
    pub commits: Mutex<Vec<CommitInfo>>,
    pub resolvable: Mutex<HashMap<String, CommitInfo>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self {
            head: Mutex::new(HEAD.to_string()),
            clone_ok: AtomicBool::new(true),
            clone_gate: Mutex::new(None),
            head_gate: Mutex::new(None),
            repo_files: Mutex::new(vec!["pom.xml".to_string()]),
            commits: Mutex::new(good_history(12)),
            resolvable: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_commits(&self, commits: Vec<CommitInfo>) {
        *self.commits.lock().unwrap() = commits;
    }

    pub fn fail_clone(&self) {
        self.clone_ok.store(false, Ordering::SeqCst);
    }

    /// Make `clone_repo` wait until the returned semaphore gets permits.
    pub fn gate_clone(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.clone_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make `remote_head` wait until the returned semaphore gets permits.
    pub fn gate_remote_head(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.head_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

async fn wait_at(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        let permit = gate.acquire().await.expect("gate closed");
        permit.forget();
    }
}

#[async_trait]
impl VcsClient for FakeVcs {
    async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
        if !self.clone_ok.load(Ordering::SeqCst) {
            return Err(GraderError::RepositoryAccess(
                "Failed to clone repo".to_string(),
            ));
        }
        wait_at(&self.clone_gate).await;
        std::fs::create_dir_all(dest).expect("create repo dir");
        for file in self.repo_files.lock().unwrap().iter() {
            std::fs::write(dest.join(file), b"").expect("write repo file");
        }
        Ok(())
    }

    async fn remote_head(&self, _url: &str) -> Result<String> {
        wait_at(&self.head_gate).await;
        Ok(self.head.lock().unwrap().clone())
    }

    async fn head_hash(&self, _repo: &Path) -> Result<String> {
        Ok(self.head.lock().unwrap().clone())
    }

    async fn list_commits(
        &self,
        _repo: &Path,
        _since_hash: Option<&str>,
    ) -> Result<Vec<CommitInfo>> {
        Ok(self.commits.lock().unwrap().clone())
    }

    async fn resolve(&self, _repo: &Path, hash: &str) -> Result<Option<CommitInfo>> {
        Ok(self.resolvable.lock().unwrap().get(hash).cloned())
    }
}

/// A clean commit history: `count` commits of 10 lines each, chronological,
/// spread over the last few days.
pub fn good_history(count: u32) -> Vec<CommitInfo> {
    let start = Utc::now() - Duration::days(3);
    (0..count)
        .map(|i| CommitInfo {
            hash: format!("commit{i:02}"),
            author_time: start + Duration::hours(i as i64 * 6),
            lines_changed: 10,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Build

pub struct FakeBuilder {
    pub output: Mutex<BuildOutput>,
    pub delay: Mutex<Option<std::time::Duration>>,
    pub build_calls: AtomicU32,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self {
            output: Mutex::new(BuildOutput {
                exit_code: 0,
                diagnostic_text: String::new(),
            }),
            delay: Mutex::new(None),
            build_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_with(&self, diagnostic_text: &str) {
        *self.output.lock().unwrap() = BuildOutput {
            exit_code: 1,
            diagnostic_text: diagnostic_text.to_string(),
        };
    }

    pub fn stall_for(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl BuildRunner for FakeBuilder {
    async fn build(&self, _repo: &Path) -> Result<BuildOutput> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.output.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Evaluation harness

#[derive(Default)]
pub struct FakeHarness {
    pub suites: Mutex<HashMap<(Phase, RubricItemKind), Vec<RawTest>>>,
    pub panic_once: AtomicBool,
    /// When set, every suite run leaks a scratch namespace into this store.
    pub leak_into: Mutex<Option<Arc<FakeStore>>>,
}

impl FakeHarness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, phase: Phase, item: RubricItemKind, tests: Vec<RawTest>) {
        self.suites.lock().unwrap().insert((phase, item), tests);
    }

    pub fn panic_on_next_run(&self) {
        self.panic_once.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvalHarness for FakeHarness {
    async fn run_suite(
        &self,
        _repo: &Path,
        phase: Phase,
        item: RubricItemKind,
        namespace: &str,
    ) -> Result<Vec<RawTest>> {
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("harness exploded");
        }
        let leak = self.leak_into.lock().unwrap().clone();
        if let Some(store) = leak {
            store
                .namespaces
                .lock()
                .unwrap()
                .insert(format!("{namespace}-scratch"));
        }
        Ok(self
            .suites
            .lock()
            .unwrap()
            .get(&(phase, item))
            .cloned()
            .unwrap_or_default())
    }
}

pub fn suite(passed: u32, failed: u32) -> Vec<RawTest> {
    let mut tests = Vec::new();
    for i in 0..passed {
        tests.push(RawTest::standard(format!("server.suite.pass_{i}"), true));
    }
    for i in 0..failed {
        tests.push(RawTest::standard(format!("server.suite.fail_{i}"), false));
    }
    tests
}

// ---------------------------------------------------------------------------
// Ledger

#[derive(Debug, Clone)]
pub struct LedgerPush {
    pub submitter_id: String,
    pub phase: Phase,
    pub item_points: Vec<(String, f32)>,
    pub item_comments: Vec<(String, String)>,
    pub overall_comment: String,
}

pub struct FakeLedger {
    pub scores: Mutex<HashMap<(String, Phase), f32>>,
    pub due_date: Mutex<DateTime<Utc>>,
    pub pushes: Mutex<Vec<LedgerPush>>,
    pub fail_submit: AtomicBool,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            scores: Mutex::new(HashMap::new()),
            due_date: Mutex::new(Utc::now() + Duration::days(30)),
            pushes: Mutex::new(Vec::new()),
            fail_submit: AtomicBool::new(false),
        }
    }

    pub fn set_recorded_score(&self, submitter_id: &str, phase: Phase, score: f32) {
        self.scores
            .lock()
            .unwrap()
            .insert((submitter_id.to_string(), phase), score);
    }

    pub fn set_due_date(&self, due: DateTime<Utc>) {
        *self.due_date.lock().unwrap() = due;
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn get_score(&self, submitter_id: &str, phase: Phase) -> Result<Option<f32>> {
        Ok(self
            .scores
            .lock()
            .unwrap()
            .get(&(submitter_id.to_string(), phase))
            .copied())
    }

    async fn submit_score(
        &self,
        submitter_id: &str,
        phase: Phase,
        item_points: &[(String, f32)],
        item_comments: &[(String, String)],
        overall_comment: &str,
    ) -> Result<()> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(GraderError::ExternalService(
                "ledger unreachable".to_string(),
            ));
        }
        self.pushes.lock().unwrap().push(LedgerPush {
            submitter_id: submitter_id.to_string(),
            phase,
            item_points: item_points.to_vec(),
            item_comments: item_comments.to_vec(),
            overall_comment: overall_comment.to_string(),
        });
        Ok(())
    }

    async fn get_due_date(&self, _submitter_id: &str, _phase: Phase) -> Result<DateTime<Utc>> {
        Ok(*self.due_date.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// DAO

#[derive(Default)]
pub struct InMemoryDao {
    pub submissions: Mutex<Vec<Submission>>,
    pub queue: Mutex<HashMap<String, QueueEntry>>,
    pub queue_writes: AtomicU32,
}

impl InMemoryDao {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_submission(&self, submission: Submission) {
        self.submissions.lock().unwrap().push(submission);
    }

    pub fn seed_queue_entry(&self, submitter_id: &str, time_added: DateTime<Utc>) {
        self.queue
            .lock()
            .unwrap()
            .insert(submitter_id.to_string(), QueueEntry { time_added });
    }
}

#[async_trait]
impl SubmissionDao for InMemoryDao {
    async fn insert_submission(&self, submission: Submission) -> Result<()> {
        self.submissions.lock().unwrap().push(submission);
        Ok(())
    }

    async fn get_first_passing_submission(
        &self,
        submitter_id: &str,
        phase: Phase,
    ) -> Result<Option<Submission>> {
        Ok(self
            .submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.submitter_id == submitter_id && s.phase == phase && s.passed)
            .min_by_key(|s| s.hand_in_time)
            .cloned())
    }

    async fn get_all_passing_submissions(&self, submitter_id: &str) -> Result<Vec<Submission>> {
        Ok(self
            .submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.submitter_id == submitter_id && s.passed)
            .cloned()
            .collect())
    }

    async fn get_submissions_for_phase(
        &self,
        submitter_id: &str,
        phase: Phase,
    ) -> Result<Vec<Submission>> {
        Ok(self
            .submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.submitter_id == submitter_id && s.phase == phase)
            .cloned()
            .collect())
    }

    async fn get_queue_entry(&self, submitter_id: &str) -> Result<Option<QueueEntry>> {
        Ok(self.queue.lock().unwrap().get(submitter_id).cloned())
    }

    async fn put_queue_entry(&self, submitter_id: &str, entry: QueueEntry) -> Result<()> {
        self.queue_writes.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .insert(submitter_id.to_string(), entry);
        Ok(())
    }

    async fn remove_queue_entry(&self, submitter_id: &str) -> Result<()> {
        self.queue.lock().unwrap().remove(submitter_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Data store

#[derive(Default)]
pub struct FakeStore {
    pub namespaces: Mutex<BTreeSet<String>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.namespaces.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataStore for FakeStore {
    async fn list_namespaces(&self) -> Result<BTreeSet<String>> {
        Ok(self.names())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        self.namespaces.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn drop_namespace(&self, name: &str) -> Result<()> {
        self.namespaces.lock().unwrap().remove(name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// World

pub struct TestWorld {
    pub staging: tempfile::TempDir,
    pub vcs: Arc<FakeVcs>,
    pub builder: Arc<FakeBuilder>,
    pub harness: Arc<FakeHarness>,
    pub ledger: Arc<FakeLedger>,
    pub dao: Arc<InMemoryDao>,
    pub store: Arc<FakeStore>,
    pub config: GradingConfig,
}

impl TestWorld {
    pub fn new() -> Self {
        init_tracing();
        let staging = tempfile::tempdir().expect("tempdir");
        let mut config = GradingConfig {
            staging_root: staging.path().to_path_buf(),
            worker_count: 2,
            required_files: vec![PathBuf::from("pom.xml")],
            ..GradingConfig::default()
        };
        config.phases.insert(PHASE, passoff_only_phase());
        config.phases.insert(PREV_PHASE, passoff_only_phase());
        config.phases.insert(
            UNGRADED_PHASE,
            PhaseConfig {
                graded: false,
                ..passoff_only_phase()
            },
        );
        Self {
            staging,
            vcs: Arc::new(FakeVcs::new()),
            builder: Arc::new(FakeBuilder::new()),
            harness: Arc::new(FakeHarness::new()),
            ledger: Arc::new(FakeLedger::new()),
            dao: Arc::new(InMemoryDao::new()),
            store: Arc::new(FakeStore::new()),
            config,
        }
    }

    pub fn deps(&self) -> Arc<PipelineDeps> {
        Arc::new(PipelineDeps {
            config: Arc::new(self.config.clone()),
            vcs: self.vcs.clone(),
            builder: self.builder.clone(),
            harness: self.harness.clone(),
            ledger: self.ledger.clone(),
            dao: self.dao.clone(),
            store: self.store.clone(),
        })
    }
}

/// A phase graded on passoff tests only: 125 possible points, pass at 70 %.
pub fn passoff_only_phase() -> PhaseConfig {
    PhaseConfig {
        graded: true,
        rubric: RubricConfig {
            passoff: Some(RubricConfigItem {
                category: "Web API Works".to_string(),
                criteria: "All passoff tests pass".to_string(),
                possible_points: 125.0,
                ledger_item_id: "_5202".to_string(),
            }),
            unit_tests: None,
            quality: None,
        },
        extra_credit_value: 0.02,
        previous_phase: None,
        pass_rule: PassRule::PassoffAtLeast(0.7),
    }
}

/// A minimal graded submission for seeding the DAO.
pub fn graded_submission(
    submitter_id: &str,
    phase: Phase,
    head_hash: &str,
    passed: bool,
    verdict: Option<VerificationVerdict>,
    verified_status: Option<VerifiedStatus>,
    hand_in_time: DateTime<Utc>,
) -> Submission {
    Submission {
        submitter_id: submitter_id.to_string(),
        repo_url: REPO_URL.to_string(),
        head_hash: head_hash.to_string(),
        hand_in_time,
        phase,
        passed,
        final_score: if passed { 1.0 } else { 0.0 },
        commit_count: 12,
        notes: String::new(),
        rubric: Rubric {
            passoff: None,
            unit_tests: None,
            quality: None,
            verification: verdict,
            passed,
            notes: String::new(),
        },
        verified_status,
    }
}

pub fn clean_verdict(head_hash: &str) -> VerificationVerdict {
    VerificationVerdict {
        verified: true,
        reused_prior_decision: false,
        total_commits: 12,
        days_with_commits: 4,
        message: None,
        window_start: Some(Utc::now() - Duration::days(14)),
        window_end: Some(Utc::now() - Duration::days(7)),
        head_hash: head_hash.to_string(),
        tail_hash: None,
    }
}
