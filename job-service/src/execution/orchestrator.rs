// Job Orchestrator
// Entry point of the engine: validates, resolves, stages and launches jobs

use crate::config::EngineConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::handle::{JobHandle, JobOutcome, SubmitMode, Submission};
use crate::execution::supervisor::Supervisor;
use crate::job::{validate_spec, JobId, JobSpec};
use crate::resolver::{LocalResolver, LocationResolver, ResolutionError};
use crate::runners::process::{ProcessConfig, ProcessRunner};
use crate::runners::strategy::{self, RunnerStrategy};
use crate::runners::RunnerRegistry;
use crate::tracker::{JobSnapshot, LifecycleTracker};
use crate::workspace::{ManifestInput, Workspace, WorkspaceManager, WorkspaceManifest};

use chrono::Utc;
use futures::future::{join_all, try_join_all};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Local paths for every reference of a spec
#[derive(Debug, Clone)]
struct ResolvedRefs {
    code: PathBuf,
    inputs: BTreeMap<String, PathBuf>,
    output: Option<PathBuf>,
}

/// Runs jobs in isolated workspaces
pub struct JobOrchestrator {
    config: EngineConfig,
    resolver: Arc<dyn LocationResolver>,
    workspaces: WorkspaceManager,
    runners: Arc<RunnerRegistry>,
    tracker: Arc<LifecycleTracker>,
    process: ProcessRunner,
    event_tx: Option<ProgressSender>,
}

impl JobOrchestrator {
    /// Create an orchestrator resolving local paths only
    pub fn new(config: EngineConfig) -> ServiceResult<Self> {
        config.validate()?;
        let workspaces = WorkspaceManager::new(config.job_dir_root.clone())
            .with_input_staging(config.input_staging);
        let process = ProcessRunner::new(ProcessConfig::from(&config));
        Ok(Self {
            config,
            resolver: Arc::new(LocalResolver::new()),
            workspaces,
            runners: Arc::new(RunnerRegistry::new()),
            tracker: Arc::new(LifecycleTracker::new()),
            process,
            event_tx: None,
        })
    }

    /// Use a different location resolver
    pub fn with_resolver(mut self, resolver: impl LocationResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Use a custom language registry
    pub fn with_runners(mut self, runners: RunnerRegistry) -> Self {
        self.runners = Arc::new(runners);
        self
    }

    /// Share a tracker with other components
    pub fn with_tracker(mut self, tracker: Arc<LifecycleTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<LifecycleTracker> {
        &self.tracker
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Submit one job.
    ///
    /// Errors are returned only when no job could be created (invalid spec,
    /// unresolvable reference, workspace failure). Once the job exists, any
    /// failure is recorded on it and this returns `Ok`.
    pub async fn submit(&self, spec: JobSpec, mode: SubmitMode) -> ServiceResult<Submission> {
        self.submit_limited(spec, mode, None).await
    }

    /// Submit several jobs with at most `max_concurrency` running at once
    /// (0 = unlimited).
    ///
    /// Results are in input order; one job's failure does not affect the
    /// others. Jobs waiting for a slot stay `Pending`.
    pub async fn submit_batch(
        &self,
        specs: Vec<JobSpec>,
        max_concurrency: usize,
        mode: SubmitMode,
    ) -> Vec<ServiceResult<Submission>> {
        let permits = match max_concurrency {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };
        let limiter = Arc::new(Semaphore::new(permits));
        tracing::info!(jobs = specs.len(), max_concurrency, "Submitting batch");

        let submissions = specs
            .into_iter()
            .map(|spec| self.submit_limited(spec, mode, Some(limiter.clone())));
        join_all(submissions).await
    }

    /// Request cancellation of a job
    pub async fn cancel(&self, id: JobId) -> ServiceResult<()> {
        self.tracker.request_cancel(id).await
    }

    /// Current snapshot of a job
    pub async fn get(&self, id: JobId) -> ServiceResult<JobSnapshot> {
        self.tracker.get(id).await
    }

    /// Wait for a job to finish
    pub async fn wait(&self, id: JobId) -> ServiceResult<JobOutcome> {
        self.tracker.wait(id).await.map(JobOutcome::from)
    }

    /// Snapshots of every job submitted so far
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.tracker.list().await
    }

    /// Handle to an existing job
    pub fn handle(&self, id: JobId) -> JobHandle {
        JobHandle::new(id, self.tracker.clone())
    }

    async fn submit_limited(
        &self,
        spec: JobSpec,
        mode: SubmitMode,
        limiter: Option<Arc<Semaphore>>,
    ) -> ServiceResult<Submission> {
        let id = self.launch(spec, limiter).await?;
        match mode {
            SubmitMode::Sync => {
                let snapshot = self.tracker.wait(id).await?;
                Ok(Submission::Completed(JobOutcome::from(snapshot)))
            }
            SubmitMode::Async => Ok(Submission::Handle(self.handle(id))),
        }
    }

    /// Create, stage and launch a job; returns once its supervisor is running
    async fn launch(&self, spec: JobSpec, limiter: Option<Arc<Semaphore>>) -> ServiceResult<JobId> {
        validate_spec(&spec)?;
        self.runners.check(&spec)?;

        let resolved = self.resolve_all(&spec).await?;

        let id = JobId::new();
        let workspace = {
            let workspaces = self.workspaces.clone();
            tokio::task::spawn_blocking(move || workspaces.create(id))
                .await
                .map_err(|e| ServiceError::Workspace(join_failure(&self.workspaces, id, e)))??
        };
        self.tracker
            .register(id, spec.clone(), workspace.root().to_path_buf())
            .await?;

        tracing::info!(
            job_id = %id,
            name = %spec.name,
            language = %spec.language,
            workspace = %workspace.root().display(),
            "Job submitted"
        );
        self.event_tx.send_event(ExecutionEvent::job_queued(
            id,
            spec.name.clone(),
            workspace.root(),
        ));

        let strategy = match self.prepare(&spec, &workspace, &resolved).await {
            Ok(strategy) => strategy,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Job preparation failed");
                self.event_tx
                    .send_event(ExecutionEvent::error(e.to_string(), Some(id)));
                self.tracker.record_failure(id, e.to_string(), None).await?;
                if let Ok(snapshot) = self.tracker.get(id).await {
                    self.event_tx.send_event(ExecutionEvent::job_completed(
                        id,
                        snapshot.name,
                        snapshot.state,
                        None,
                        None,
                    ));
                }
                return Ok(id);
            }
        };

        let supervisor = Supervisor {
            id,
            name: spec.name.clone(),
            strategy,
            workspace,
            workspaces: self.workspaces.clone(),
            tracker: self.tracker.clone(),
            process: self.process.clone(),
            timeout: spec.timeout.or(self.config.default_timeout),
            publish_to: resolved.output.filter(|_| self.config.publish_outputs),
            limiter,
            events: self.event_tx.clone(),
        };
        let tracker = self.tracker.clone();
        let events = self.event_tx.clone();
        let task = tokio::spawn(supervisor.run());
        tokio::spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(job_id = %id, error = %e, "Job supervisor aborted");
                let message = format!("Job supervisor aborted: {}", e);
                if matches!(tracker.record_failure(id, message, None).await, Ok(true)) {
                    if let Ok(snapshot) = tracker.get(id).await {
                        events.send_event(ExecutionEvent::job_completed(
                            id,
                            snapshot.name.clone(),
                            snapshot.state,
                            snapshot.duration(),
                            snapshot.exit_code,
                        ));
                    }
                }
            }
        });

        Ok(id)
    }

    /// Resolve code, inputs and output concurrently on the blocking pool
    async fn resolve_all(&self, spec: &JobSpec) -> ServiceResult<ResolvedRefs> {
        let code = self.resolve(spec.code.clone(), false);
        let inputs = try_join_all(spec.inputs.iter().map(|(name, reference)| {
            let name = name.clone();
            let lookup = self.resolve(reference.clone(), false);
            async move { lookup.await.map(|path| (name, path)) }
        }));
        let output = async {
            match &spec.output {
                Some(reference) => self.resolve(reference.clone(), true).await.map(Some),
                None => Ok(None),
            }
        };

        let (code, inputs, output) = tokio::try_join!(code, inputs, output)?;
        Ok(ResolvedRefs {
            code,
            inputs: inputs.into_iter().collect(),
            output,
        })
    }

    async fn resolve(&self, reference: String, output: bool) -> Result<PathBuf, ResolutionError> {
        let resolver = self.resolver.clone();
        let task_reference = reference.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            if output {
                resolver.resolve_output(&task_reference)
            } else {
                resolver.resolve(&task_reference)
            }
        })
        .await
        .map_err(|e| ResolutionError::Io {
            reference: reference.clone(),
            source: io::Error::new(io::ErrorKind::Other, e.to_string()),
        })?;

        if let Ok(path) = &resolved {
            tracing::debug!(reference = %reference, path = %path.display(), "Reference resolved");
        }
        resolved
    }

    /// Stage code and inputs, write the manifest and compute the strategy
    async fn prepare(
        &self,
        spec: &JobSpec,
        workspace: &Workspace,
        resolved: &ResolvedRefs,
    ) -> ServiceResult<RunnerStrategy> {
        let workspaces = self.workspaces.clone();
        let runners = self.runners.clone();
        let spec = spec.clone();
        let workspace = workspace.clone();
        let resolved = resolved.clone();

        tokio::task::spawn_blocking(move || {
            workspaces.stage_code(&workspace, &resolved.code)?;
            let staged = workspaces.stage_inputs(&workspace, &resolved.inputs)?;

            let environment = strategy::job_environment(&spec, &workspace, &staged)
                .into_keys()
                .collect();
            let inputs = staged
                .iter()
                .map(|(name, path)| {
                    let reference = spec.inputs.get(name).cloned().unwrap_or_default();
                    (
                        name.clone(),
                        ManifestInput {
                            reference,
                            staged: path.clone(),
                        },
                    )
                })
                .collect();
            workspaces.write_manifest(
                &workspace,
                &WorkspaceManifest {
                    job_id: workspace.id(),
                    name: spec.name.clone(),
                    language: spec.language.clone(),
                    code: spec.code.clone(),
                    inputs,
                    output: spec.output.clone(),
                    environment,
                    created_at: Utc::now(),
                },
            )?;

            runners.dispatch(&spec, &workspace, &staged)
        })
        .await
        .map_err(|e| ServiceError::ProcessLaunch {
            program: String::new(),
            reason: format!("job preparation panicked: {}", e),
        })?
    }
}

fn join_failure(
    workspaces: &WorkspaceManager,
    id: JobId,
    error: tokio::task::JoinError,
) -> crate::workspace::WorkspaceError {
    crate::workspace::WorkspaceError::Io {
        path: workspaces.workspace_for(id).root().to_path_buf(),
        source: io::Error::new(io::ErrorKind::Other, error.to_string()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::runners::LanguageRunner;
    use crate::tracker::JobState;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    struct Fixture {
        root: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
            Self {
                root: tempfile::tempdir().unwrap(),
            }
        }

        fn jobs_dir(&self) -> PathBuf {
            self.root.path().join("jobs")
        }

        fn orchestrator(&self) -> JobOrchestrator {
            let config = EngineConfig::new(self.jobs_dir())
                .with_kill_grace_period(Duration::from_millis(500));
            JobOrchestrator::new(config).unwrap()
        }

        /// Write a code directory holding `files` and return its path
        fn code(&self, name: &str, files: &[(&str, &str)]) -> String {
            let dir = self.root.path().join("src").join(name);
            fs::create_dir_all(&dir).unwrap();
            for (file, content) in files {
                fs::write(dir.join(file), content).unwrap();
            }
            dir.to_string_lossy().into_owned()
        }

        fn file(&self, name: &str, content: &str) -> String {
            let path = self.root.path().join("data").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            path.to_string_lossy().into_owned()
        }
    }

    fn subdirs(path: &Path) -> Vec<String> {
        let mut dirs: Vec<String> = fs::read_dir(path)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().unwrap().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        dirs.sort();
        dirs
    }

    async fn run_sync(orchestrator: &JobOrchestrator, spec: JobSpec) -> JobOutcome {
        match orchestrator.submit(spec, SubmitMode::Sync).await.unwrap() {
            Submission::Completed(outcome) => outcome,
            Submission::Handle(_) => panic!("sync submit returned a handle"),
        }
    }

    #[tokio::test]
    async fn test_sync_submit_returns_terminal_state() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("hello", &[("run.sh", "echo hello\n")]);

        let outcome = run_sync(&orchestrator, JobSpec::new("hello", code, "bash")).await;
        assert!(outcome.state().is_terminal());
        assert_eq!(outcome.state(), JobState::Completed);
        assert_eq!(outcome.snapshot.exit_code, Some(0));
        assert_eq!(outcome.snapshot.stdout, "hello");

        let first = orchestrator.get(outcome.id()).await.unwrap();
        let second = orchestrator.get(outcome.id()).await.unwrap();
        assert_eq!(first.state, outcome.state());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_train_test_inputs_scenario() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("echo", &[("run.sh", "cat \"$TRAIN\" \"$TEST\"\n")]);
        let train = fixture.file("a.csv", "train-data");
        let test = fixture.file("b.csv", "test-data");

        let spec = JobSpec::new("train", code, "bash")
            .with_input("TRAIN", train)
            .with_input("TEST", test);
        let outcome = run_sync(&orchestrator, spec).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert_eq!(outcome.snapshot.exit_code, Some(0));
        assert_eq!(outcome.snapshot.stdout, "train-data\ntest-data");

        let inputs = outcome.snapshot.workspace.join("inputs");
        let mut staged: Vec<String> = fs::read_dir(&inputs)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        staged.sort();
        assert_eq!(staged, vec!["a.csv", "b.csv"]);
        assert_eq!(fs::read_to_string(inputs.join("a.csv")).unwrap(), "train-data");
    }

    #[tokio::test]
    async fn test_output_dir_is_injected() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code(
            "env",
            &[(
                "run.sh",
                "echo \"$OUTPUT_DIR\"\necho result > \"$OUTPUT_DIR/result.txt\"\n",
            )],
        );

        let outcome = run_sync(&orchestrator, JobSpec::new("env", code, "bash")).await;
        let outputs_dir = outcome.snapshot.workspace.join("outputs");
        assert_eq!(outcome.snapshot.stdout, outputs_dir.to_string_lossy());
        assert!(Path::new(&outcome.snapshot.stdout).starts_with(&outcome.snapshot.workspace));
        assert_eq!(outcome.outputs, vec![outputs_dir.join("result.txt")]);
        assert_eq!(outcome.snapshot.outputs, vec![PathBuf::from("result.txt")]);
    }

    #[tokio::test]
    async fn test_concurrent_workspaces_are_disjoint_and_persist() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("sleepy", &[("run.sh", "sleep 0.2\n")]);

        let (a, b) = tokio::join!(
            orchestrator.submit(JobSpec::new("a", code.clone(), "bash"), SubmitMode::Async),
            orchestrator.submit(JobSpec::new("b", code, "bash"), SubmitMode::Async),
        );
        let a = a.unwrap().into_outcome().await.unwrap();
        let b = b.unwrap().into_outcome().await.unwrap();

        assert_ne!(a.snapshot.workspace, b.snapshot.workspace);
        for outcome in [&a, &b] {
            assert_eq!(outcome.state(), JobState::Completed);
            assert!(outcome.snapshot.workspace.starts_with(fixture.jobs_dir()));
            assert_eq!(
                subdirs(&outcome.snapshot.workspace),
                vec!["code", "inputs", "outputs"]
            );
            assert!(outcome.snapshot.workspace.join("job.yaml").is_file());
        }
    }

    #[tokio::test]
    async fn test_failing_setup_skips_entrypoint() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code(
            "setup",
            &[
                ("setup.sh", "echo preparing\nexit 1\n"),
                ("run.sh", "touch \"$OUTPUT_DIR/marker\"\n"),
            ],
        );

        let spec = JobSpec::new("setup", code, "bash").with_setup("setup.sh");
        let outcome = run_sync(&orchestrator, spec).await;

        assert_eq!(outcome.state(), JobState::Failed);
        assert!(!outcome.snapshot.workspace.join("outputs/marker").exists());
        assert!(outcome.snapshot.message.unwrap().contains("setup"));
        assert_eq!(outcome.snapshot.stdout, "preparing");
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_noop() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("quick", &[("run.sh", "exit 0\n")]);

        let outcome = run_sync(&orchestrator, JobSpec::new("quick", code, "bash")).await;
        let before = orchestrator.get(outcome.id()).await.unwrap();
        orchestrator.cancel(outcome.id()).await.unwrap();
        orchestrator.cancel(outcome.id()).await.unwrap();
        assert_eq!(orchestrator.get(outcome.id()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("long", &[("run.sh", "sleep 10\n")]);

        let submission = orchestrator
            .submit(JobSpec::new("long", code, "bash"), SubmitMode::Async)
            .await
            .unwrap();
        let Submission::Handle(handle) = submission else {
            panic!("async submit returned an outcome");
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel().await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.state(), JobState::Cancelled);
        assert!(outcome.snapshot.cancel_requested);
    }

    #[tokio::test]
    async fn test_batch_respects_concurrency_limit() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let active = fixture.root.path().join("active");
        let counts = fixture.root.path().join("counts");
        fs::create_dir_all(&active).unwrap();
        fs::create_dir_all(&counts).unwrap();

        let script = "touch \"$ACTIVE/$JOB_ID\"\n\
                      ls \"$ACTIVE\" | wc -l > \"$COUNTS/$JOB_ID\"\n\
                      sleep 0.3\n\
                      rm \"$ACTIVE/$JOB_ID\"\n";
        let code = fixture.code("batch", &[("run.sh", script)]);

        let specs: Vec<JobSpec> = (0..5)
            .map(|i| {
                JobSpec::new(format!("job-{}", i), code.clone(), "bash")
                    .with_env("ACTIVE", active.to_string_lossy())
                    .with_env("COUNTS", counts.to_string_lossy())
            })
            .collect();

        let results = orchestrator.submit_batch(specs, 2, SubmitMode::Sync).await;
        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            let outcome = result.as_ref().unwrap().outcome().unwrap();
            assert_eq!(outcome.snapshot.name, format!("job-{}", i));
            assert_eq!(outcome.state(), JobState::Completed);
        }

        let observed: Vec<usize> = fs::read_dir(&counts)
            .unwrap()
            .map(|e| {
                fs::read_to_string(e.unwrap().path())
                    .unwrap()
                    .trim()
                    .parse()
                    .unwrap()
            })
            .collect();
        assert_eq!(observed.len(), 5);
        assert!(observed.iter().all(|&n| (1..=2).contains(&n)));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let good = fixture.code("good", &[("run.sh", "exit 0\n")]);

        let specs = vec![
            JobSpec::new("good", good.clone(), "bash"),
            JobSpec::new("missing", "/nonexistent/code/dir", "bash"),
            JobSpec::new("bad-exit", fixture.code("bad", &[("run.sh", "exit 4\n")]), "bash"),
        ];
        let results = orchestrator.submit_batch(specs, 1, SubmitMode::Sync).await;

        assert_eq!(
            results[0].as_ref().unwrap().outcome().unwrap().state(),
            JobState::Completed
        );
        assert!(matches!(results[1], Err(ServiceError::Resolution(_))));
        let failed = results[2].as_ref().unwrap().outcome().unwrap();
        assert_eq!(failed.state(), JobState::Failed);
        assert_eq!(failed.snapshot.exit_code, Some(4));
    }

    #[tokio::test]
    async fn test_cancel_queued_batch_job() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("slow", &[("run.sh", "sleep 1\n")]);

        let specs = vec![
            JobSpec::new("first", code.clone(), "bash"),
            JobSpec::new("second", code, "bash"),
        ];
        let results = orchestrator.submit_batch(specs, 1, SubmitMode::Async).await;
        let handles: Vec<JobHandle> = results
            .into_iter()
            .map(|r| match r.unwrap() {
                Submission::Handle(handle) => handle,
                Submission::Completed(_) => panic!("async batch returned an outcome"),
            })
            .collect();

        let mut running = None;
        for _ in 0..100 {
            for (i, handle) in handles.iter().enumerate() {
                if handle.snapshot().await.unwrap().state == JobState::Running {
                    running = Some(i);
                }
            }
            if running.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let queued = &handles[1 - running.unwrap()];
        assert_eq!(queued.snapshot().await.unwrap().state, JobState::Pending);

        queued.cancel().await.unwrap();
        let outcome = queued.wait().await.unwrap();
        assert_eq!(outcome.state(), JobState::Cancelled);
        assert!(outcome.snapshot.started_at.is_none());

        for handle in &handles {
            handle.wait().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unresolvable_code_creates_nothing() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();

        let spec = JobSpec::new("ghost", "/nonexistent/path/to/code", "bash");
        let err = orchestrator.submit(spec, SubmitMode::Sync).await.unwrap_err();

        assert!(matches!(err, ServiceError::Resolution(_)));
        assert!(orchestrator.jobs().await.is_empty());
        let created = fs::read_dir(fixture.jobs_dir())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(created, 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_rejected() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("cobol", &[("main.cbl", "")]);

        let err = orchestrator
            .submit(JobSpec::new("cobol", code, "cobol"), SubmitMode::Sync)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedLanguage(_)));
        assert!(orchestrator.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code(
            "sleeper",
            &[("run.sh", "echo $$ > \"$OUTPUT_DIR/pid\"\nsleep 10\n")],
        );

        let spec = JobSpec::new("sleeper", code, "bash").with_timeout(Duration::from_secs(1));
        let started = std::time::Instant::now();
        let outcome = run_sync(&orchestrator, spec).await;

        assert_eq!(outcome.state(), JobState::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(8));

        let pid: libc::pid_t = fs::read_to_string(outcome.snapshot.workspace.join("outputs/pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_ne!(unsafe { libc::kill(pid, 0) }, 0);
    }

    #[tokio::test]
    async fn test_timeout_covers_setup() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code(
            "slow-setup",
            &[
                ("setup.sh", "sleep 10\n"),
                ("run.sh", "touch \"$OUTPUT_DIR/marker\"\n"),
            ],
        );

        let spec = JobSpec::new("slow-setup", code, "bash")
            .with_setup("setup.sh")
            .with_timeout(Duration::from_secs(1));
        let started = std::time::Instant::now();
        let outcome = run_sync(&orchestrator, spec).await;

        assert_eq!(outcome.state(), JobState::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(8));
        assert!(!outcome.snapshot.workspace.join("outputs/marker").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_setup() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code(
            "cancel-setup",
            &[
                ("setup.sh", "sleep 10\n"),
                ("run.sh", "touch \"$OUTPUT_DIR/marker\"\n"),
            ],
        );

        let spec = JobSpec::new("cancel-setup", code, "bash").with_setup("setup.sh");
        let Submission::Handle(handle) = orchestrator.submit(spec, SubmitMode::Async).await.unwrap()
        else {
            panic!("async submit returned an outcome");
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel().await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.state(), JobState::Cancelled);
        assert!(!outcome.snapshot.workspace.join("outputs/marker").exists());
    }

    #[tokio::test]
    async fn test_huge_timeout_still_completes() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("patient", &[("run.sh", "exit 0\n")]);

        let spec = JobSpec::new("patient", code, "bash")
            .with_timeout(Duration::from_secs(u64::MAX / 2));
        let outcome = tokio::time::timeout(Duration::from_secs(10), run_sync(&orchestrator, spec))
            .await
            .unwrap();

        assert_eq!(outcome.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn test_publish_failure_fails_job() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code(
            "clash",
            &[(
                "run.sh",
                "mkdir -p \"$OUTPUT_DIR/report\"\necho done > \"$OUTPUT_DIR/report/summary.txt\"\n",
            )],
        );
        // A plain file where the published directory has to go
        let destination = fixture.root.path().join("results");
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("report"), "in the way").unwrap();

        let spec = JobSpec::new("clash", code, "bash").with_output(destination.to_string_lossy());
        let outcome = run_sync(&orchestrator, spec).await;

        assert_eq!(outcome.state(), JobState::Failed);
        assert!(outcome
            .snapshot
            .message
            .unwrap()
            .contains("Output handling failed"));
        assert!(outcome
            .snapshot
            .workspace
            .join("outputs/report/summary.txt")
            .is_file());
    }

    #[tokio::test]
    async fn test_entrypoint_missing_fails_job() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("empty", &[("README", "nothing to run")]);

        let outcome = run_sync(&orchestrator, JobSpec::new("empty", code, "python")).await;
        assert_eq!(outcome.state(), JobState::Failed);
        assert!(outcome.snapshot.message.unwrap().contains("main.py"));
        assert!(outcome.snapshot.started_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_job() {
        let fixture = Fixture::new();
        let runners = RunnerRegistry::new().with_language(LanguageRunner::interpreted(
            "fancy",
            "main.fy",
            &["definitely-missing-interpreter"],
        ));
        let orchestrator = fixture.orchestrator().with_runners(runners);
        let code = fixture.code("fancy", &[("main.fy", "")]);

        let outcome = run_sync(&orchestrator, JobSpec::new("fancy", code, "fancy")).await;
        assert_eq!(outcome.state(), JobState::Failed);
        assert!(outcome.snapshot.message.unwrap().contains("not found on PATH"));
    }

    #[tokio::test]
    async fn test_outputs_published_on_success() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator();
        let code = fixture.code("publish", &[("run.sh", "echo 42 > \"$OUTPUT_DIR/answer.txt\"\n")]);
        let destination = fixture.root.path().join("results/run1");

        let spec = JobSpec::new("publish", code, "bash")
            .with_output(destination.to_string_lossy());
        let outcome = run_sync(&orchestrator, spec).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert_eq!(
            fs::read_to_string(destination.join("answer.txt")).unwrap().trim(),
            "42"
        );
    }

    #[tokio::test]
    async fn test_archive_code_and_mirror_resolver() {
        let fixture = Fixture::new();
        let mirror = fixture.root.path().join("mirror");
        fs::create_dir_all(mirror.join("datasets")).unwrap();
        fs::write(mirror.join("datasets/numbers.txt"), "1 2 3").unwrap();

        let bundle = mirror.join("bundle.zip");
        {
            use std::io::Write;
            let mut writer = zip::ZipWriter::new(fs::File::create(&bundle).unwrap());
            writer
                .start_file("main.sh", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"cat \"$NUMBERS\"\n").unwrap();
            writer.finish().unwrap();
        }

        let orchestrator = fixture
            .orchestrator()
            .with_resolver(crate::resolver::MirrorResolver::new("syft", &mirror));
        let spec = JobSpec::new("mirror", "syft://bundle.zip", "bash")
            .with_entrypoint("main.sh")
            .with_input("NUMBERS", "syft://datasets/numbers.txt");
        let outcome = run_sync(&orchestrator, spec).await;

        assert_eq!(outcome.state(), JobState::Completed);
        assert_eq!(outcome.snapshot.stdout, "1 2 3");

        let manifest = orchestrator
            .workspaces()
            .read_manifest(&orchestrator.workspaces().workspace_for(outcome.id()))
            .unwrap();
        assert_eq!(manifest.inputs["NUMBERS"].reference, "syft://datasets/numbers.txt");
        assert!(manifest.environment.contains(&"OUTPUT_DIR".to_string()));
    }

    #[tokio::test]
    async fn test_progress_events() {
        let fixture = Fixture::new();
        let (tx, mut rx) = progress_channel();
        let orchestrator = fixture.orchestrator().with_progress(tx);
        let code = fixture.code("events", &[("run.sh", "echo one\n")]);

        let outcome = run_sync(&orchestrator, JobSpec::new("events", code, "bash")).await;
        drop(orchestrator);

        let mut events = Vec::new();
        while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            match event {
                Some(event) => events.push(event),
                None => break,
            }
        }

        assert!(matches!(events.first(), Some(ExecutionEvent::JobQueued { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::JobOutput { output, is_error: false, .. } if output == "one"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ExecutionEvent::JobCompleted { state: JobState::Completed, .. }
        )));
        assert!(events.iter().all(|e| e.job_id() == Some(outcome.id())));
    }
}
