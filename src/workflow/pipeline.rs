use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agent::templates::{self, TemplateSet, TemplateVars};
use crate::agent::{AgentInvoker, AgentResult, AgentRunner};
use crate::artifacts::{ArtifactStore, PLAN_FILE, POST_CHECK_FILE};
use crate::config::{AppConfig, PostCheckPolicy};
use crate::environment::{self, ExecutionEnvironment};
use crate::error::{AppError, Result};
use crate::exit_codes;
use crate::platform::types::{CommentId, CreatePullRequest, PullRequest, Ticket};
use crate::platform::Platform;
use crate::workflow::classify::parse_classification;
use crate::workflow::naming;
use crate::workflow::plan::PlanSnapshot;
use crate::workflow::post_check::run_post_check;
use crate::workflow::progress;
use crate::workflow::types::{Classification, Stage, StageOutput, WorkflowOutcome, WorkflowRun};
use crate::workspace::Workspace;

/// Collaborators injected into the orchestrator.
pub struct PipelineDeps {
    pub platform: Arc<dyn Platform>,
    pub agent: Arc<dyn AgentRunner>,
    pub env: Arc<dyn ExecutionEnvironment>,
}

/// How a run ended, with the final run record.
#[derive(Debug)]
pub struct RunReport {
    pub run: WorkflowRun,
    pub outcome: WorkflowOutcome,
    pub exit_code: i32,
}

struct BranchInfo {
    name: String,
    base_commit: String,
}

struct PlanDraft {
    snapshot: PlanSnapshot,
    reply: String,
}

/// Drives one ticket through classify, branch, plan, resolvePlan, implement
/// and openPR, keeping a single progress comment up to date.
pub struct Orchestrator {
    config: AppConfig,
    run_id: String,
    checkout: PathBuf,
    token: String,
    run_url: Option<String>,
    platform: Arc<dyn Platform>,
    env: Arc<dyn ExecutionEnvironment>,
    invoker: AgentInvoker,
    templates: TemplateSet,
    store: ArtifactStore,
}

fn template_vars<const N: usize>(pairs: [(&str, String); N]) -> TemplateVars {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl Orchestrator {
    /// `run_id` must already be reserved in the artifact store.
    pub fn new(
        config: AppConfig,
        run_id: &str,
        checkout: &Path,
        token: String,
        deps: PipelineDeps,
    ) -> Result<Self> {
        let templates = TemplateSet::load(config.agent.templates_dir.as_deref())?;
        let store = ArtifactStore::new(config.artifacts_root(checkout));
        let invoker = AgentInvoker::new(deps.agent, store.clone(), run_id, checkout.to_path_buf());

        Ok(Self {
            run_url: deps.env.run_url(),
            config,
            run_id: run_id.to_string(),
            checkout: checkout.to_path_buf(),
            token,
            platform: deps.platform,
            env: deps.env,
            invoker,
            templates,
            store,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run the whole pipeline for `ticket_number`.
    ///
    /// When `cancel` resolves first, the in-flight stage is dropped (killing
    /// any agent process) and the run is recorded as cancelled.
    pub async fn run(&self, ticket_number: u64, cancel: impl Future<Output = String>) -> RunReport {
        let started = Instant::now();
        let mut run = WorkflowRun::new(&self.run_id, ticket_number);
        let mut comment = None;

        tracing::info!(run_id = %self.run_id, ticket = ticket_number, "Starting run");

        let result = tokio::select! {
            result = self.execute(&mut run, &mut comment) => result,
            reason = cancel => Err(AppError::Cancelled(reason)),
        };

        let report = match result {
            Ok(()) => self.conclude_success(run).await,
            Err(e) => self.conclude_failure(run, comment, e).await,
        };

        tracing::info!(
            run_id = %self.run_id,
            exit_code = report.exit_code,
            elapsed_secs = started.elapsed().as_secs(),
            "Run finished"
        );
        report
    }

    async fn execute(&self, run: &mut WorkflowRun, comment: &mut Option<CommentId>) -> Result<()> {
        let mut workspace = Workspace::acquire(&self.checkout)?;
        workspace.exclude(self.store.root());
        self.invoker.ensure_available().await?;

        let ticket = self.platform.fetch_ticket(run.ticket_number).await?;
        tracing::info!(ticket = ticket.number, title = %ticket.title, "Fetched ticket");
        run.ticket = Some(ticket.clone());

        let body = progress::progress_comment(run, self.run_url.as_deref());
        let id = self.platform.create_comment(ticket.number, &body).await?;
        *comment = Some(id);
        tracing::info!(comment = %id, "Created progress comment");

        let classification = self
            .stage(run, id, Stage::Classify, self.classify(&ticket))
            .await?;
        run.classification = Some(classification);

        let branch = self
            .stage(
                run,
                id,
                Stage::Branch,
                self.branch(&workspace, &ticket, classification),
            )
            .await?;
        run.branch = Some(branch.name.clone());
        run.base_commit = Some(branch.base_commit.clone());

        let draft = self
            .stage(
                run,
                id,
                Stage::Plan,
                self.plan(&workspace, &ticket, classification, &branch.name),
            )
            .await?;

        let plan_path = self
            .stage(
                run,
                id,
                Stage::ResolvePlan,
                self.resolve_plan(&workspace, &draft),
            )
            .await?;
        run.plan_path = Some(plan_path.clone());

        self.stage(
            run,
            id,
            Stage::Implement,
            self.implement(&workspace, &ticket, classification, &branch, &plan_path),
        )
        .await?;

        let pr_body = progress::pull_request_body(run, self.run_url.as_deref());
        let pr = self
            .stage(
                run,
                id,
                Stage::OpenPr,
                self.open_pr(&workspace, &ticket, classification, &branch.name, pr_body),
            )
            .await?;
        run.pr_url = Some(pr.url.clone());

        run.finish()?;
        self.publish(run, id).await;
        Ok(())
    }

    /// Run one stage inside a log group, keeping the run record in step.
    async fn stage<T>(
        &self,
        run: &mut WorkflowRun,
        comment: CommentId,
        stage: Stage,
        work: impl Future<Output = Result<StageOutput<T>>>,
    ) -> Result<T> {
        run.begin(stage)?;
        self.publish(run, comment).await;

        let _group = environment::group(self.env.as_ref(), stage.as_str());
        let started = Instant::now();
        tracing::info!(stage = %stage, "Stage started");

        let output = work.await?;
        for warning in &output.warnings {
            self.env.warning(warning);
        }
        run.complete(&output)?;

        tracing::info!(
            stage = %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage completed"
        );
        Ok(output.value)
    }

    async fn invoke(
        &self,
        stage: Stage,
        template_id: &str,
        vars: TemplateVars,
        timeout: Duration,
    ) -> Result<AgentResult> {
        let template = self.templates.get(template_id)?;
        self.invoker
            .invoke(stage.as_str(), template, &vars, timeout)
            .await?
            .require_success(stage.as_str())
    }

    async fn classify(&self, ticket: &Ticket) -> Result<StageOutput<Classification>> {
        let vars = template_vars([
            ("ticket_number", ticket.number.to_string()),
            ("ticket_title", ticket.title.clone()),
            ("ticket_body", ticket.body.clone()),
        ]);
        let result = self
            .invoke(
                Stage::Classify,
                templates::CLASSIFY,
                vars,
                self.config.agent.classify_timeout(),
            )
            .await?;

        let classification = parse_classification(&result.final_text)?;
        tracing::info!(classification = classification.as_str(), "Classified ticket");
        Ok(StageOutput::new(classification)
            .raw_output(result.artifact)
            .result(classification.as_str()))
    }

    async fn branch(
        &self,
        workspace: &Workspace,
        ticket: &Ticket,
        classification: Classification,
    ) -> Result<StageOutput<BranchInfo>> {
        workspace.ensure_clean().await?;

        let name = naming::branch_name(classification, ticket.number, &self.run_id, &ticket.title);
        let base_commit = workspace.head_commit().await?;
        workspace.create_branch(&name).await?;
        tracing::info!(branch = %name, base = %base_commit, "Created branch");

        let artifact = self
            .store
            .write_raw_output(&self.run_id, Stage::Branch.as_str(), &format!("{name}\n"))
            .await?;
        Ok(StageOutput::new(BranchInfo {
            name: name.clone(),
            base_commit,
        })
        .raw_output(artifact)
        .result(name))
    }

    async fn plan(
        &self,
        workspace: &Workspace,
        ticket: &Ticket,
        classification: Classification,
        branch: &str,
    ) -> Result<StageOutput<PlanDraft>> {
        let plan_dir = &self.config.pipeline.plan_dir;
        let snapshot = PlanSnapshot::capture(workspace.path(), plan_dir)?;

        let vars = template_vars([
            ("ticket_number", ticket.number.to_string()),
            ("ticket_title", ticket.title.clone()),
            ("ticket_body", ticket.body.clone()),
            ("branch_name", branch.to_string()),
            ("plan_dir", plan_dir.display().to_string()),
            ("run_id", self.run_id.clone()),
        ]);
        let result = self
            .invoke(
                Stage::Plan,
                classification.plan_template(),
                vars,
                self.config.agent.plan_timeout(),
            )
            .await?;

        Ok(StageOutput::new(PlanDraft {
            snapshot,
            reply: result.final_text,
        })
        .raw_output(result.artifact))
    }

    async fn resolve_plan(
        &self,
        workspace: &Workspace,
        draft: &PlanDraft,
    ) -> Result<StageOutput<PathBuf>> {
        let path = draft.snapshot.resolve(&draft.reply)?;
        tracing::info!(plan = %path.display(), "Resolved plan document");

        let contents = tokio::fs::read(workspace.path().join(&path)).await?;
        let stage = Stage::ResolvePlan.as_str();
        self.store
            .write_once(&self.run_id, stage, PLAN_FILE, &contents)
            .await?;
        let artifact = self
            .store
            .write_raw_output(&self.run_id, stage, &format!("{}\n", path.display()))
            .await?;

        let shown = path.display().to_string();
        Ok(StageOutput::new(path).raw_output(artifact).result(shown))
    }

    async fn implement(
        &self,
        workspace: &Workspace,
        ticket: &Ticket,
        classification: Classification,
        branch: &BranchInfo,
        plan_path: &Path,
    ) -> Result<StageOutput<()>> {
        let vars = template_vars([
            ("ticket_number", ticket.number.to_string()),
            ("ticket_title", ticket.title.clone()),
            ("plan_path", plan_path.display().to_string()),
            ("branch_name", branch.name.clone()),
            ("run_id", self.run_id.clone()),
            ("commit_type", classification.commit_type().to_string()),
        ]);
        let result = self
            .invoke(
                Stage::Implement,
                templates::IMPLEMENT,
                vars,
                self.config.agent.implement_timeout(),
            )
            .await?;

        let message =
            naming::commit_message(classification, ticket.number, &ticket.title, &self.run_id);
        workspace.commit_pending(&message).await?;

        let commits = workspace.commits_since(&branch.base_commit).await?;
        if commits.is_empty() {
            return Err(AppError::Agent(format!(
                "Implementation left no commits on {}",
                branch.name
            )));
        }
        tracing::info!(commits = commits.len(), "Implementation committed");

        let mut output = StageOutput::new(())
            .raw_output(result.artifact)
            .result(format!("{} commit(s)", commits.len()));

        let untraced: Vec<&str> = commits
            .iter()
            .filter(|c| !naming::has_run_trailer(&c.message, &self.run_id))
            .map(|c| c.short_id())
            .collect();
        if !untraced.is_empty() {
            tracing::warn!(commits = ?untraced, "Agent commits lack the run trailer");
            output.warnings.push(format!(
                "{} commit(s) lack the `{}: {}` trailer: {}",
                untraced.len(),
                naming::RUN_TRAILER,
                self.run_id,
                untraced.join(", ")
            ));
        }
        if let Some(warning) = self.post_check(workspace).await? {
            output.warnings.push(warning);
        }
        Ok(output)
    }

    /// Run the configured check. A failure is either returned as a warning
    /// or, under the `fail` policy, as an error.
    async fn post_check(&self, workspace: &Workspace) -> Result<Option<String>> {
        let check = &self.config.pipeline.post_check;
        let Some(command) = check.command.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(None);
        };

        let outcome = run_post_check(
            command,
            workspace.path(),
            Duration::from_secs(check.timeout_secs),
        )
        .await?;
        if !outcome.output.is_empty() {
            self.store
                .write_once(
                    &self.run_id,
                    Stage::Implement.as_str(),
                    POST_CHECK_FILE,
                    outcome.output.as_bytes(),
                )
                .await?;
        }

        if outcome.passed {
            tracing::info!(summary = %outcome.summary, "Post-implementation check passed");
            return Ok(None);
        }

        match check.policy {
            PostCheckPolicy::Warn => {
                tracing::warn!(summary = %outcome.summary, "Post-implementation check failed");
                Ok(Some(format!(
                    "Post-implementation check failed: {}",
                    outcome.summary
                )))
            }
            PostCheckPolicy::Fail => Err(AppError::PostCheckFailed(outcome.summary)),
        }
    }

    async fn open_pr(
        &self,
        workspace: &Workspace,
        ticket: &Ticket,
        classification: Classification,
        branch: &str,
        body: String,
    ) -> Result<StageOutput<PullRequest>> {
        workspace.push(branch, &self.token).await?;
        tracing::info!(branch, "Pushed branch");

        let base_branch = match self
            .config
            .github
            .base_branch
            .as_deref()
            .filter(|b| !b.trim().is_empty())
        {
            Some(base) => base.to_string(),
            None => self.platform.default_branch().await?,
        };

        let pr = self
            .platform
            .open_pull_request(&CreatePullRequest {
                title: naming::commit_subject(classification, ticket.number, &ticket.title),
                body,
                head_branch: branch.to_string(),
                base_branch,
            })
            .await?;
        tracing::info!(pr = pr.number, url = %pr.url, "Opened pull request");

        let mut line = serde_json::to_string(&pr)?;
        line.push('\n');
        let artifact = self
            .store
            .write_raw_output(&self.run_id, Stage::OpenPr.as_str(), &line)
            .await?;
        let url = pr.url.clone();
        Ok(StageOutput::new(pr).raw_output(artifact).result(url))
    }

    /// Re-render the progress comment. Failures never abort the run.
    async fn publish(&self, run: &WorkflowRun, comment: CommentId) {
        let body = progress::progress_comment(run, self.run_url.as_deref());
        if let Err(e) = self.platform.edit_comment(comment, &body).await {
            tracing::warn!(comment = %comment, error = %e, "Failed to update progress comment");
        }
    }

    async fn persist(&self, run: &WorkflowRun) {
        match self.store.write_manifest(&self.run_id, run).await {
            Ok(path) => tracing::debug!(manifest = %path.display(), "Wrote run manifest"),
            Err(e) => tracing::warn!(error = %e, "Failed to write run manifest"),
        }
    }

    async fn conclude_success(&self, run: WorkflowRun) -> RunReport {
        let outputs = [
            ("run_id", Some(run.run_id.clone())),
            (
                "classification",
                run.classification.map(|c| c.as_str().to_string()),
            ),
            ("branch_name", run.branch.clone()),
            (
                "plan_path",
                run.plan_path.as_ref().map(|p| p.display().to_string()),
            ),
            ("pr_url", run.pr_url.clone()),
        ];
        for (key, value) in outputs {
            let Some(value) = value else { continue };
            if let Err(e) = self.env.set_output(key, &value) {
                tracing::warn!(key, error = %e, "Failed to emit output");
            }
        }
        if let Err(e) = self.env.write_summary(&progress::job_summary(&run)) {
            tracing::warn!(error = %e, "Failed to write job summary");
        }

        self.persist(&run).await;

        let pr_url = run.pr_url.clone().unwrap_or_default();
        tracing::info!(run_id = %self.run_id, pr_url = %pr_url, "Run completed");
        RunReport {
            run,
            outcome: WorkflowOutcome::Completed { pr_url },
            exit_code: exit_codes::OK,
        }
    }

    async fn conclude_failure(
        &self,
        mut run: WorkflowRun,
        comment: Option<CommentId>,
        error: AppError,
    ) -> RunReport {
        run.fail(&error);
        let stage = run.failed_stage();
        tracing::error!(
            run_id = %self.run_id,
            stage = stage.map(|s| s.as_str()).unwrap_or("setup"),
            error = %error,
            "Run failed"
        );
        self.env
            .error(&format!("Hyphae run {} failed: {error}", self.run_id));

        match comment {
            Some(id) => {
                let body =
                    progress::failure_comment(&run, self.run_url.as_deref(), &self.store.run_dir(&self.run_id));
                if let Err(e) = self.platform.edit_comment(id, &body).await {
                    tracing::warn!(comment = %id, error = %e, "Failed to record failure on progress comment");
                }
            }
            None => tracing::debug!("No progress comment to update"),
        }

        self.persist(&run).await;

        RunReport {
            run,
            outcome: WorkflowOutcome::Failed {
                stage,
                error: error.to_string(),
            },
            exit_code: error.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{MANIFEST_FILE, RAW_OUTPUT_FILE};
    use crate::environment::{Console, EnvMarkers};
    use crate::test_support::{init_repo, FakePlatform, ScriptedAgent};
    use crate::workflow::types::RunState;
    use std::fs;
    use std::sync::Mutex;

    struct Harness {
        checkout: tempfile::TempDir,
        origin: tempfile::TempDir,
        scratch: tempfile::TempDir,
        platform: Arc<FakePlatform>,
        console: Arc<Mutex<Vec<String>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn output_file(&self) -> PathBuf {
            self.scratch.path().join("github_output")
        }

        fn outputs(&self) -> String {
            fs::read_to_string(self.output_file()).unwrap_or_default()
        }

        fn branches(&self) -> Vec<String> {
            let repo = git2::Repository::open(self.checkout.path()).unwrap();
            repo.branches(Some(git2::BranchType::Local))
                .unwrap()
                .map(|b| b.unwrap().0.name().unwrap().unwrap().to_string())
                .collect()
        }
    }

    fn ticket_42() -> Ticket {
        Ticket {
            number: 42,
            title: "Add dark mode toggle".to_string(),
            body: "Users want a dark theme switch in settings.".to_string(),
            author: "octocat".to_string(),
        }
    }

    fn happy_agent() -> ScriptedAgent {
        ScriptedAgent::new()
            .respond("classify", |_| Ok(ScriptedAgent::result_output("/feature")))
            .respond("plan", |req| {
                fs::create_dir_all(req.workdir.join("specs"))?;
                fs::write(req.workdir.join("specs/issue-42-dark-mode.md"), "# Plan\n\n1. Toggle\n")?;
                Ok(ScriptedAgent::result_output("specs/issue-42-dark-mode.md"))
            })
            .respond("implement", |req| {
                fs::write(req.workdir.join("dark_mode.rs"), "pub fn toggle() {}\n")?;
                Ok(ScriptedAgent::result_output("Added the toggle"))
            })
    }

    async fn start(
        agent: ScriptedAgent,
        platform: FakePlatform,
        config: AppConfig,
    ) -> (Harness, Orchestrator) {
        let (checkout, origin) = init_repo();
        let scratch = tempfile::tempdir().unwrap();
        start_in(checkout, origin, scratch, agent, platform, config).await
    }

    async fn start_in(
        checkout: tempfile::TempDir,
        origin: tempfile::TempDir,
        scratch: tempfile::TempDir,
        agent: ScriptedAgent,
        platform: FakePlatform,
        config: AppConfig,
    ) -> (Harness, Orchestrator) {
        let output_file = scratch.path().join("github_output");
        let output_file = output_file.to_str().unwrap().to_string();
        let markers = EnvMarkers::from_pairs([
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_REPOSITORY", "acme/widgets"),
            ("GITHUB_RUN_ID", "99"),
            ("GITHUB_OUTPUT", output_file.as_str()),
        ]);
        let (console, lines) = Console::captured();
        let env = environment::detect(&markers, checkout.path(), console);

        let run_id = ArtifactStore::new(config.artifacts_root(checkout.path()))
            .allocate_run_id()
            .await
            .unwrap();

        let calls = agent.calls();
        let platform = Arc::new(platform);
        let orchestrator = Orchestrator::new(
            config,
            &run_id,
            checkout.path(),
            "test-token".to_string(),
            PipelineDeps {
                platform: platform.clone(),
                agent: Arc::new(agent),
                env,
            },
        )
        .unwrap();

        let harness = Harness {
            checkout,
            origin,
            scratch,
            platform,
            console: lines,
            calls,
        };
        (harness, orchestrator)
    }

    fn never() -> impl Future<Output = String> {
        std::future::pending()
    }

    #[tokio::test]
    async fn test_happy_path_opens_pull_request() {
        let (h, orch) = start(
            happy_agent(),
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;
        let run_id = orch.run_id().to_string();

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::OK, "{:?}", report.outcome);
        assert_eq!(report.run.state, RunState::Done);
        let branch = format!("feat-42-{run_id}-add-dark-mode-toggle");
        assert_eq!(report.run.branch.as_deref(), Some(branch.as_str()));
        assert_eq!(run_id.len(), 8);
        assert!(run_id.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(
            report.run.completed_stages(),
            vec!["classify", "branch", "plan", "resolvePlan", "implement", "openPR"]
        );
        assert_eq!(
            report.run.plan_path,
            Some(PathBuf::from("specs/issue-42-dark-mode.md"))
        );

        // One comment, edited in place at every transition.
        assert_eq!(h.platform.created_comments().len(), 1);
        assert!(h.platform.edits().len() >= Stage::ALL.len());
        assert!(h.platform.last_edit().unwrap().contains("Pull request opened"));

        let prs = h.platform.pull_requests();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].title, "feat: Add dark mode toggle for #42");
        assert_eq!(prs[0].head_branch, branch);
        assert_eq!(prs[0].base_branch, "main");
        assert!(prs[0].body.starts_with("Closes #42"));
        assert!(prs[0].body.contains(&run_id));

        // The branch reached origin with the run trailer on its commit.
        let bare = git2::Repository::open_bare(h.origin.path()).unwrap();
        let pushed = bare.find_branch(&branch, git2::BranchType::Local).unwrap();
        let commit = pushed.get().peel_to_commit().unwrap();
        assert!(commit
            .message()
            .unwrap()
            .contains(&format!("Hyphae-Run: {run_id}")));

        let run_dir = h.checkout.path().join(".hyphae/runs").join(&run_id);
        for stage in Stage::ALL {
            assert!(
                run_dir.join(stage.as_str()).join(RAW_OUTPUT_FILE).is_file(),
                "missing raw output for {stage}"
            );
        }
        assert!(run_dir.join("resolvePlan").join(PLAN_FILE).is_file());
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run_dir.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["state"], "DONE");

        let outputs = h.outputs();
        assert!(outputs.contains(&format!("run_id={run_id}")));
        assert!(outputs.contains("classification=feature"));
        assert!(outputs.contains(&format!("branch_name={branch}")));
        assert!(outputs.contains("pr_url=https://github.com/acme/widgets/pull/1"));

        let console = h.console.lock().unwrap();
        assert!(console.iter().any(|l| l == "::group::classify"));
        assert!(console.iter().any(|l| l == "::group::openPR"));
    }

    #[tokio::test]
    async fn test_ambiguous_classification_stops_before_branch() {
        let agent = ScriptedAgent::new()
            .respond("classify", |_| Ok(ScriptedAgent::result_output("/feature or /bug")));
        let (h, orch) = start(
            agent,
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::STAGE_FAILED);
        assert_eq!(report.run.state, RunState::Failed);
        assert!(matches!(
            report.outcome,
            WorkflowOutcome::Failed {
                stage: Some(Stage::Classify),
                ..
            }
        ));
        assert_eq!(h.branches().len(), 1);
        assert_eq!(*h.calls.lock().unwrap(), vec!["classify"]);

        assert_eq!(h.platform.created_comments().len(), 1);
        let last = h.platform.last_edit().unwrap();
        assert!(last.contains("Run failed"));
        assert!(last.contains("Failed during `classify`"));
        assert!(last.contains("https://github.com/acme/widgets/actions/runs/99"));

        let console = h.console.lock().unwrap();
        assert!(console.iter().any(|l| l.starts_with("::error::")));
    }

    #[tokio::test]
    async fn test_missing_plan_fails_before_implementation() {
        let agent = ScriptedAgent::new()
            .respond("classify", |_| Ok(ScriptedAgent::result_output("/chore")))
            .respond("plan", |_| Ok(ScriptedAgent::result_output("I wrote nothing")));
        let (h, orch) = start(
            agent,
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::STAGE_FAILED);
        assert_eq!(report.run.failed_stage(), Some(Stage::ResolvePlan));
        assert!(report.run.error.as_deref().unwrap().contains("Plan document not found"));
        assert!(!h.calls.lock().unwrap().iter().any(|s| s == "implement"));
        assert!(h.platform.pull_requests().is_empty());
    }

    #[tokio::test]
    async fn test_dirty_checkout_refuses_to_branch() {
        let (checkout, origin) = init_repo();
        fs::write(checkout.path().join("README.md"), "local edits\n").unwrap();
        let (h, orch) = start_in(
            checkout,
            origin,
            tempfile::tempdir().unwrap(),
            happy_agent(),
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::STAGE_FAILED);
        assert_eq!(report.run.failed_stage(), Some(Stage::Branch));
        assert_eq!(h.branches().len(), 1);
    }

    #[tokio::test]
    async fn test_implementation_without_commits_fails() {
        let agent = happy_agent().respond("implement", |req| {
            // Leaves the tree exactly as the branch stage found it.
            fs::remove_file(req.workdir.join("specs/issue-42-dark-mode.md"))?;
            Ok(ScriptedAgent::result_output("Nothing to do"))
        });
        let (h, orch) = start(
            agent,
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::STAGE_FAILED);
        assert_eq!(report.run.failed_stage(), Some(Stage::Implement));
        assert!(report.run.error.as_deref().unwrap().contains("no commits"));
        assert!(h.platform.pull_requests().is_empty());
    }

    #[tokio::test]
    async fn test_post_check_warning_does_not_fail_run() {
        let mut config = AppConfig::default();
        config.pipeline.post_check.command = Some("echo lint failed; exit 1".to_string());
        let (h, orch) = start(
            happy_agent(),
            FakePlatform::new().with_ticket(ticket_42()),
            config,
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::OK, "{:?}", report.outcome);
        let warnings: Vec<&str> = report.run.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("exited with 1"));
        assert!(h.platform.pull_requests()[0].body.contains("## Warnings"));
        let console = h.console.lock().unwrap();
        assert!(console.iter().any(|l| l.starts_with("::warning::")));
    }

    #[tokio::test]
    async fn test_post_check_failure_policy_is_fatal() {
        let mut config = AppConfig::default();
        config.pipeline.post_check.command = Some("exit 2".to_string());
        config.pipeline.post_check.policy = PostCheckPolicy::Fail;
        let (h, orch) = start(
            happy_agent(),
            FakePlatform::new().with_ticket(ticket_42()),
            config,
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::STAGE_FAILED);
        assert_eq!(report.run.failed_stage(), Some(Stage::Implement));
        assert!(h.platform.pull_requests().is_empty());
    }

    #[tokio::test]
    async fn test_post_check_timeout_keeps_log() {
        let mut config = AppConfig::default();
        config.pipeline.post_check.command = Some("echo partial results; sleep 30".to_string());
        config.pipeline.post_check.timeout_secs = 1;
        let (h, orch) = start(
            happy_agent(),
            FakePlatform::new().with_ticket(ticket_42()),
            config,
        )
        .await;
        let run_id = orch.run_id().to_string();

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::OK, "{:?}", report.outcome);
        let warnings: Vec<&str> = report.run.warnings().collect();
        assert!(warnings[0].contains("did not finish"));
        let log = h
            .checkout
            .path()
            .join(".hyphae/runs")
            .join(&run_id)
            .join("implement")
            .join(POST_CHECK_FILE);
        assert!(fs::read_to_string(log).unwrap().contains("partial results"));
    }

    #[tokio::test]
    async fn test_agent_commits_without_trailer_are_flagged() {
        let agent = happy_agent().respond("implement", |req| {
            fs::write(req.workdir.join("dark_mode.rs"), "pub fn toggle() {}\n")?;
            let repo = git2::Repository::open(&req.workdir).unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("dark_mode.rs")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let parent = repo.head().unwrap().peel_to_commit().unwrap();
            let sig = repo.signature().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "wip: toggle", &tree, &[&parent])
                .unwrap();
            Ok(ScriptedAgent::result_output("Committed the toggle"))
        });
        let (h, orch) = start(
            agent,
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;
        let run_id = orch.run_id().to_string();

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::OK, "{:?}", report.outcome);
        let warnings: Vec<&str> = report.run.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("1 commit(s) lack"));
        assert!(warnings[0].contains(&format!("Hyphae-Run: {run_id}")));
        assert!(h.platform.pull_requests()[0].body.contains("## Warnings"));
    }

    #[tokio::test]
    async fn test_comment_edit_failures_do_not_abort() {
        let (h, orch) = start(
            happy_agent(),
            FakePlatform::new().with_ticket(ticket_42()).failing_edits(),
            AppConfig::default(),
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::OK, "{:?}", report.outcome);
        assert_eq!(h.platform.created_comments().len(), 1);
        assert!(h.platform.edits().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_exits_before_comment() {
        let (h, orch) = start(
            happy_agent().unavailable(),
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;

        let report = orch.run(42, never()).await;

        assert_eq!(report.exit_code, exit_codes::TOOL_UNAVAILABLE);
        assert!(h.platform.created_comments().is_empty());
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_mid_stage_is_reported() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let agent = happy_agent().hang("plan", entered.clone());
        let (h, orch) = start(
            agent,
            FakePlatform::new().with_ticket(ticket_42()),
            AppConfig::default(),
        )
        .await;

        let cancel = async move {
            entered.notified().await;
            "terminated (SIGTERM)".to_string()
        };
        let report = orch.run(42, cancel).await;

        assert_eq!(report.exit_code, exit_codes::CANCELLED);
        assert_eq!(report.run.state, RunState::Failed);
        assert_eq!(report.run.failed_stage(), Some(Stage::Plan));
        assert_eq!(report.run.completed_stages(), vec!["classify", "branch"]);
        assert_eq!(*h.calls.lock().unwrap(), vec!["classify", "plan"]);
        assert!(h.platform.pull_requests().is_empty());

        assert_eq!(h.platform.created_comments().len(), 1);
        let last = h.platform.last_edit().unwrap();
        assert!(last.contains("Run failed"));
        assert!(last.contains("Failed during `plan`"));
        assert!(last.contains("terminated (SIGTERM)"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let shared = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.artifacts.root = shared.path().to_path_buf();

        let ticket_43 = Ticket {
            number: 43,
            title: "Add dark mode toggle".to_string(),
            ..ticket_42()
        };
        let agent_43 = happy_agent().respond("plan", |req| {
            fs::create_dir_all(req.workdir.join("specs"))?;
            fs::write(req.workdir.join("specs/issue-43.md"), "# Plan\n")?;
            Ok(ScriptedAgent::result_output("specs/issue-43.md"))
        });

        let (h1, o1) = start(
            happy_agent(),
            FakePlatform::new().with_ticket(ticket_42()),
            config.clone(),
        )
        .await;
        let (h2, o2) = start(agent_43, FakePlatform::new().with_ticket(ticket_43), config).await;

        let (r1, r2) = tokio::join!(o1.run(42, never()), o2.run(43, never()));

        assert_eq!(r1.exit_code, exit_codes::OK, "{:?}", r1.outcome);
        assert_eq!(r2.exit_code, exit_codes::OK, "{:?}", r2.outcome);
        assert_ne!(r1.run.run_id, r2.run.run_id);
        assert_ne!(r1.run.branch, r2.run.branch);
        assert!(shared.path().join(&r1.run.run_id).join(MANIFEST_FILE).is_file());
        assert!(shared.path().join(&r2.run.run_id).join(MANIFEST_FILE).is_file());
        assert_eq!(h1.platform.created_comments().len(), 1);
        assert_eq!(h2.platform.created_comments().len(), 1);
    }
}
