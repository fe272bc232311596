use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::templates;
use crate::error::{AppError, Result};
use crate::platform::types::Ticket;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    #[serde(rename = "classify")]
    Classify,
    #[serde(rename = "branch")]
    Branch,
    #[serde(rename = "plan")]
    Plan,
    #[serde(rename = "resolvePlan")]
    ResolvePlan,
    #[serde(rename = "implement")]
    Implement,
    #[serde(rename = "openPR")]
    OpenPr,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Classify,
        Stage::Branch,
        Stage::Plan,
        Stage::ResolvePlan,
        Stage::Implement,
        Stage::OpenPr,
    ];

    /// Name used for artifact directories, log groups and the manifest.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Branch => "branch",
            Stage::Plan => "plan",
            Stage::ResolvePlan => "resolvePlan",
            Stage::Implement => "implement",
            Stage::OpenPr => "openPR",
        }
    }

    /// Human label for the progress comment.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Classify => "Classify ticket",
            Stage::Branch => "Create branch",
            Stage::Plan => "Write plan",
            Stage::ResolvePlan => "Locate plan",
            Stage::Implement => "Implement",
            Stage::OpenPr => "Open pull request",
        }
    }

    /// State the run is in once this stage has completed.
    pub fn completes(&self) -> RunState {
        match self {
            Stage::Classify => RunState::Classified,
            Stage::Branch => RunState::Branched,
            Stage::Plan => RunState::Planned,
            Stage::ResolvePlan => RunState::PlanResolved,
            Stage::Implement => RunState::Implemented,
            Stage::OpenPr => RunState::PrOpened,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Started,
    Classified,
    Branched,
    Planned,
    PlanResolved,
    Implemented,
    PrOpened,
    Done,
    Failed,
}

impl RunState {
    /// The only stage allowed to run from this state.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            RunState::Started => Some(Stage::Classify),
            RunState::Classified => Some(Stage::Branch),
            RunState::Branched => Some(Stage::Plan),
            RunState::Planned => Some(Stage::ResolvePlan),
            RunState::PlanResolved => Some(Stage::Implement),
            RunState::Implemented => Some(Stage::OpenPr),
            RunState::PrOpened | RunState::Done | RunState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Feature,
    Bug,
    Chore,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Feature => "feature",
            Classification::Bug => "bug",
            Classification::Chore => "chore",
        }
    }

    pub fn branch_prefix(&self) -> &'static str {
        match self {
            Classification::Feature => "feat",
            Classification::Bug => "bug",
            Classification::Chore => "chore",
        }
    }

    /// Conventional-commit type.
    pub fn commit_type(&self) -> &'static str {
        match self {
            Classification::Feature => "feat",
            Classification::Bug => "fix",
            Classification::Chore => "chore",
        }
    }

    pub fn plan_template(&self) -> &'static str {
        match self {
            Classification::Feature => templates::PLAN_FEATURE,
            Classification::Bug => templates::PLAN_BUG,
            Classification::Chore => templates::PLAN_CHORE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub raw_output: Option<PathBuf>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl StageRecord {
    fn start(stage: Stage) -> Self {
        Self {
            stage,
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            raw_output: None,
            result: None,
            error: None,
            warnings: Vec::new(),
        }
    }
}

/// What a stage hands back to the orchestrator besides its value.
#[derive(Debug)]
pub struct StageOutput<T> {
    pub value: T,
    pub raw_output: Option<PathBuf>,
    pub result: Option<String>,
    pub warnings: Vec<String>,
}

impl<T> StageOutput<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            raw_output: None,
            result: None,
            warnings: Vec::new(),
        }
    }

    pub fn raw_output(mut self, path: PathBuf) -> Self {
        self.raw_output = Some(path);
        self
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}

/// Everything known about one run. Serialized to `run.json` when it ends.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub ticket_number: u64,
    pub ticket: Option<Ticket>,
    pub classification: Option<Classification>,
    pub branch: Option<String>,
    pub base_commit: Option<String>,
    pub plan_path: Option<PathBuf>,
    pub pr_url: Option<String>,
    pub state: RunState,
    pub stages: Vec<StageRecord>,
    pub active: Option<StageRecord>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(run_id: &str, ticket_number: u64) -> Self {
        Self {
            run_id: run_id.to_string(),
            ticket_number,
            ticket: None,
            classification: None,
            branch: None,
            base_commit: None,
            plan_path: None,
            pr_url: None,
            state: RunState::Started,
            stages: Vec::new(),
            active: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Start `stage`. It must be the next one in order.
    pub fn begin(&mut self, stage: Stage) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(AppError::Internal(format!(
                "Cannot start `{stage}` while `{}` is still running",
                active.stage
            )));
        }
        if self.state.next_stage() != Some(stage) {
            return Err(AppError::Internal(format!(
                "Stage `{stage}` cannot run from state {:?}",
                self.state
            )));
        }
        self.active = Some(StageRecord::start(stage));
        Ok(())
    }

    /// Finalize the in-flight stage as successful and advance the state.
    pub fn complete<T>(&mut self, output: &StageOutput<T>) -> Result<()> {
        let mut record = self
            .active
            .take()
            .ok_or_else(|| AppError::Internal("No stage in flight to complete".to_string()))?;
        record.finished_at = Some(Utc::now());
        record.success = true;
        record.raw_output = output.raw_output.clone();
        record.result = output.result.clone();
        record.warnings = output.warnings.clone();
        self.state = record.stage.completes();
        self.stages.push(record);
        Ok(())
    }

    /// Mark the run as successfully finished.
    pub fn finish(&mut self) -> Result<()> {
        if self.state != RunState::PrOpened {
            return Err(AppError::Internal(format!(
                "Run cannot finish from state {:?}",
                self.state
            )));
        }
        self.state = RunState::Done;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Attach `error` to the in-flight stage (if any) and move to `FAILED`.
    pub fn fail(&mut self, error: &AppError) {
        if let Some(mut record) = self.active.take() {
            record.finished_at = Some(Utc::now());
            record.error = Some(error.to_string());
            self.stages.push(record);
        }
        self.state = RunState::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }

    /// The stage that was running when the run failed.
    pub fn failed_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .rev()
            .find(|r| !r.success)
            .map(|r| r.stage)
    }

    /// Stage names of the successfully completed stages, in order.
    pub fn completed_stages(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|r| r.success)
            .map(|r| r.stage.as_str())
            .collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .flat_map(|r| r.warnings.iter().map(String::as_str))
    }
}

/// Terminal outcome of a run, as reported to the caller.
#[derive(Debug)]
pub enum WorkflowOutcome {
    /// Pull request opened.
    Completed { pr_url: String },
    /// A stage failed or the run was cancelled.
    Failed {
        stage: Option<Stage>,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> StageOutput<()> {
        StageOutput::new(())
    }

    #[test]
    fn test_stages_follow_state_order() {
        let mut state = RunState::Started;
        let mut seen = Vec::new();
        while let Some(stage) = state.next_stage() {
            seen.push(stage);
            state = stage.completes();
        }
        assert_eq!(seen, Stage::ALL);
        assert_eq!(state, RunState::PrOpened);
    }

    #[test]
    fn test_out_of_order_stage_is_internal_error() {
        let mut run = WorkflowRun::new("abcd1234", 1);
        assert!(matches!(
            run.begin(Stage::Branch),
            Err(AppError::Internal(_))
        ));

        run.begin(Stage::Classify).unwrap();
        assert!(run.begin(Stage::Classify).is_err());
        run.complete(&output()).unwrap();
        assert_eq!(run.state, RunState::Classified);
        assert!(run.begin(Stage::Classify).is_err());
    }

    #[test]
    fn test_fail_records_in_flight_stage() {
        let mut run = WorkflowRun::new("abcd1234", 1);
        run.begin(Stage::Classify).unwrap();
        run.fail(&AppError::Classification("no keyword".to_string()));

        assert_eq!(run.state, RunState::Failed);
        assert!(run.active.is_none());
        assert_eq!(run.failed_stage(), Some(Stage::Classify));
        assert!(run.stages[0].error.as_deref().unwrap().contains("no keyword"));
        assert!(run.completed_stages().is_empty());
    }

    #[test]
    fn test_finish_requires_pr_opened() {
        let mut run = WorkflowRun::new("abcd1234", 1);
        assert!(run.finish().is_err());
        for stage in Stage::ALL {
            run.begin(stage).unwrap();
            run.complete(&output()).unwrap();
        }
        run.finish().unwrap();
        assert_eq!(run.state, RunState::Done);
        assert!(run.state.is_terminal());
    }

    #[test]
    fn test_serialized_names() {
        let mut run = WorkflowRun::new("abcd1234", 7);
        run.begin(Stage::Classify).unwrap();
        run.complete(&output().result("bug")).unwrap();
        run.classification = Some(Classification::Bug);
        let json = serde_json::to_value(&run).unwrap();

        assert_eq!(json["state"], "CLASSIFIED");
        assert_eq!(json["classification"], "bug");
        assert_eq!(json["stages"][0]["stage"], "classify");
        assert_eq!(
            serde_json::to_value(Stage::OpenPr).unwrap(),
            serde_json::Value::from("openPR")
        );
    }

    #[test]
    fn test_classification_conventions() {
        assert_eq!(Classification::Bug.branch_prefix(), "bug");
        assert_eq!(Classification::Bug.commit_type(), "fix");
        assert_eq!(Classification::Feature.branch_prefix(), "feat");
        assert_eq!(Classification::Chore.plan_template(), templates::PLAN_CHORE);
    }
}
