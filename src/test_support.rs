//! In-memory stand-ins for the agent and the ticket tracker, plus scratch repositories.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use git2::Repository;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::agent::{AgentRequest, AgentRunner, RawAgentOutput};
use crate::error::{AppError, Result};
use crate::platform::types::{CommentId, CreatePullRequest, PullRequest, Ticket};
use crate::platform::Platform;

/// A checkout with one commit and a bare `origin` it can push to.
pub fn init_repo() -> (TempDir, TempDir) {
    let checkout = tempfile::tempdir().unwrap();
    let repo = Repository::init(checkout.path()).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
    }

    fs::write(checkout.path().join("README.md"), "# widgets\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = repo.signature().unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .unwrap();

    let origin = tempfile::tempdir().unwrap();
    Repository::init_bare(origin.path()).unwrap();
    repo.remote("origin", origin.path().to_str().unwrap())
        .unwrap();

    (checkout, origin)
}

type Responder = Box<dyn Fn(&AgentRequest) -> Result<RawAgentOutput> + Send + Sync>;

/// Agent runner that answers each stage from a script.
pub struct ScriptedAgent {
    responders: HashMap<String, Responder>,
    calls: Arc<Mutex<Vec<String>>>,
    hangs: HashMap<String, Arc<Notify>>,
    available: bool,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self {
            responders: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            hangs: HashMap::new(),
            available: true,
        }
    }

    pub fn respond(
        mut self,
        stage: &str,
        responder: impl Fn(&AgentRequest) -> Result<RawAgentOutput> + Send + Sync + 'static,
    ) -> Self {
        self.responders
            .insert(stage.to_string(), Box::new(responder));
        self
    }

    /// Never return from `stage`; `entered` is notified once the stage is running.
    pub fn hang(mut self, stage: &str, entered: Arc<Notify>) -> Self {
        self.hangs.insert(stage.to_string(), entered);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Stages the agent was invoked for, in order.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    /// A successful stream ending in a `result` event carrying `text`.
    pub fn result_output(text: &str) -> RawAgentOutput {
        let lines = [
            serde_json::json!({"type": "system", "subtype": "init"}),
            serde_json::json!({
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": text}]}
            }),
            serde_json::json!({
                "type": "result",
                "subtype": "success",
                "is_error": false,
                "result": text,
                "num_turns": 1
            }),
        ];
        RawAgentOutput {
            lines: lines.iter().map(|v| v.to_string()).collect(),
            exit_code: Some(0),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(AppError::ToolUnavailable("scripted agent disabled".to_string()))
        }
    }

    async fn run(&self, request: &AgentRequest) -> Result<RawAgentOutput> {
        self.calls.lock().unwrap().push(request.stage.clone());
        if let Some(entered) = self.hangs.get(&request.stage) {
            entered.notify_one();
            return std::future::pending().await;
        }
        match self.responders.get(&request.stage) {
            Some(responder) => responder(request),
            None => Err(AppError::Agent(format!(
                "No scripted response for stage `{}`",
                request.stage
            ))),
        }
    }
}

/// Ticket tracker that keeps everything in memory.
#[derive(Default)]
pub struct FakePlatform {
    tickets: HashMap<u64, Ticket>,
    fail_edits: bool,
    next_id: AtomicU64,
    created: Mutex<Vec<(u64, String)>>,
    edits: Mutex<Vec<(CommentId, String)>>,
    pull_requests: Mutex<Vec<CreatePullRequest>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(mut self, ticket: Ticket) -> Self {
        self.tickets.insert(ticket.number, ticket);
        self
    }

    /// Every edit fails as if GitHub kept erroring after retries.
    pub fn failing_edits(mut self) -> Self {
        self.fail_edits = true;
        self
    }

    pub fn created_comments(&self) -> Vec<(u64, String)> {
        self.created.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(CommentId, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn last_edit(&self) -> Option<String> {
        self.edits.lock().unwrap().last().map(|(_, body)| body.clone())
    }

    pub fn pull_requests(&self) -> Vec<CreatePullRequest> {
        self.pull_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn fetch_ticket(&self, number: u64) -> Result<Ticket> {
        self.tickets
            .get(&number)
            .cloned()
            .ok_or_else(|| AppError::GitHubApi(format!("GitHub returned 404: issue #{number}")))
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<CommentId> {
        let id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push((number, body.to_string()));
        Ok(CommentId(id))
    }

    async fn edit_comment(&self, comment_id: CommentId, body: &str) -> Result<()> {
        if self.fail_edits {
            return Err(AppError::TransientNetwork("GitHub returned 502".to_string()));
        }
        let known = comment_id.0 >= 1000 && comment_id.0 < 1000 + self.next_id.load(Ordering::SeqCst);
        if !known {
            return Err(AppError::GitHubApi(format!("Unknown comment {comment_id}")));
        }
        self.edits
            .lock()
            .unwrap()
            .push((comment_id, body.to_string()));
        Ok(())
    }

    async fn default_branch(&self) -> Result<String> {
        Ok("main".to_string())
    }

    async fn open_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        let mut prs = self.pull_requests.lock().unwrap();
        prs.push(pr.clone());
        let number = prs.len() as u64;
        Ok(PullRequest {
            number,
            url: format!("https://github.com/acme/widgets/pull/{number}"),
        })
    }
}
