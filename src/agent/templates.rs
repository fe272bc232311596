//! Typed instruction templates.
//!
//! A template declares the variables it needs; `{{name}}` placeholders in the
//! body must match that declaration exactly. Both sides are checked when the
//! template is built, and rendering refuses to run with a variable missing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Result};

pub const CLASSIFY: &str = "classify";
pub const PLAN_FEATURE: &str = "plan_feature";
pub const PLAN_BUG: &str = "plan_bug";
pub const PLAN_CHORE: &str = "plan_chore";
pub const IMPLEMENT: &str = "implement";

pub type TemplateVars = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    id: String,
    required: BTreeSet<String>,
    body: String,
}

/// On-disk override format.
#[derive(Debug, Deserialize)]
struct TemplateFile {
    id: String,
    required: Vec<String>,
    body: String,
}

impl PromptTemplate {
    pub fn new(id: &str, required: &[&str], body: &str) -> Result<Self> {
        let required: BTreeSet<String> = required.iter().map(|s| s.to_string()).collect();
        let used = placeholders(body)?;

        if let Some(undeclared) = used.difference(&required).next() {
            return Err(AppError::Template(format!(
                "Template `{id}` uses undeclared variable `{undeclared}`"
            )));
        }
        if let Some(unused) = required.difference(&used).next() {
            return Err(AppError::Template(format!(
                "Template `{id}` declares `{unused}` but never uses it"
            )));
        }

        Ok(Self {
            id: id.to_string(),
            required,
            body: body.to_string(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn render(&self, vars: &TemplateVars) -> Result<String> {
        if let Some(missing) = self.required.iter().find(|name| !vars.contains_key(*name)) {
            return Err(AppError::Template(format!(
                "Template `{}` is missing variable `{missing}`",
                self.id
            )));
        }

        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            // Placeholders were validated at construction.
            let end = after.find("}}").unwrap_or(after.len());
            let name = after[..end].trim();
            out.push_str(vars.get(name).map(String::as_str).unwrap_or_default());
            rest = after.get(end + 2..).unwrap_or("");
        }
        out.push_str(rest);

        Ok(out)
    }
}

fn placeholders(body: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut rest = body;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| AppError::Template("Unterminated `{{` in template body".to_string()))?;
        let name = after[..end].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(AppError::Template(format!("Invalid placeholder `{{{{{name}}}}}`")));
        }
        names.insert(name.to_string());
        rest = &after[end + 2..];
    }
    Ok(names)
}

/// All templates the pipeline needs, keyed by ID.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<String, PromptTemplate>,
}

impl TemplateSet {
    pub fn builtin() -> Result<Self> {
        let templates = [
            PromptTemplate::new(
                CLASSIFY,
                &["ticket_number", "ticket_title", "ticket_body"],
                CLASSIFY_BODY,
            )?,
            PromptTemplate::new(PLAN_FEATURE, PLAN_VARS, &plan_body(PLAN_FEATURE_GUIDANCE))?,
            PromptTemplate::new(PLAN_BUG, PLAN_VARS, &plan_body(PLAN_BUG_GUIDANCE))?,
            PromptTemplate::new(PLAN_CHORE, PLAN_VARS, &plan_body(PLAN_CHORE_GUIDANCE))?,
            PromptTemplate::new(IMPLEMENT, IMPLEMENT_VARS, IMPLEMENT_BODY)?,
        ];

        Ok(Self {
            templates: templates
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
        })
    }

    /// Built-in templates, with any `*.toml` overrides from `dir` applied.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut set = Self::builtin()?;
        let Some(dir) = dir else {
            return Ok(set);
        };

        let entries = std::fs::read_dir(dir).map_err(|e| {
            AppError::Config(format!(
                "Failed to read templates dir {}: {e}",
                dir.display()
            ))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in paths {
            let raw = std::fs::read_to_string(&path)?;
            let file: TemplateFile = toml::from_str(&raw)?;
            set.override_with(file)
                .map_err(|e| AppError::Template(format!("{}: {e}", path.display())))?;
            tracing::info!(path = %path.display(), "Loaded template override");
        }

        Ok(set)
    }

    fn override_with(&mut self, file: TemplateFile) -> Result<()> {
        let builtin = self
            .templates
            .get(&file.id)
            .ok_or_else(|| AppError::Template(format!("Unknown template id `{}`", file.id)))?;

        // The pipeline only ever supplies the built-in variable set.
        if let Some(extra) = file.required.iter().find(|v| !builtin.required.contains(*v)) {
            return Err(AppError::Template(format!(
                "Template `{}` requires `{extra}`, which the pipeline does not provide",
                file.id
            )));
        }

        let required: Vec<&str> = file.required.iter().map(String::as_str).collect();
        let template = PromptTemplate::new(&file.id, &required, &file.body)?;
        self.templates.insert(file.id, template);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| AppError::Template(format!("Unknown template id `{id}`")))
    }
}

const PLAN_VARS: &[&str] = &[
    "ticket_number",
    "ticket_title",
    "ticket_body",
    "branch_name",
    "plan_dir",
    "run_id",
];

const IMPLEMENT_VARS: &[&str] = &[
    "ticket_number",
    "ticket_title",
    "plan_path",
    "branch_name",
    "run_id",
    "commit_type",
];

const CLASSIFY_BODY: &str = r#"Classify GitHub issue #{{ticket_number}} as exactly one of: feature, bug, chore.

- feature: new functionality or a user-visible enhancement
- bug: something that is broken and needs fixing
- chore: maintenance, refactoring, dependencies, docs, tooling

## Issue
**Title:** {{ticket_title}}

{{ticket_body}}

Respond with a single word: `/feature`, `/bug` or `/chore`. Do not explain."#;

fn plan_body(guidance: &str) -> String {
    format!(
        r#"You are planning the work for GitHub issue #{{{{ticket_number}}}} on branch `{{{{branch_name}}}}`.

## Issue
**Title:** {{{{ticket_title}}}}

{{{{ticket_body}}}}

## Instructions
{guidance}

Write the plan as a single Markdown file in `{{{{plan_dir}}}}/`, named
`issue-{{{{ticket_number}}}}-{{{{run_id}}}}-<short-description>.md`. Do not modify any other file.
Finish by replying with the relative path of the plan file and nothing else."#
    )
}

const PLAN_FEATURE_GUIDANCE: &str = "1. Explore the codebase to understand where the feature belongs.
2. Describe the user-facing behaviour and the relevant files.
3. Break the work into ordered, concrete steps.
4. List the tests that prove the feature works.";

const PLAN_BUG_GUIDANCE: &str = "1. Reproduce the problem from the description and locate the root cause.
2. Describe the cause, not just the symptom.
3. Propose the minimal fix as ordered steps.
4. List a regression test that fails before the fix and passes after.";

const PLAN_CHORE_GUIDANCE: &str = "1. Identify exactly which files the chore touches.
2. Describe the change as ordered steps with no behaviour changes.
3. List the commands that confirm nothing broke.";

const IMPLEMENT_BODY: &str = r#"Implement the plan in `{{plan_path}}` for GitHub issue #{{ticket_number}} ({{ticket_title}}).

You are on branch `{{branch_name}}`. Do not switch branches and do not push.

## Guidelines
- Follow the plan step by step; make minimal, focused changes.
- Follow the existing code style and patterns in the repository.
- Commit your work. Every commit message must follow:

  {{commit_type}}: <description> for #{{ticket_number}}

  Hyphae-Run: {{run_id}}

Finish by replying with a short summary of what you changed."#;
