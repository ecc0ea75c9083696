//! The check/apply pipeline
//!
//! A run moves through a fixed sequence of phases:
//!
//! ```text
//! Idle -> Validating -> DryRun -> Committing -> Done
//!                          \-> Done (check only)
//! any non-terminal phase -> Failed
//! ```
//!
//! Nothing is written before `Committing`, and `Committing` is only entered
//! when validation and the dry run produced no error at all.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use miette::Diagnostic;
use relpack_core::model::{self, DeployStep, ScriptStep};
use relpack_core::{
    ControlTable, InstallRoot, Message, RuleValidator, Severity, TableKind, TableReport,
    TemplateEntry,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::binder::{Bindings, VariableBinder};
use crate::config::PipelineConfig;
use crate::error::{EngineError, Result};
use crate::fsutil;
use crate::image::ImageRewriter;
use crate::substitute::{Substitution, Substitutor, WriteMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Validating,
    DryRun,
    Committing,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::DryRun => "dry-run",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal step
    ///
    /// A check-only run finishes straight after the dry run; an applying run
    /// must go through `Committing`.
    pub fn can_advance_to(&self, next: Phase, apply: bool) -> bool {
        match (self, next) {
            (Self::Idle, Self::Validating)
            | (Self::Validating, Self::DryRun)
            | (Self::Committing, Self::Done) => true,
            (Self::DryRun, Self::Committing) => apply,
            (Self::DryRun, Self::Done) => !apply,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one template file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file: String,
    pub matched: BTreeSet<String>,
    pub missing: BTreeSet<String>,
    pub replacements: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error code for machine consumers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl FileReport {
    fn scanned(file: &str, found: Substitution) -> Self {
        Self {
            file: file.to_string(),
            matched: found.matched,
            missing: found.missing,
            replacements: found.replacements,
            error: None,
            code: None,
        }
    }

    fn failed(file: &str, error: &EngineError) -> Self {
        Self {
            file: file.to_string(),
            matched: BTreeSet::new(),
            missing: BTreeSet::new(),
            replacements: 0,
            error: Some(error.to_string()),
            code: Some(error.to_code_string()),
        }
    }
}

/// Counters for the end-of-run summary
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub templates: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub templates_with_tokens: usize,
    pub replacements: usize,
    pub variables: usize,
    /// Variables found in at least one template
    pub variables_matched: usize,
    pub unused_variables: Vec<String>,
    pub undefined_keys: Vec<String>,
    pub files_written: usize,
    pub images_rewritten: usize,
    pub commit_failures: usize,
}

/// Everything a run hands back to its caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub success: bool,
    pub applied: bool,
    pub phase: Phase,
    /// Ordered run log
    pub messages: Vec<Message>,
    pub tables: Vec<TableReport>,
    pub files: Vec<FileReport>,
    /// Key -> files it was found in during the dry run
    pub corrected_files: IndexMap<String, Vec<String>>,
    /// Rows of a valid deploy table, in execution order
    pub deploy_plan: Vec<DeployStep>,
    /// Rows of a valid script table, in execution order
    pub script_plan: Vec<ScriptStep>,
    pub summary: RunSummary,
}

impl RunOutcome {
    pub fn count(&self, severity: Severity) -> usize {
        self.messages
            .iter()
            .filter(|m| m.severity == severity)
            .count()
    }

    /// Validation errors found in the control tables
    pub fn table_errors(&self) -> usize {
        self.tables.iter().map(|t| t.errors.len()).sum()
    }
}

/// Mutable state of one run
struct RunContext {
    phase: Phase,
    apply: bool,
    messages: Vec<Message>,
    tables: Vec<TableReport>,
    files: Vec<FileReport>,
    corrected_files: IndexMap<String, Vec<String>>,
    deploy_plan: Vec<DeployStep>,
    script_plan: Vec<ScriptStep>,
    summary: RunSummary,
}

impl RunContext {
    fn new(apply: bool) -> Self {
        Self {
            phase: Phase::Idle,
            apply,
            messages: Vec::new(),
            tables: Vec::new(),
            files: Vec::new(),
            corrected_files: IndexMap::new(),
            deploy_plan: Vec::new(),
            script_plan: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(next, self.apply) {
            return Err(EngineError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        info!(from = %self.phase, to = %next, "phase");
        self.phase = next;
        Ok(())
    }

    fn info(&mut self, text: impl Into<String>) {
        self.messages.push(Message::info(text));
    }

    fn warning(&mut self, text: impl Into<String>) {
        let message = Message::warning(text);
        warn!("{}", message.text);
        self.messages.push(message);
    }

    fn error(&mut self, text: impl Into<String>) {
        self.messages.push(Message::error(text));
    }

    /// Record a file that could not be scanned
    fn file_failed(&mut self, file: &str, err: &EngineError) {
        self.error(file_message(file, err));
        self.summary.files_failed += 1;
        self.files.push(FileReport::failed(file, err));
    }

    fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    /// Record a fatal error and stop
    fn abort(&mut self, err: EngineError) {
        let mut text = err.to_string();
        if let EngineError::Core(core) = &err {
            if let Some(help) = core.help() {
                text.push_str(&format!(" (help: {})", help));
            }
        }
        self.error(text);
        if !self.phase.is_terminal() {
            self.phase = Phase::Failed;
        }
    }

    fn finish(self) -> RunOutcome {
        RunOutcome {
            success: self.phase == Phase::Done,
            applied: self.apply && self.phase == Phase::Done,
            phase: self.phase,
            messages: self.messages,
            tables: self.tables,
            files: self.files,
            corrected_files: self.corrected_files,
            deploy_plan: self.deploy_plan,
            script_plan: self.script_plan,
            summary: self.summary,
        }
    }
}

/// The control tables of an install root
struct LoadedTables {
    variables: ControlTable,
    deploy: Option<ControlTable>,
    script: Option<ControlTable>,
}

impl LoadedTables {
    fn iter(&self) -> impl Iterator<Item = &ControlTable> {
        std::iter::once(&self.variables)
            .chain(self.deploy.as_ref())
            .chain(self.script.as_ref())
    }
}

/// Validates an install root and, when asked, substitutes it in place
pub struct Pipeline {
    root: InstallRoot,
    config: PipelineConfig,
    substitutor: Substitutor,
    images: ImageRewriter,
}

impl Pipeline {
    pub fn new(root: InstallRoot, config: PipelineConfig) -> Self {
        let substitutor = Substitutor::builder()
            .markers(config.markers)
            .chunk_size(config.chunk_size)
            .require_utf8(config.require_utf8)
            .build();
        let images = ImageRewriter::new(config.registry.clone());
        Self {
            root,
            config,
            substitutor,
            images,
        }
    }

    pub fn root(&self) -> &InstallRoot {
        &self.root
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate and dry-run without writing anything
    pub fn check(&self) -> RunOutcome {
        self.run(false)
    }

    /// Validate, dry-run and commit when everything passed
    pub fn apply(&self) -> RunOutcome {
        self.run(true)
    }

    pub fn run(&self, apply: bool) -> RunOutcome {
        let mut ctx = RunContext::new(apply);
        if let Err(err) = self.drive(&mut ctx) {
            ctx.abort(err);
        }
        ctx.finish()
    }

    fn drive(&self, ctx: &mut RunContext) -> Result<()> {
        ctx.advance(Phase::Validating)?;
        let variables = ControlTable::load(
            self.root.table_path(TableKind::Variables),
            TableKind::Variables,
        )?;
        let mut bindings = VariableBinder::bind(&variables)?;
        ctx.summary.variables = bindings.len();

        let mut tables = LoadedTables {
            variables,
            deploy: self.load_optional(ctx, TableKind::Deploy)?,
            script: self.load_optional(ctx, TableKind::Script)?,
        };
        self.validate_tables(ctx, &tables);

        ctx.advance(Phase::DryRun)?;
        let targets = self.dry_run(ctx, &mut bindings);
        self.report_bindings(ctx, &bindings);

        if ctx.has_errors() {
            ctx.error("errors found, nothing was written");
            return ctx.advance(Phase::Failed);
        }
        if !ctx.apply {
            ctx.info("check passed");
            return ctx.advance(Phase::Done);
        }

        ctx.advance(Phase::Committing)?;
        self.commit(ctx, &mut tables, &bindings, &targets);
        if ctx.summary.commit_failures > 0 {
            ctx.error(format!(
                "{} commit step(s) failed, see the messages above",
                ctx.summary.commit_failures
            ));
            ctx.advance(Phase::Failed)
        } else {
            ctx.info("apply finished");
            ctx.advance(Phase::Done)
        }
    }

    fn load_optional(&self, ctx: &mut RunContext, kind: TableKind) -> Result<Option<ControlTable>> {
        let path = self.root.table_path(kind);
        if !path.is_file() {
            ctx.info(format!("{} not found, skipped", kind.relative_path()));
            return Ok(None);
        }
        Ok(Some(ControlTable::load(path, kind)?))
    }

    fn validate_tables(&self, ctx: &mut RunContext, tables: &LoadedTables) {
        let validator = RuleValidator::new(&self.root);
        for table in tables.iter() {
            let report = validator.validate(table);
            if report.is_valid() {
                ctx.info(format!(
                    "{} (schema {}): {} rows checked",
                    table.kind.relative_path(),
                    table.version,
                    report.rows_checked
                ));
                match table.kind {
                    TableKind::Deploy => ctx.deploy_plan = model::deploy_steps(table),
                    TableKind::Script => ctx.script_plan = model::script_steps(table),
                    TableKind::Variables => {}
                }
            } else {
                for error in report.errors.log() {
                    ctx.error(error.to_string());
                }
            }
            ctx.tables.push(report);
        }
    }

    /// Scan every template; returns the ones with at least one replacement
    ///
    /// Manifests that get a replacement are parsed here already, so a value
    /// that breaks the YAML fails the run before anything is written.
    fn dry_run(&self, ctx: &mut RunContext, bindings: &mut Bindings) -> Vec<TemplateEntry> {
        let templates = self.root.template_files();
        ctx.summary.templates = templates.len();

        let mut targets = Vec::new();
        for entry in templates {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let err = EngineError::from(err);
                    let file = err.path().unwrap_or_default().to_string();
                    ctx.file_failed(&file, &err);
                    continue;
                }
            };
            match self.substitutor.process(
                &entry.path,
                &entry.relative,
                bindings.values(),
                WriteMode::DryRun,
            ) {
                Ok(found) => {
                    debug!(
                        file = %entry.relative,
                        matched = found.matched.len(),
                        missing = found.missing.len(),
                        "scanned"
                    );
                    bindings.record(&entry.relative, &found.matched, &found.missing);
                    if !found.missing.is_empty() {
                        ctx.warning(format!(
                            "{}: undefined variables {}",
                            entry.relative,
                            join_keys(&found.missing)
                        ));
                    }
                    if found.replacements > 0 {
                        ctx.summary.templates_with_tokens += 1;
                        ctx.summary.replacements += found.replacements;
                        targets.push(entry.clone());
                    }
                    ctx.summary.files_succeeded += 1;
                    ctx.files.push(FileReport::scanned(&entry.relative, found));
                }
                Err(err) => ctx.file_failed(&entry.relative, &err),
            }
        }

        self.check_image_manifests(ctx, bindings);
        targets
    }

    /// Parse every manifest the image rewrite will touch, as it will look
    /// after substitution
    fn check_image_manifests(&self, ctx: &mut RunContext, bindings: &Bindings) {
        if self.images.is_noop() {
            return;
        }
        let manifests: Vec<String> = ctx
            .deploy_plan
            .iter()
            .filter(|step| step.action.rewrites_images() && step.image_reference.is_some())
            .filter_map(|step| step.manifest_path.clone())
            .collect();

        for manifest in manifests {
            let (path, relative) = match self.root.resolve(&manifest) {
                Ok(path) => {
                    let relative = self.root.relative(&path);
                    (path, relative)
                }
                Err(err) => {
                    ctx.error(file_message(&manifest, &EngineError::from(err)));
                    continue;
                }
            };
            let already_failed = ctx
                .files
                .iter()
                .any(|f| f.file == relative && f.error.is_some());
            if already_failed {
                continue;
            }
            if let Err(err) = self
                .substitutor
                .check_file(&path, &relative, bindings.values())
            {
                ctx.error(file_message(&manifest, &err));
            }
        }
    }

    fn report_bindings(&self, ctx: &mut RunContext, bindings: &Bindings) {
        let unused: Vec<String> = bindings.unused().into_iter().map(String::from).collect();

        for (key, declared) in bindings.unmatched_declarations() {
            if unused.iter().any(|u| u == key) {
                continue;
            }
            ctx.warning(format!(
                "variable `{}` was not found in its declared files: {}",
                key,
                declared.join(", ")
            ));
        }
        for key in &unused {
            ctx.warning(format!("variable `{}` is not used in any template", key));
        }

        ctx.summary.variables_matched = ctx.summary.variables.saturating_sub(unused.len());
        ctx.summary.unused_variables = unused;
        ctx.summary.undefined_keys = bindings.undefined().iter().cloned().collect();
        ctx.corrected_files = bindings.corrected().clone();
        let summary = &ctx.summary;
        let line = format!(
            "{} templates scanned ({} ok, {} failed), {} with variables, {} replacements, {} of {} variables matched",
            summary.templates,
            summary.files_succeeded,
            summary.files_failed,
            summary.templates_with_tokens,
            summary.replacements,
            summary.variables_matched,
            summary.variables
        );
        ctx.info(line);
    }

    fn commit(
        &self,
        ctx: &mut RunContext,
        tables: &mut LoadedTables,
        bindings: &Bindings,
        targets: &[TemplateEntry],
    ) {
        let changed = bindings.write_back(&mut tables.variables);
        let relative = TableKind::Variables.relative_path();
        if changed > 0 {
            let written = tables
                .variables
                .to_bytes()
                .map_err(EngineError::from)
                .and_then(|bytes| fsutil::write_bytes(&tables.variables.path, &bytes));
            match written {
                Ok(()) => {
                    ctx.summary.files_written += 1;
                    ctx.info(format!("{}: updated file lists of {} variables", relative, changed));
                }
                Err(err) => {
                    ctx.summary.commit_failures += 1;
                    ctx.error(file_message(&relative, &err));
                }
            }
        }

        for entry in targets {
            match self.substitutor.process(
                &entry.path,
                &entry.relative,
                bindings.values(),
                WriteMode::Commit,
            ) {
                Ok(found) => {
                    ctx.summary.files_written += 1;
                    ctx.info(format!(
                        "{}: {} replacements written",
                        entry.relative, found.replacements
                    ));
                }
                Err(err) => {
                    ctx.summary.commit_failures += 1;
                    ctx.error(file_message(&entry.relative, &err));
                }
            }
        }

        if let Some(deploy) = &tables.deploy {
            self.rewrite_images(ctx, deploy);
        }
    }

    fn rewrite_images(&self, ctx: &mut RunContext, deploy: &ControlTable) {
        if self.images.is_noop() {
            ctx.info("no registry rewrite configured, container images left unchanged");
            return;
        }

        for step in model::deploy_steps(deploy) {
            if !step.action.rewrites_images() {
                continue;
            }
            let (Some(manifest), Some(reference)) = (&step.manifest_path, &step.image_reference)
            else {
                continue;
            };

            let rewritten = self
                .root
                .resolve(manifest)
                .map_err(EngineError::from)
                .and_then(|path| self.images.rewrite_file(&path, reference));
            match rewritten {
                Ok(0) => {}
                Ok(changed) => {
                    ctx.summary.images_rewritten += changed;
                    ctx.info(format!(
                        "{}: {} container image(s) set to {}",
                        manifest,
                        changed,
                        self.images.target_image(reference)
                    ));
                }
                Err(err) => {
                    ctx.summary.commit_failures += 1;
                    ctx.error(file_message(manifest, &err));
                }
            }
        }
    }
}

/// Prefix an error with its file, unless the error already names it
fn file_message(file: &str, err: &EngineError) -> String {
    if err.path() == Some(file) {
        err.to_string()
    } else {
        format!("{}: {}", file, err)
    }
}

fn join_keys(keys: &BTreeSet<String>) -> String {
    keys.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
