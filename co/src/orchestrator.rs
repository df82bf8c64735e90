//! Conductor - composition root for the status machine, supervisor and timeout monitor
//!
//! Every operation validates through the transition table first, then starts
//! or stops the tool. A run's exit is reconciled back into the record by a
//! task that awaits the run's [`ExitSignal`].

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use eyre::{Context, Result, eyre};
use serde::Serialize;
use statusstore::{State, StateUpdate, StatusRecord, StatusStore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::machine::{Action, MachineResponse, StatusManager, actions};
use crate::plan;
use crate::questions::{self, FRESH_TEMPLATE, Question};
use crate::supervisor::{
    ExitSignal, ProcessSupervisor, SupervisorConfig, SupervisorError, ToolCommand, ToolStatus, is_process_running,
    stop_external, tool_check,
};
use crate::timeout::{TimeoutMonitor, TimeoutSnapshot};

/// Which flow started the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Plan,
    Execute,
    Resume,
}

impl RunKind {
    /// State the record is in while this run is live
    fn live_state(&self) -> State {
        match self {
            RunKind::Plan => State::Planning,
            RunKind::Execute | RunKind::Resume => State::Executing,
        }
    }

    /// Kind of run a record left in `state` was waiting on
    fn from_live_state(state: State) -> Option<Self> {
        match state {
            State::Planning => Some(RunKind::Plan),
            State::Executing => Some(RunKind::Execute),
            _ => None,
        }
    }
}

/// Record plus live process and timeout annotations
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub record: StatusRecord,
    pub plan_generated: bool,
    pub completed_phases: u32,
    pub running: bool,
    pub pid: Option<u32>,
    pub stalled: bool,
    pub timed_out: bool,
    pub runtime_secs: Option<f64>,
    pub valid_actions: Vec<Action>,
}

/// Result of `cancel`
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub was_running: bool,
    pub stopped_cleanly: bool,
    pub state: State,
}

struct ActiveRun {
    kind: RunKind,
    pid: u32,
    abandoned: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Everything the reconciliation task needs, detached from the Conductor
#[derive(Clone)]
struct RunContext {
    status: StatusManager,
    timeout: Arc<TimeoutMonitor>,
    status_path: PathBuf,
    plan_path: PathBuf,
    questions_path: PathBuf,
}

pub struct Conductor {
    config: Config,
    status: StatusManager,
    supervisor: ProcessSupervisor,
    timeout: Arc<TimeoutMonitor>,
    active: Mutex<Option<ActiveRun>>,
    /// Held from the idle check until the tool has started or been refused
    launch: tokio::sync::Mutex<()>,
}

impl Conductor {
    /// Build all components from `config`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Self {
        let supervisor = config.supervisor();
        Self::with_supervisor(config, supervisor)
    }

    /// Build with explicit supervisor settings, e.g. for a detached run
    pub fn with_supervisor(config: Config, supervisor: SupervisorConfig) -> Self {
        debug!(?config.project, ?supervisor, "Conductor::with_supervisor: called");
        let status_path = config.project.status_path();
        let store = StatusStore::new(&status_path).with_title(config.project.title.clone());
        let status = StatusManager::spawn(store);
        let supervisor = ProcessSupervisor::new(supervisor);
        let timeout = Arc::new(TimeoutMonitor::new(&status_path, config.timeout()));
        Self {
            config,
            status,
            supervisor,
            timeout,
            active: Mutex::new(None),
            launch: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status_manager(&self) -> &StatusManager {
        &self.status
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    fn context(&self) -> RunContext {
        RunContext {
            status: self.status.clone(),
            timeout: self.timeout.clone(),
            status_path: self.config.project.status_path(),
            plan_path: self.config.project.plan_path(),
            questions_path: self.config.project.questions_path(),
        }
    }

    /// Current record with live annotations
    pub async fn status(&self) -> Result<StatusView> {
        debug!("Conductor::status: called");
        let external = {
            let _launch = self.launch.lock().await;
            self.adopt_external().await?
        };
        let record = self.status.read().await?;
        let snapshot = self.timeout.check();
        let valid_actions = if record.unrecognized_state.is_some() {
            Vec::new()
        } else {
            actions(record.state.state)
        };
        Ok(StatusView {
            plan_generated: record.state.plan_generated(),
            completed_phases: record.state.completed_phases(),
            running: self.supervisor.is_running() || external.is_some(),
            pid: self.supervisor.get_pid().or(external),
            stalled: snapshot.stalled,
            timed_out: snapshot.timed_out,
            runtime_secs: snapshot.runtime.map(|d| d.as_secs_f64()),
            valid_actions,
            record,
        })
    }

    /// Stall and overrun flags for the current run
    pub fn check_timeouts(&self) -> TimeoutSnapshot {
        self.timeout.check()
    }

    /// Drain captured tool output
    pub fn recent_output(&self, max_lines: usize) -> Vec<String> {
        self.supervisor.get_recent_output(max_lines)
    }

    /// Whether the configured tool is installed
    pub async fn check_tool(&self) -> ToolStatus {
        tool_check(&self.config.tool.command).await
    }

    /// Fail if the tool is live; otherwise let the last run finish reconciling
    async fn ensure_idle(&self) -> Result<()> {
        if let Some(pid) = self.supervisor.get_pid() {
            return Err(eyre!("{} is already running (PID {})", self.config.tool.command, pid));
        }
        self.wait_idle().await;
        if let Some(pid) = self.adopt_external().await? {
            return Err(eyre!(
                "{} is already running (PID {}, started by another conductor)",
                self.config.tool.command,
                pid
            ));
        }
        Ok(())
    }

    /// Check a `process_id` recorded by another conductor process
    ///
    /// Returns the pid while that tool is still alive. Once it has exited the
    /// exit code is lost, so the outcome is read from the files the tool left
    /// behind, as for a clean exit, and the process fields are cleared.
    async fn adopt_external(&self) -> Result<Option<u32>> {
        let record = self.status.read().await?;
        let Some(pid) = record.state.process_id else {
            return Ok(None);
        };
        if self.supervisor.get_pid() == Some(pid) || self.active_run().is_some() {
            return Ok(None);
        }
        if is_process_running(pid) {
            debug!(pid, "Conductor::adopt_external: tool from another invocation still running");
            return Ok(Some(pid));
        }

        warn!(pid, state = %record.state.state, "Recorded tool process has exited unobserved; reconciling");
        if record.unrecognized_state.is_none()
            && let Some(kind) = RunKind::from_live_state(record.state.state)
            && let Err(e) = apply_exit(kind, None, &self.context()).await
        {
            warn!(pid, error = %e, "Failed to reconcile unobserved exit");
        }
        self.clear_process().await;
        Ok(None)
    }

    pub async fn configure(&self, activity: Option<String>) -> Result<StatusRecord> {
        debug!(?activity, "Conductor::configure: called");
        let activity = activity.unwrap_or_else(|| "Project configured. Generate a plan when ready.".to_string());
        self.status
            .transition(Action::Configure, StateUpdate::new().activity(activity))
            .await?;
        Ok(self.status.read().await?)
    }

    /// Start the tool to write the plan
    pub async fn generate_plan(&self) -> Result<u32> {
        debug!("Conductor::generate_plan: called");
        let _launch = self.launch.lock().await;
        self.ensure_idle().await?;
        self.status
            .transition(Action::GeneratePlan, StateUpdate::new().activity("Generating plan..."))
            .await?;
        let prompt = self.config.tool.plan_prompt.clone();
        self.launch(RunKind::Plan, &prompt).await
    }

    /// Start the tool to carry out the plan
    pub async fn execute(&self) -> Result<u32> {
        debug!("Conductor::execute: called");
        let _launch = self.launch.lock().await;
        self.ensure_idle().await?;
        self.status
            .transition(Action::Execute, StateUpdate::new().activity("Executing plan..."))
            .await?;
        let prompt = self.config.tool.execute_prompt.clone();
        self.launch(RunKind::Execute, &prompt).await
    }

    /// Continue execution after questions, or after a run that ended while executing
    pub async fn resume(&self) -> Result<u32> {
        debug!("Conductor::resume: called");
        let _launch = self.launch.lock().await;
        self.ensure_idle().await?;
        let record = self.status.read().await?;
        match record.state.state {
            State::Questions => {
                self.status
                    .transition(Action::Answer, StateUpdate::new().activity("Continuing execution..."))
                    .await?;
            }
            State::Executing => {
                self.status.set_activity("Continuing execution...").await?;
            }
            other => return Err(eyre!("Nothing to continue from state '{}'", other)),
        }
        self.continue_run().await
    }

    async fn continue_run(&self) -> Result<u32> {
        let prompt = self.config.tool.continue_prompt.clone();
        self.launch(RunKind::Resume, &prompt).await
    }

    /// Questions from the questions file; missing file means none
    pub fn questions(&self) -> Result<Vec<Question>> {
        let path = self.config.project.questions_path();
        match fs::read_to_string(&path) {
            Ok(content) => Ok(questions::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).context(format!("Failed to read {}", path.display())),
        }
    }

    fn rewrite_questions(&self, rewrite: impl FnOnce(&str) -> String) -> Result<()> {
        let path = self.config.project.questions_path();
        let content = fs::read_to_string(&path).context(format!("Questions file not found: {}", path.display()))?;
        fs::write(&path, rewrite(&content)).context(format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Write answers into the questions file and continue
    pub async fn answer_questions(&self, answers: &BTreeMap<u32, String>) -> Result<u32> {
        debug!(count = answers.len(), "Conductor::answer_questions: called");
        let _launch = self.launch.lock().await;
        self.ensure_idle().await?;
        self.require_state(State::Questions).await?;
        self.rewrite_questions(|content| questions::answer(content, answers))?;
        self.status
            .transition(
                Action::Answer,
                StateUpdate::new().activity("Answers recorded. Continuing execution..."),
            )
            .await?;
        self.continue_run().await
    }

    /// Mark unanswered questions as skipped and continue
    pub async fn skip_questions(&self) -> Result<u32> {
        debug!("Conductor::skip_questions: called");
        let _launch = self.launch.lock().await;
        self.ensure_idle().await?;
        self.require_state(State::Questions).await?;
        self.rewrite_questions(questions::skip)?;
        self.status
            .transition(
                Action::Skip,
                StateUpdate::new().activity("Questions skipped. Continuing execution..."),
            )
            .await?;
        self.continue_run().await
    }

    async fn require_state(&self, wanted: State) -> Result<()> {
        let current = self.status.read().await?.state.state;
        if current != wanted {
            return Err(eyre!("Expected state '{}', found '{}'", wanted, current));
        }
        Ok(())
    }

    /// Move to `questions` when the tool has written unanswered questions
    pub async fn refresh_questions(&self) -> Result<Option<State>> {
        debug!("Conductor::refresh_questions: called");
        let record = self.status.read().await?;
        if record.state.state != State::Executing {
            return Ok(None);
        }
        let pending = fs::read_to_string(self.config.project.questions_path())
            .map(|content| questions::has_pending(&content))
            .unwrap_or(false);
        if !pending {
            return Ok(None);
        }
        let state = self
            .status
            .transition(
                Action::QuestionsDetected,
                StateUpdate::new().activity(questions_activity(&self.config.project.questions_file)),
            )
            .await?;
        Ok(Some(state.state))
    }

    /// Record that the run moved on to `phase`
    pub async fn advance_phase(&self, phase: u32, name: Option<String>) -> Result<StatusRecord> {
        debug!(phase, ?name, "Conductor::advance_phase: called");
        let total = self.status.read().await?.state.total_phases;
        let mut update = StateUpdate::new()
            .phase(phase)
            .activity(format!("Working on phase {} of {}", phase, total));
        if name.is_some() {
            update = update.phase_name(name);
        }
        self.status.transition(Action::PhaseComplete, update).await?;
        Ok(self.status.read().await?)
    }

    /// Stop the tool and step back to the state before the run
    pub async fn cancel(&self) -> Result<CancelOutcome> {
        debug!("Conductor::cancel: called");
        let _launch = self.launch.lock().await;
        let external = self.adopt_external().await?;
        let was_running = self.supervisor.is_running() || external.is_some();
        self.abandon_run();
        let mut stopped_cleanly = self.supervisor.stop(self.config.timeouts.stop_grace()).await;
        if let Some(pid) = external {
            stopped_cleanly &= stop_external(pid, self.config.timeouts.stop_grace()).await;
        }
        self.wait_idle().await;

        let record = self.status.read().await?;
        let state = match record.state.state {
            State::Planning => {
                self.status
                    .transition(Action::Cancel, StateUpdate::new().activity("Plan generation cancelled."))
                    .await?
                    .state
            }
            State::Executing | State::Questions => {
                self.status
                    .transition(
                        Action::Cancel,
                        StateUpdate::new().activity("Execution cancelled. You can restart when ready."),
                    )
                    .await?
                    .state
            }
            other => other,
        };
        self.clear_process().await;
        info!(was_running, stopped_cleanly, %state, "Cancelled");
        Ok(CancelOutcome {
            was_running,
            stopped_cleanly,
            state,
        })
    }

    /// Return from `error` to the state it was entered from
    pub async fn retry(&self) -> Result<StatusRecord> {
        debug!("Conductor::retry: called");
        let record = self.status.read().await?;
        let previous = record.state.previous_state.unwrap_or(State::Reset);
        self.status
            .transition(
                Action::Retry,
                StateUpdate::new().activity(format!("Retrying from {} state...", previous)),
            )
            .await?;
        Ok(self.status.read().await?)
    }

    /// Stop everything and return the record and questions file to defaults
    pub async fn reset(&self) -> Result<StatusRecord> {
        debug!("Conductor::reset: called");
        let _launch = self.launch.lock().await;
        if let Some(pid) = self.adopt_external().await? {
            stop_external(pid, self.config.timeouts.stop_grace()).await;
        }
        self.abandon_run();
        self.supervisor.reset().await;
        self.wait_idle().await;
        self.timeout.stop();

        self.status
            .reset_record(Some("Project reset. Configure to start again.".to_string()))
            .await?;

        let questions_path = self.config.project.questions_path();
        if let Some(parent) = questions_path.parent() {
            fs::create_dir_all(parent).context(format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&questions_path, FRESH_TEMPLATE).context(format!("Failed to write {}", questions_path.display()))?;
        info!("Project reset");
        Ok(self.status.read().await?)
    }

    /// Direct state write for recovery
    pub async fn set_state(&self, state: State) -> Result<StatusRecord> {
        debug!(%state, "Conductor::set_state: called");
        self.status.set_state(state, StateUpdate::new()).await?;
        Ok(self.status.read().await?)
    }

    /// Kind and pid of the run being reconciled, if any
    pub fn active_run(&self) -> Option<(RunKind, u32)> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .as_ref()
            .filter(|run| !run.task.is_finished())
            .map(|run| (run.kind, run.pid))
    }

    /// Wait until the current run has exited and been reconciled
    pub async fn wait_idle(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(run) = active {
            debug!(pid = run.pid, "Conductor::wait_idle: waiting for reconciliation");
            if let Err(e) = run.task.await {
                warn!(error = %e, "Reconciliation task failed");
            }
        }
    }

    fn abandon_run(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(run) = active.as_ref() {
            run.abandoned.store(true, Ordering::SeqCst);
        }
    }

    async fn clear_process(&self) {
        self.timeout.stop();
        if let Err(e) = self.status.set_process(None).await {
            warn!(error = %e, "Failed to clear process fields");
        }
    }

    async fn launch(&self, kind: RunKind, prompt: &str) -> Result<u32> {
        debug!(?kind, prompt, "Conductor::launch: called");
        let command = ToolCommand::prompt(&self.config.tool.command, prompt);

        let run = match self.supervisor.start(&command, &self.config.project.root) {
            Ok(run) => run,
            Err(e @ SupervisorError::AlreadyRunning(_)) => {
                warn!(error = %e, "Tool already running; start refused");
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "Failed to start tool");
                self.status
                    .set_error(format!("Failed to start {}: {}", self.config.tool.command, e))
                    .await?;
                return Err(e.into());
            }
        };

        self.timeout.start();
        self.status
            .update(StateUpdate::new().process(Some(run.pid), Some(run.started)))
            .await?;

        let abandoned = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(reconcile(kind, run.exit, abandoned.clone(), self.context()));
        let previous = self.active.lock().unwrap_or_else(|e| e.into_inner()).replace(ActiveRun {
            kind,
            pid: run.pid,
            abandoned,
            task,
        });
        if let Some(previous) = previous
            && !previous.task.is_finished()
        {
            debug!(pid = previous.pid, "Conductor::launch: previous reconciliation still pending");
        }

        info!(pid = run.pid, ?kind, %command, "Run started");
        Ok(run.pid)
    }
}

fn questions_activity(questions_file: &std::path::Path) -> String {
    format!("Answer the questions in {}, then continue", questions_file.display())
}

async fn reconcile(kind: RunKind, exit: ExitSignal, abandoned: Arc<AtomicBool>, ctx: RunContext) {
    let code = exit.wait().await.unwrap_or(-1);
    debug!(?kind, code, "reconcile: run exited");

    if abandoned.load(Ordering::SeqCst) {
        debug!(?kind, "reconcile: run was cancelled, leaving state alone");
    } else if let Err(e) = apply_exit(kind, Some(code), &ctx).await {
        warn!(?kind, code, error = %e, "Failed to reconcile run exit");
    }

    ctx.timeout.stop();
    if let Err(e) = ctx.status.set_process(None).await {
        warn!(error = %e, "Failed to clear process fields");
    }
}

/// Fold a run's exit into the record; `code` is None when the exit was not observed
async fn apply_exit(kind: RunKind, code: Option<i32>, ctx: &RunContext) -> MachineResponse<()> {
    let record = ctx.status.read().await?;
    let current = record.state.state;
    if record.unrecognized_state.is_some() || current != kind.live_state() {
        info!(?kind, ?code, %current, "Run exited after the state moved on; not reconciling");
        return Ok(());
    }

    if let Some(code) = code
        && code != 0
    {
        ctx.status.set_error(format!("tool exited with code {}", code)).await?;
        return Ok(());
    }

    match kind {
        RunKind::Plan => {
            let phases = plan::detect_phases(&ctx.plan_path);
            match phases.first() {
                Some(first) => {
                    let total = phases.len() as u32;
                    ctx.status
                        .transition(
                            Action::PlanComplete,
                            StateUpdate::new()
                                .phase(1)
                                .total_phases(total)
                                .phase_name(Some(first.name.clone()))
                                .activity(format!("Plan generated with {} phase(s). Ready to execute!", total)),
                        )
                        .await?;
                }
                None => {
                    ctx.status
                        .transition(
                            Action::Cancel,
                            StateUpdate::new().activity(format!(
                                "Plan generation finished but no phases were found in {}",
                                ctx.plan_path.display()
                            )),
                        )
                        .await?;
                }
            }
        }
        RunKind::Execute | RunKind::Resume => {
            let status_content = fs::read_to_string(&ctx.status_path).unwrap_or_default();
            let last_phase_reached = kind == RunKind::Resume
                && record.state.total_phases > 0
                && record.state.phase >= record.state.total_phases;
            let pending = fs::read_to_string(&ctx.questions_path)
                .map(|content| questions::has_pending(&content))
                .unwrap_or(false);

            if plan::detect_completion(&status_content) || last_phase_reached {
                ctx.status
                    .transition(
                        Action::AllComplete,
                        StateUpdate::new()
                            .phase(record.state.total_phases)
                            .activity("Project complete! Review the deliverables."),
                    )
                    .await?;
            } else if pending {
                let file = ctx
                    .questions_path
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| ctx.questions_path.clone());
                ctx.status
                    .transition(
                        Action::QuestionsDetected,
                        StateUpdate::new().activity(questions_activity(&file)),
                    )
                    .await?;
            } else {
                ctx.status
                    .transition(
                        Action::Cancel,
                        StateUpdate::new().activity("Execution finished. Check status for results."),
                    )
                    .await?;
            }
        }
    }
    Ok(())
}
