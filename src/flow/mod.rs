//! The block-installation pipeline.
//!
//! A [`Flow`] owns an ordered list of [`FlowTask`]s and one [`FlowContext`].
//! Tasks run strictly one after another; a failed or cancelled flow keeps its
//! task states so [`Flow::retry`] resumes at the first task that did not
//! succeed.

mod context;
pub mod tasks;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::deps::DepsError;
use crate::events::{EventSink, FlowEvent, StatePayload};
use crate::git::GitError;
use crate::insert_component::InsertError;
use crate::logger::Logger;
use crate::process::{ProcessError, ProcessSlot};
use crate::routes::RouteError;

pub use context::{
    AddBlockArgs, BlockOrigin, CloneResult, FlowContext, FlowResult, GeneratorResult, ParseResult,
    Stages,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    #[default]
    Init,
    Ing,
    Success,
    Fail,
    Cancel,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::Ing => "ING",
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
            Self::Cancel => "CANCEL",
        })
    }
}

pub type StepState = FlowState;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// `cancel` / `retry` called from a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Error state({state}) to {action}")]
    InvalidState {
        state: FlowState,
        action: &'static str,
    },
}

/// Anything a task body can fail with.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Missing {0} result")]
    MissingStage(&'static str),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Deps(#[from] DepsError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Insert(#[from] InsertError),
    #[error(transparent)]
    Generator(#[from] anyhow::Error),
}

impl TaskError {
    pub fn is_termination(&self) -> bool {
        match self {
            Self::Process(e) => e.is_termination(),
            Self::Deps(e) => e.is_termination(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// One named step of a flow.
///
/// A task only runs while its state is not `SUCCESS`, so a retry never
/// repeats finished work.
#[async_trait]
pub trait FlowTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError>;
}

struct TaskEntry {
    task: Box<dyn FlowTask>,
    state: Mutex<StepState>,
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

pub struct Flow {
    id: String,
    tasks: Vec<TaskEntry>,
    ctx: tokio::sync::Mutex<FlowContext>,
    state: Mutex<FlowState>,
    cancelled: AtomicBool,
    slot: Arc<ProcessSlot>,
    logger: Logger,
    sink: EventSink,
    result: Mutex<FlowResult>,
    cancel_grace: Duration,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .field("tasks", &self.task_states())
            .finish()
    }
}

impl Flow {
    /// A flow running `tasks` in order against `ctx`.
    pub fn new(ctx: FlowContext, tasks: Vec<Box<dyn FlowTask>>, sink: EventSink) -> Self {
        let logger = ctx.logger.clone();
        let slot = ctx.exec.slot().clone();
        let cancel_grace = ctx.settings.cancel_grace();
        Self {
            id: logger.id().to_string(),
            tasks: tasks
                .into_iter()
                .map(|task| TaskEntry {
                    task,
                    state: Mutex::new(StepState::Init),
                })
                .collect(),
            ctx: tokio::sync::Mutex::new(ctx),
            state: Mutex::new(FlowState::Init),
            cancelled: AtomicBool::new(false),
            slot,
            logger,
            sink,
            result: Mutex::new(FlowResult::default()),
            cancel_grace,
        }
    }

    /// A flow with the built-in task list for `args`.
    pub fn for_args(ctx: FlowContext, args: &AddBlockArgs, sink: EventSink) -> Self {
        let tasks = tasks::registry_tasks(&ctx, args);
        Self::new(ctx, tasks, sink)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> FlowState {
        *self.state.lock()
    }

    pub fn task_states(&self) -> Vec<(&'static str, StepState)> {
        self.tasks
            .iter()
            .map(|t| (t.task.name(), *t.state.lock()))
            .collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run every task that has not succeeded yet.
    pub async fn run(&self, args: &AddBlockArgs) -> FlowResult {
        *self.state.lock() = FlowState::Ing;
        let mut ctx = self.ctx.lock().await;

        for entry in &self.tasks {
            let name = entry.task.name();
            tracing::debug!(flow = %self.id, task = name, "Flow current task");
            if self.is_cancelled() {
                self.set_step_state(entry, StepState::Cancel);
                return self.result.lock().clone();
            }
            if *entry.state.lock() == StepState::Success {
                continue;
            }

            self.set_step_state(entry, StepState::Ing);
            let outcome = entry.task.run(&mut ctx, args).await;
            *self.result.lock() = ctx.result.clone();
            let Err(e) = outcome else {
                self.set_step_state(entry, StepState::Success);
                continue;
            };

            // A killed child surfaces as an error; the cancel flag decides.
            if self.is_cancelled() {
                tracing::info!(flow = %self.id, task = name, "Task stopped by cancel: {e}");
                self.set_step_state(entry, StepState::Cancel);
            } else {
                tracing::error!(flow = %self.id, task = name, "Execute task error: {e}");
                *self.state.lock() = FlowState::Fail;
                self.set_step_state(entry, StepState::Fail);
                self.logger
                    .write_chunk(&format!("\n🚧  Execute task error: {e}\n"));
                self.sink.send(FlowEvent::State {
                    id: self.id.clone(),
                    state: FlowState::Fail,
                    data: StatePayload {
                        block_url: ctx.result.block_url.clone(),
                        preview_url: None,
                        message: Some(e.to_string()),
                    },
                });
            }
            return ctx.result.clone();
        }

        *self.state.lock() = FlowState::Success;
        let preview_url = ctx
            .stages
            .generator
            .as_ref()
            .map(|g| ctx.settings.preview_url(&g.path));
        tracing::info!(flow = %self.id, "Flow finished");
        self.sink.send(FlowEvent::State {
            id: self.id.clone(),
            state: FlowState::Success,
            data: StatePayload {
                block_url: ctx.result.block_url.clone(),
                preview_url,
                message: None,
            },
        });
        self.logger.clear();
        ctx.result.clone()
    }

    /// Stop a running flow and terminate its child process.
    ///
    /// Returns immediately; the "stopped" line is logged after the grace
    /// period without waiting for the child to exit.
    pub fn cancel(&self) -> Result<(), FlowError> {
        {
            let mut state = self.state.lock();
            if *state != FlowState::Ing {
                return Err(FlowError::InvalidState {
                    state: *state,
                    action: "terminated",
                });
            }
            *state = FlowState::Cancel;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.slot.terminate();
        tracing::info!(flow = %self.id, "Flow cancelled");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let logger = self.logger.clone();
                let grace = self.cancel_grace;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    logger.write_chunk("\n🛑  Stopped task success!\n");
                });
            }
            Err(_) => self.logger.write_chunk("\n🛑  Stopped task success!\n"),
        }
        Ok(())
    }

    /// Resume a failed flow at its failed task.
    pub async fn retry(&self, args: &AddBlockArgs) -> Result<FlowResult, FlowError> {
        let state = self.state();
        if state != FlowState::Fail {
            return Err(FlowError::InvalidState {
                state,
                action: "retry",
            });
        }
        Ok(self.run(args).await)
    }

    pub fn get_log(&self) -> String {
        self.logger.get_log()
    }

    /// URL of the block being installed; empty unless the flow is running.
    pub fn get_block_url(&self) -> String {
        if self.state() != FlowState::Ing {
            return String::new();
        }
        self.result.lock().block_url.clone().unwrap_or_default()
    }

    fn set_step_state(&self, entry: &TaskEntry, state: StepState) {
        *entry.state.lock() = state;
        self.sink.send(FlowEvent::Step {
            id: self.id.clone(),
            task: entry.task.name().to_string(),
            state,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::events::{self, EventStream};
    use crate::generator::FsGenerator;
    use crate::project::Project;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Counts calls; fails while `failures` is positive.
    struct CountingTask {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FlowTask for CountingTask {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, ctx: &mut FlowContext, _args: &AddBlockArgs) -> Result<(), TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.result.block_url = Some("https://github.com/a/b".into());
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(TaskError::Message(format!("{} broke", self.name)));
            }
            Ok(())
        }
    }

    /// Blocks until the test releases it, then fails like a killed child.
    struct BlockingTask {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl FlowTask for BlockingTask {
        fn name(&self) -> &'static str {
            "install"
        }

        async fn run(&self, _ctx: &mut FlowContext, _args: &AddBlockArgs) -> Result<(), TaskError> {
            self.started.notify_one();
            self.release.notified().await;
            Err(ProcessError::Killed {
                program: "npm".into(),
            }
            .into())
        }
    }

    fn context(sink: EventSink) -> FlowContext {
        let dir = std::env::temp_dir();
        let settings = Settings {
            cancel_grace_ms: 10,
            ..Default::default()
        };
        FlowContext::new(
            Project::new(dir),
            settings,
            Logger::new("flow-test", sink),
            Arc::new(FsGenerator),
        )
    }

    fn counting(
        name: &'static str,
        failures: usize,
    ) -> (Box<dyn FlowTask>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fails = Arc::new(AtomicUsize::new(failures));
        let task = CountingTask {
            name,
            calls: calls.clone(),
            failures: fails.clone(),
        };
        (Box::new(task), calls, fails)
    }

    fn states(events: &mut EventStream) -> Vec<FlowEvent> {
        events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, FlowEvent::State { .. }))
            .collect()
    }

    #[tokio::test]
    async fn test_run_all_tasks_succeeds_and_clears_log() {
        let (sink, mut events) = events::channel();
        let (a, a_calls, _) = counting("parseUrl", 0);
        let (b, b_calls, _) = counting("install", 0);
        let ctx = context(sink.clone());
        ctx.logger.append_log("working");
        let flow = Flow::new(ctx, vec![a, b], sink);

        let result = flow.run(&AddBlockArgs::default()).await;
        assert_eq!(result.block_url.as_deref(), Some("https://github.com/a/b"));
        assert_eq!(flow.state(), FlowState::Success);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(flow.get_log(), "");
        assert_eq!(flow.get_block_url(), "");

        let terminal = states(&mut events);
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].message_type(), "org.umi.block.add-blocks-success");
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline_and_retry_resumes() {
        let (sink, mut events) = events::channel();
        let (a, a_calls, _) = counting("parseUrl", 0);
        let (b, b_calls, _) = counting("install", 1);
        let (c, c_calls, _) = counting("runGenerator", 0);
        let flow = Flow::new(context(sink.clone()), vec![a, b, c], sink);
        let args = AddBlockArgs::default();

        flow.run(&args).await;
        assert_eq!(flow.state(), FlowState::Fail);
        assert_eq!(
            flow.task_states(),
            vec![
                ("parseUrl", StepState::Success),
                ("install", StepState::Fail),
                ("runGenerator", StepState::Init),
            ]
        );
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
        assert!(flow.get_log().contains("🚧  Execute task error: install broke"));
        match &states(&mut events)[..] {
            [FlowEvent::State { state, data, .. }] => {
                assert_eq!(*state, FlowState::Fail);
                assert_eq!(data.message.as_deref(), Some("install broke"));
            }
            other => panic!("unexpected events {other:?}"),
        }

        flow.retry(&args).await.unwrap();
        assert_eq!(flow.state(), FlowState::Success);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 2);
        assert_eq!(c_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_requires_fail() {
        let (a, _, _) = counting("parseUrl", 0);
        let flow = Flow::new(context(EventSink::detached()), vec![a], EventSink::detached());
        let err = flow.retry(&AddBlockArgs::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "Error state(INIT) to retry");
    }

    #[tokio::test]
    async fn test_cancel_from_success_is_rejected() {
        let (a, _, _) = counting("parseUrl", 0);
        let flow = Flow::new(context(EventSink::detached()), vec![a], EventSink::detached());
        flow.run(&AddBlockArgs::default()).await;
        let err = flow.cancel().unwrap_err();
        assert_eq!(
            err,
            FlowError::InvalidState {
                state: FlowState::Success,
                action: "terminated"
            }
        );
        assert!(err.to_string().contains("SUCCESS"));
    }

    #[tokio::test]
    async fn test_cancel_marks_current_task_and_leaves_rest() {
        let (sink, mut events) = events::channel();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (a, _, _) = counting("parseUrl", 0);
        let blocking: Box<dyn FlowTask> = Box::new(BlockingTask {
            started: started.clone(),
            release: release.clone(),
        });
        let (c, c_calls, _) = counting("runGenerator", 0);
        let (d, _, _) = counting("writeRoutes", 0);
        let flow = Arc::new(Flow::new(context(sink.clone()), vec![a, blocking, c, d], sink));

        let runner = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.run(&AddBlockArgs::default()).await })
        };
        started.notified().await;
        assert_eq!(flow.get_block_url(), "https://github.com/a/b");
        flow.cancel().unwrap();
        release.notify_one();
        runner.await.unwrap();

        assert_eq!(flow.state(), FlowState::Cancel);
        assert_eq!(
            flow.task_states(),
            vec![
                ("parseUrl", StepState::Success),
                ("install", StepState::Cancel),
                ("runGenerator", StepState::Init),
                ("writeRoutes", StepState::Init),
            ]
        );
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
        // Cancellation never reports a failure
        assert!(states(&mut events).is_empty());
        assert!(!flow.get_log().contains("Execute task error"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(flow.get_log().contains("🛑  Stopped task success!"));
        assert!(flow.cancel().is_err());
    }
}
