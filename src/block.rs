//! The add-block session a dashboard talks to.
//!
//! A [`BlockAdder`] owns at most one [`Flow`] at a time. Starting a new run
//! drops the previous flow; cancel / retry / log requests are forwarded to
//! the current one and are no-ops when there is none.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Settings;
use crate::events::{self, EventSink, EventStream};
use crate::flow::{AddBlockArgs, Flow, FlowContext, FlowError, FlowResult, FlowState};
use crate::generator::{BlockGenerator, FsGenerator};
use crate::logger::Logger;
use crate::project::Project;

pub struct BlockAdder {
    project: Project,
    settings: Settings,
    generator: Arc<dyn BlockGenerator>,
    sink: EventSink,
    flow: Mutex<Option<Arc<Flow>>>,
}

impl std::fmt::Debug for BlockAdder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAdder")
            .field("project", &self.project.cwd)
            .field("flow", &*self.flow.lock())
            .finish()
    }
}

impl BlockAdder {
    /// A session for `project` plus the stream its flows report to.
    pub fn new(project: Project, settings: Settings) -> (Self, EventStream) {
        let (sink, stream) = events::channel();
        (Self::with_sink(project, settings, sink), stream)
    }

    pub fn with_sink(project: Project, settings: Settings, sink: EventSink) -> Self {
        Self {
            project,
            settings,
            generator: Arc::new(FsGenerator),
            sink,
            flow: Mutex::new(None),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn BlockGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Start a new flow for `args` and run it to completion.
    pub async fn run(&self, args: &AddBlockArgs) -> FlowResult {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(flow = %id, url = ?args.url, "Starting add-block flow");
        let logger = Logger::new(id, self.sink.clone());
        let ctx = FlowContext::new(
            self.project.clone(),
            self.settings.clone(),
            logger,
            self.generator.clone(),
        );
        let flow = Arc::new(Flow::for_args(ctx, args, self.sink.clone()));
        *self.flow.lock() = Some(flow.clone());
        flow.run(args).await
    }

    fn current(&self) -> Option<Arc<Flow>> {
        self.flow.lock().clone()
    }

    pub fn cancel(&self) -> Result<(), FlowError> {
        match self.current() {
            Some(flow) => flow.cancel(),
            None => Ok(()),
        }
    }

    pub async fn retry(&self, args: &AddBlockArgs) -> Result<Option<FlowResult>, FlowError> {
        match self.current() {
            Some(flow) => flow.retry(args).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn get_log(&self) -> String {
        self.current().map(|f| f.get_log()).unwrap_or_default()
    }

    pub fn get_block_url(&self) -> String {
        self.current().map(|f| f.get_block_url()).unwrap_or_default()
    }

    pub fn has_running_flow(&self) -> bool {
        self.current()
            .is_some_and(|f| f.state() == FlowState::Ing)
    }

    pub fn flow_state(&self) -> Option<FlowState> {
        self.current().map(|f| f.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FlowEvent;
    use indexmap::IndexMap;

    #[tokio::test]
    async fn test_no_flow_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (adder, _events) = BlockAdder::new(Project::new(dir.path()), Settings::default());
        assert!(adder.cancel().is_ok());
        assert_eq!(adder.retry(&AddBlockArgs::default()).await.unwrap(), None);
        assert_eq!(adder.get_log(), "");
        assert_eq!(adder.get_block_url(), "");
        assert!(!adder.has_running_flow());
        assert_eq!(adder.flow_state(), None);
    }

    #[tokio::test]
    async fn test_failed_flow_reports_and_keeps_log() {
        let dir = tempfile::tempdir().unwrap();
        let (adder, mut events) = BlockAdder::new(Project::new(dir.path()), Settings::default());
        let args = AddBlockArgs {
            files: Some(IndexMap::new()),
            path: Some("/demo".into()),
            page: Some(true),
            ..Default::default()
        };
        // No package.json: the install task fails
        adder.run(&args).await;
        assert_eq!(adder.flow_state(), Some(FlowState::Fail));
        assert!(!adder.has_running_flow());
        assert!(adder.get_log().contains("No package.json found in your project"));
        assert!(adder.cancel().is_err());

        let fail = events
            .drain()
            .into_iter()
            .find(|e| matches!(e, FlowEvent::State { .. }))
            .unwrap();
        assert_eq!(fail.message_type(), "org.umi.block.add-blocks-fail");

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let resumed = adder.retry(&args).await.unwrap();
        assert!(resumed.is_some());
        // No configured routes, so the route step is skipped
        assert_eq!(adder.flow_state(), Some(FlowState::Success));
        assert!(dir.path().join("src/pages/demo").is_dir());
    }
}
