//! Arguments and the shared, typed context threaded through a flow's tasks.

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::deps::DepMap;
use crate::generator::{BlockGenerator, BlockType, Execution, GeneratorOutput};
use crate::git::RepoSpec;
use crate::insert_component::InsertIndex;
use crate::logger::Logger;
use crate::process::{Exec, ProcessSlot};
use crate::project::Project;

use super::TaskError;

/// One "add block" request, as sent by the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddBlockArgs {
    /// Git URL, short block path or local directory.
    pub url: Option<String>,
    pub branch: Option<String>,
    /// Inline block files; selects the files pipeline when present.
    pub files: Option<IndexMap<String, String>>,
    pub dependencies: DepMap,
    pub dev_dependencies: DepMap,
    pub name: Option<String>,
    pub block_type: BlockType,
    pub path: Option<String>,
    pub route_path: Option<String>,
    pub npm_client: Option<String>,
    pub registry: Option<String>,
    pub dry_run: bool,
    pub skip_dependencies: bool,
    pub skip_modify_routes: bool,
    /// Forces page / component semantics regardless of the block's manifest.
    pub page: Option<bool>,
    pub layout: bool,
    pub execution: Execution,
    pub index: InsertIndex,
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOrigin {
    Git {
        spec: RepoSpec,
        cache_dir: PathBuf,
        repo_exists: bool,
    },
    Local,
    Files,
}

/// Output of `parseUrl`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub origin: BlockOrigin,
    pub blocks_temp_path: PathBuf,
    /// Directory holding the block's `package.json`; `None` for file blocks.
    pub source_path: Option<PathBuf>,
    pub npm_client: String,
    pub registry: String,
}

/// The block manifest and the paths derived from it. Produced by the
/// clone / update step, or directly by `parseUrl` for file blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct CloneResult {
    pub pkg: Value,
    /// Destination under `pages/`, with a leading `/`.
    pub file_path: String,
    pub route_path: String,
}

pub type GeneratorResult = GeneratorOutput;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stages {
    pub parse: Option<ParseResult>,
    pub clone: Option<CloneResult>,
    pub generator: Option<GeneratorResult>,
}

impl Stages {
    pub fn parse(&self) -> Result<&ParseResult, TaskError> {
        self.parse.as_ref().ok_or(TaskError::MissingStage("parseUrl"))
    }

    pub fn clone_result(&self) -> Result<&CloneResult, TaskError> {
        self.clone.as_ref().ok_or(TaskError::MissingStage("block package"))
    }

    pub fn generator(&self) -> Result<&GeneratorResult, TaskError> {
        self.generator
            .as_ref()
            .ok_or(TaskError::MissingStage("runGenerator"))
    }
}

/// What a finished (or interrupted) flow hands back to its caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<IndexMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// State owned by one flow and mutated in place by its tasks, one at a time.
pub struct FlowContext {
    pub project: Project,
    pub settings: Settings,
    pub logger: Logger,
    pub exec: Exec,
    pub generator: Arc<dyn BlockGenerator>,
    pub stages: Stages,
    pub result: FlowResult,
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("project", &self.project.cwd)
            .field("logger", &self.logger)
            .field("stages", &self.stages)
            .field("result", &self.result)
            .finish()
    }
}

impl FlowContext {
    pub fn new(
        project: Project,
        settings: Settings,
        logger: Logger,
        generator: Arc<dyn BlockGenerator>,
    ) -> Self {
        let exec = Exec::new(logger.clone(), ProcessSlot::new());
        Self {
            project,
            settings,
            logger,
            exec,
            generator,
            stages: Stages::default(),
            result: FlowResult::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_from_dashboard_payload() {
        let args: AddBlockArgs = serde_json::from_value(serde_json::json!({
            "url": "https://github.com/umijs/umi-blocks/tree/master/demo",
            "path": "/demo",
            "routePath": "/Demo",
            "npmClient": "yarn",
            "skipModifyRoutes": true,
            "page": false,
            "blockType": "template",
            "execution": "auto",
            "index": 2,
            "name": "demo",
        }))
        .unwrap();
        assert_eq!(args.route_path.as_deref(), Some("/Demo"));
        assert_eq!(args.npm_client.as_deref(), Some("yarn"));
        assert!(args.skip_modify_routes);
        assert_eq!(args.page, Some(false));
        assert_eq!(args.block_type, BlockType::Template);
        assert_eq!(args.execution, Execution::Auto);
        assert_eq!(args.index, InsertIndex::Position(2));
        assert!(!args.dry_run);
        assert!(args.files.is_none());
    }

    #[test]
    fn test_missing_stage() {
        let stages = Stages::default();
        assert_eq!(
            stages.generator().unwrap_err().to_string(),
            "Missing runGenerator result"
        );
    }
}
