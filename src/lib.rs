//! Block installation engine behind the UmiUI "add block" dashboard.
//!
//! [`BlockAdder`] is the entry point: it runs a [`flow::Flow`] that fetches a
//! block (git, local directory or inline files), reconciles and installs its
//! npm dependencies, generates its files and wires it into the host project's
//! route config or page component. Progress is reported as
//! [`events::FlowEvent`]s.

pub mod block;
pub mod cli;
pub mod config;
pub mod deps;
pub mod events;
pub mod flow;
pub mod generator;
pub mod git;
pub mod insert_component;
pub mod logger;
pub mod logging;
pub mod process;
pub mod project;
pub mod routes;
pub mod semver;
pub mod syntax;

pub use block::BlockAdder;
pub use config::{BlockConfig, Settings};
pub use flow::{AddBlockArgs, Flow, FlowError, FlowState, TaskError};
pub use project::Project;
