//! Dependency reconciliation between a block and the host project.
//!
//! [`reconcile`] is pure: it compares the block's declared dependencies
//! against the project's and reports what is missing and what conflicts.
//! [`install_dependencies`] drives the whole install step around it: read
//! the project's `package.json`, refuse on conflicts, then either run the
//! package manager or (with `skip_dependencies`) merge the missing entries
//! into `package.json` directly.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::{ConfigError, save_json_config};
use crate::logger::Logger;
use crate::process::{Exec, ProcessError};
use crate::semver;
use crate::syntax::{Module, SyntaxError};

/// Package name → version range, in declaration order.
pub type DepMap = IndexMap<String, String>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyDescriptor {
    pub name: String,
    pub version: String,
}

impl DependencyDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name@version`, as passed to the package manager.
    pub fn spec(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub name: String,
    pub block_version: String,
    pub project_version: String,
}

impl ConflictRecord {
    pub fn new(
        name: impl Into<String>,
        block_version: impl Into<String>,
        project_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            block_version: block_version.into(),
            project_version: project_version.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub conflicts: Vec<ConflictRecord>,
    pub lacks: Vec<DependencyDescriptor>,
    pub dev_conflicts: Vec<ConflictRecord>,
    pub dev_lacks: Vec<DependencyDescriptor>,
}

impl Reconciliation {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty() || !self.dev_conflicts.is_empty()
    }

    /// Every runtime and dev conflict, or `None` when the block fits.
    pub fn conflict_error(&self) -> Option<ConflictError> {
        if !self.has_conflicts() {
            return None;
        }
        let all = self
            .conflicts
            .iter()
            .chain(&self.dev_conflicts)
            .cloned()
            .collect();
        Some(ConflictError(all))
    }

    /// Dev dependencies to install, minus those already installed as
    /// runtime dependencies.
    pub fn dev_installs(&self) -> Vec<&DependencyDescriptor> {
        self.dev_lacks
            .iter()
            .filter(|dev| !self.lacks.iter().any(|dep| dep.name == dev.name))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("find dependencies conflict between block and your project:{}", format_conflicts(.0))]
pub struct ConflictError(pub Vec<ConflictRecord>);

fn format_conflicts(conflicts: &[ConflictRecord]) -> String {
    conflicts
        .iter()
        .map(|c| {
            format!(
                "\n* {}: {}(your project) not compatible with {}(block)",
                c.name, c.project_version, c.block_version
            )
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum DepsError {
    #[error("No package.json found in your project")]
    MissingPackageJson(PathBuf),
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Write(#[from] ConfigError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
}

impl DepsError {
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Process(e) if e.is_termination())
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Compare block dependencies against the project's.
///
/// Runtime dependencies are looked up in `project_deps`, falling back to
/// `project_all_deps`; dev dependencies only in `project_all_deps`, so a dev
/// dependency the project already has at runtime counts as satisfied.
/// Output order follows the block's declaration order.
pub fn reconcile(
    block_deps: &DepMap,
    project_deps: &DepMap,
    block_dev_deps: &DepMap,
    project_all_deps: &DepMap,
) -> Reconciliation {
    let (conflicts, lacks) = compare(block_deps, |name| {
        project_deps.get(name).or_else(|| project_all_deps.get(name))
    });
    let (dev_conflicts, dev_lacks) = compare(block_dev_deps, |name| project_all_deps.get(name));
    Reconciliation {
        conflicts,
        lacks,
        dev_conflicts,
        dev_lacks,
    }
}

fn compare<'p>(
    wanted: &DepMap,
    installed: impl Fn(&str) -> Option<&'p String>,
) -> (Vec<ConflictRecord>, Vec<DependencyDescriptor>) {
    let mut conflicts = Vec::new();
    let mut lacks = Vec::new();
    for (name, range) in wanted {
        match installed(name) {
            None => lacks.push(DependencyDescriptor::new(name, range)),
            Some(current) if !semver::intersects(current, range) => {
                conflicts.push(ConflictRecord::new(name, range, current));
            }
            Some(_) => {}
        }
    }
    (conflicts, lacks)
}

// ---------------------------------------------------------------------------
// package.json helpers
// ---------------------------------------------------------------------------

/// String entries of a dependency map in a `package.json` value.
pub fn dep_map(pkg: &Value, key: &str) -> DepMap {
    pkg.get(key)
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .filter_map(|(name, v)| v.as_str().map(|v| (name.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

pub fn read_package_json(path: &Path) -> Result<Value, DepsError> {
    let content = std::fs::read_to_string(path).map_err(|source| DepsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| DepsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// npm package name for an import source; `None` for relative imports.
fn package_name(source: &str) -> Option<String> {
    if source.is_empty() || source.starts_with('.') || source.starts_with('/') {
        return None;
    }
    let segments = if source.starts_with('@') { 2 } else { 1 };
    Some(
        source
            .split('/')
            .take(segments)
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Packages imported by a block's mock file, with the versions the block
/// declares for them. Imports the block does not declare are skipped.
pub fn mock_dependencies(mock_src: &str, block_pkg: &Value) -> Result<DepMap, SyntaxError> {
    let dev = dep_map(block_pkg, "devDependencies");
    let runtime = dep_map(block_pkg, "dependencies");
    let module = Module::parse(mock_src)?;
    let mut deps = DepMap::new();
    for import in module.imports() {
        let Some(name) = package_name(&import.source) else {
            continue;
        };
        if let Some(version) = dev.get(&name).or_else(|| runtime.get(&name)) {
            deps.insert(name, version.clone());
        }
    }
    Ok(deps)
}

fn sorted_merge(lacking: &[DependencyDescriptor], existing: &DepMap) -> serde_json::Map<String, Value> {
    let mut merged: DepMap = lacking
        .iter()
        .map(|d| (d.name.clone(), d.version.clone()))
        .collect();
    for (name, version) in existing {
        merged.insert(name.clone(), version.clone());
    }
    merged.sort_keys();
    merged
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

/// `package.json` with the lacking packages added. Versions already in the
/// project win; both dependency maps come out sorted by name.
pub fn merge_package_json(
    project_pkg: &Value,
    lacks: &[DependencyDescriptor],
    dev_lacks: &[DependencyDescriptor],
) -> Value {
    let mut pkg = project_pkg.clone();
    let deps = sorted_merge(lacks, &dep_map(project_pkg, "dependencies"));
    let dev_deps = sorted_merge(dev_lacks, &dep_map(project_pkg, "devDependencies"));
    if let Some(obj) = pkg.as_object_mut() {
        obj.insert("dependencies".to_string(), Value::Object(deps));
        obj.insert("devDependencies".to_string(), Value::Object(dev_deps));
    }
    pkg
}

// ---------------------------------------------------------------------------
// Package manager
// ---------------------------------------------------------------------------

fn is_yarn(npm_client: &str) -> bool {
    npm_client.contains("yarn")
}

/// Arguments for installing `specs` with `npm_client`.
pub fn install_args(npm_client: &str, specs: &[String], registry: &str, dev: bool) -> Vec<String> {
    let yarn = is_yarn(npm_client);
    let mut args: Vec<String> = match (yarn, dev) {
        (true, _) => vec!["add".into()],
        (false, false) => vec!["install".into(), "-d".into()],
        (false, true) => vec!["install".into()],
    };
    args.extend(specs.iter().cloned());
    args.push(format!("--registry={registry}"));
    match (yarn, dev) {
        (true, true) => args.push("--dev".into()),
        (true, false) => {}
        (false, false) => args.push("--save".into()),
        (false, true) => args.push("--save-dev".into()),
    }
    args
}

/// Inputs of the install step.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub package_json: PathBuf,
    pub block_deps: DepMap,
    pub block_dev_deps: DepMap,
    pub npm_client: String,
    pub registry: String,
    pub dry_run: bool,
    pub skip_dependencies: bool,
}

/// Reconcile and install. Conflicts abort before anything is touched.
pub async fn install_dependencies(
    exec: &Exec,
    logger: &Logger,
    req: &InstallRequest,
) -> Result<Reconciliation, DepsError> {
    if !req.package_json.exists() {
        return Err(DepsError::MissingPackageJson(req.package_json.clone()));
    }
    let project_pkg = read_package_json(&req.package_json)?;
    let project_deps = dep_map(&project_pkg, "dependencies");
    let mut project_all = dep_map(&project_pkg, "devDependencies");
    project_all.extend(project_deps.clone());

    let plan = reconcile(
        &req.block_deps,
        &project_deps,
        &req.block_dev_deps,
        &project_all,
    );
    tracing::debug!(
        conflicts = ?plan.conflicts,
        lacks = ?plan.lacks,
        dev_conflicts = ?plan.dev_conflicts,
        dev_lacks = ?plan.dev_lacks,
        "Reconciled block dependencies"
    );
    if let Some(err) = plan.conflict_error() {
        return Err(err.into());
    }
    if req.dry_run {
        tracing::debug!("dryRun is true, skip install dependencies");
        return Ok(plan);
    }

    if req.skip_dependencies {
        let merged = merge_package_json(&project_pkg, &plan.lacks, &plan.dev_lacks);
        save_json_config(&req.package_json, &merged)?;
        return Ok(plan);
    }

    let cwd = req
        .package_json
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if !plan.lacks.is_empty() {
        let specs: Vec<String> = plan.lacks.iter().map(DependencyDescriptor::spec).collect();
        logger.start(&format!(
            "📦  Install additional dependencies {} with {} --registry {}",
            specs.join(","),
            req.npm_client,
            req.registry
        ));
        let result = exec
            .command(&req.npm_client)
            .args(install_args(&req.npm_client, &specs, &req.registry, false))
            .current_dir(&cwd)
            .env("PUPPETEER_SKIP_CHROMIUM_DOWNLOAD", "true")
            .run()
            .await;
        if let Err(e) = result {
            logger.fail(None);
            return Err(e.into());
        }
        logger.succeed(None);
    }

    let dev_specs: Vec<String> = plan
        .dev_installs()
        .into_iter()
        .map(DependencyDescriptor::spec)
        .collect();
    if !dev_specs.is_empty() {
        logger.start(&format!(
            "Install additional devDependencies {} with {} --registry {}",
            dev_specs.join(","),
            req.npm_client,
            req.registry
        ));
        let result = exec
            .command(&req.npm_client)
            .args(install_args(&req.npm_client, &dev_specs, &req.registry, true))
            .current_dir(&cwd)
            .run()
            .await;
        if let Err(e) = result {
            logger.fail(None);
            return Err(e.into());
        }
        logger.succeed(None);
    }
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::process::ProcessSlot;
    use serde_json::json;

    fn deps(pairs: &[(&str, &str)]) -> DepMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_conflicting_major_versions() {
        let project = deps(&[("react", "^16.0.0")]);
        let plan = reconcile(
            &deps(&[("react", "^17.0.0")]),
            &project,
            &DepMap::new(),
            &project,
        );
        assert_eq!(
            plan.conflicts,
            vec![ConflictRecord::new("react", "^17.0.0", "^16.0.0")]
        );
        assert!(plan.lacks.is_empty());
        assert!(plan.has_conflicts());
    }

    #[test]
    fn test_satisfied_ranges_are_neither_lacking_nor_conflicting() {
        let project = deps(&[("react", "^16.8.0"), ("antd", "~4.2.0")]);
        let plan = reconcile(
            &deps(&[("react", "^16.0.0"), ("antd", "4.x")]),
            &project,
            &DepMap::new(),
            &project,
        );
        assert_eq!(plan, Reconciliation::default());
    }

    #[test]
    fn test_lacks_keep_declaration_order() {
        let plan = reconcile(
            &deps(&[("moment", "^2.0.0"), ("classnames", "^2.2.6"), ("react", "^16.0.0")]),
            &deps(&[("react", "^16.12.0")]),
            &DepMap::new(),
            &deps(&[("react", "^16.12.0")]),
        );
        let names: Vec<&str> = plan.lacks.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["moment", "classnames"]);
    }

    #[test]
    fn test_dev_deps_checked_against_all_project_deps() {
        let project = deps(&[("mockjs", "^1.0.1")]);
        let all = deps(&[("mockjs", "^1.0.1"), ("jest", "^24.0.0")]);
        let plan = reconcile(
            &DepMap::new(),
            &project,
            &deps(&[("mockjs", "^1.0.0"), ("jest", "^26.0.0"), ("umi-request", "^1.0.0")]),
            &all,
        );
        assert_eq!(
            plan.dev_conflicts,
            vec![ConflictRecord::new("jest", "^26.0.0", "^24.0.0")]
        );
        assert_eq!(plan.dev_lacks, vec![DependencyDescriptor::new("umi-request", "^1.0.0")]);
    }

    #[test]
    fn test_runtime_lookup_falls_back_to_dev_deps() {
        let plan = reconcile(
            &deps(&[("lodash", "^4.0.0")]),
            &DepMap::new(),
            &DepMap::new(),
            &deps(&[("lodash", "^4.17.15")]),
        );
        assert_eq!(plan, Reconciliation::default());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let block = deps(&[("react", "^17.0.0"), ("moment", "^2.0.0")]);
        let project = deps(&[("react", "^16.0.0")]);
        let first = reconcile(&block, &project, &block, &project);
        let second = reconcile(&block, &project, &block, &project);
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_semver_specifiers_never_conflict() {
        let project = deps(&[("antd", "latest"), ("utils", "github:foo/utils")]);
        let plan = reconcile(
            &deps(&[("antd", "^4.0.0"), ("utils", "^1.0.0")]),
            &project,
            &DepMap::new(),
            &project,
        );
        assert!(!plan.has_conflicts());
    }

    #[test]
    fn test_conflict_error_message() {
        let plan = Reconciliation {
            conflicts: vec![ConflictRecord::new("react", "^17.0.0", "^16.0.0")],
            dev_conflicts: vec![ConflictRecord::new("jest", "^26.0.0", "^24.0.0")],
            ..Default::default()
        };
        assert_eq!(
            plan.conflict_error().unwrap().to_string(),
            "find dependencies conflict between block and your project:\n\
             * react: ^16.0.0(your project) not compatible with ^17.0.0(block)\n\
             * jest: ^24.0.0(your project) not compatible with ^26.0.0(block)"
        );
        assert!(Reconciliation::default().conflict_error().is_none());
    }

    #[test]
    fn test_dev_installs_skip_runtime_lacks() {
        let plan = Reconciliation {
            lacks: vec![DependencyDescriptor::new("moment", "^2.0.0")],
            dev_lacks: vec![
                DependencyDescriptor::new("moment", "^2.0.0"),
                DependencyDescriptor::new("mockjs", "^1.0.0"),
            ],
            ..Default::default()
        };
        let names: Vec<&str> = plan.dev_installs().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["mockjs"]);
    }

    #[test]
    fn test_install_args() {
        let specs = vec!["moment@^2.0.0".to_string()];
        let registry = "https://registry.npmjs.org";
        assert_eq!(
            install_args("npm", &specs, registry, false),
            ["install", "-d", "moment@^2.0.0", "--registry=https://registry.npmjs.org", "--save"]
        );
        assert_eq!(
            install_args("tnpm", &specs, registry, true),
            ["install", "moment@^2.0.0", "--registry=https://registry.npmjs.org", "--save-dev"]
        );
        assert_eq!(
            install_args("yarn", &specs, registry, false),
            ["add", "moment@^2.0.0", "--registry=https://registry.npmjs.org"]
        );
        assert_eq!(
            install_args("/usr/local/bin/yarn", &specs, registry, true),
            ["add", "moment@^2.0.0", "--registry=https://registry.npmjs.org", "--dev"]
        );
    }

    #[test]
    fn test_mock_dependencies() {
        let mock = r#"
import mockjs from 'mockjs';
import { delay } from 'roadhog-api-doc/lib/utils';
import { parse } from '@scope/url/parse';
import data from './data';
import missing from 'not-declared';
"#;
        let pkg = json!({
            "dependencies": { "roadhog-api-doc": "^1.1.2" },
            "devDependencies": { "mockjs": "^1.0.1-beta3", "@scope/url": "^0.2.0" }
        });
        let found = mock_dependencies(mock, &pkg).unwrap();
        assert_eq!(
            found,
            deps(&[
                ("mockjs", "^1.0.1-beta3"),
                ("roadhog-api-doc", "^1.1.2"),
                ("@scope/url", "^0.2.0")
            ])
        );
    }

    #[test]
    fn test_merge_package_json_prefers_project_versions() {
        let project = json!({
            "name": "app",
            "dependencies": { "react": "^16.12.0", "antd": "^4.0.0" }
        });
        let merged = merge_package_json(
            &project,
            &[
                DependencyDescriptor::new("moment", "^2.0.0"),
                DependencyDescriptor::new("react", "^16.0.0"),
            ],
            &[DependencyDescriptor::new("mockjs", "^1.0.0")],
        );
        let names: Vec<&String> = merged["dependencies"].as_object().unwrap().keys().collect();
        assert_eq!(names, ["antd", "moment", "react"]);
        assert_eq!(merged["dependencies"]["react"], "^16.12.0");
        assert_eq!(merged["devDependencies"]["mockjs"], "^1.0.0");
        assert_eq!(merged["name"], "app");
    }

    fn harness() -> (Exec, Logger) {
        let logger = Logger::new("deps", EventSink::detached());
        (Exec::new(logger.clone(), ProcessSlot::new()), logger)
    }

    fn request(dir: &Path, block: DepMap) -> InstallRequest {
        InstallRequest {
            package_json: dir.join("package.json"),
            block_deps: block,
            block_dev_deps: DepMap::new(),
            npm_client: "npm".into(),
            registry: "https://registry.npmjs.org".into(),
            dry_run: false,
            skip_dependencies: false,
        }
    }

    #[tokio::test]
    async fn test_missing_package_json() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, logger) = harness();
        let err = install_dependencies(&exec, &logger, &request(dir.path(), DepMap::new()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No package.json found in your project");
    }

    #[tokio::test]
    async fn test_conflicts_abort_before_install() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies":{"react":"^16.0.0"}}"#,
        )
        .unwrap();
        let (exec, logger) = harness();
        let mut req = request(dir.path(), deps(&[("react", "^17.0.0"), ("moment", "^2.0.0")]));
        req.skip_dependencies = true;
        let err = install_dependencies(&exec, &logger, &req).await.unwrap_err();
        assert!(matches!(err, DepsError::Conflict(_)));
        // Nothing was merged and nothing was spawned
        let pkg = read_package_json(&req.package_json).unwrap();
        assert!(pkg["dependencies"].get("moment").is_none());
        assert_eq!(logger.get_log(), "");
    }

    #[tokio::test]
    async fn test_dry_run_skips_install() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"dependencies":{}}"#).unwrap();
        let (exec, logger) = harness();
        let mut req = request(dir.path(), deps(&[("moment", "^2.0.0")]));
        req.dry_run = true;
        req.npm_client = "/nonexistent/npm".into();
        let plan = install_dependencies(&exec, &logger, &req).await.unwrap();
        assert_eq!(plan.lacks, vec![DependencyDescriptor::new("moment", "^2.0.0")]);
        assert_eq!(logger.get_log(), "");
    }

    #[tokio::test]
    async fn test_skip_dependencies_rewrites_package_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"app","dependencies":{"react":"^16.0.0"}}"#,
        )
        .unwrap();
        let (exec, logger) = harness();
        let mut req = request(dir.path(), deps(&[("moment", "^2.0.0"), ("react", "^16.8.0")]));
        req.block_dev_deps = deps(&[("mockjs", "^1.0.0")]);
        req.skip_dependencies = true;
        install_dependencies(&exec, &logger, &req).await.unwrap();
        let pkg = read_package_json(&req.package_json).unwrap();
        assert_eq!(pkg["dependencies"]["moment"], "^2.0.0");
        assert_eq!(pkg["dependencies"]["react"], "^16.0.0");
        assert_eq!(pkg["devDependencies"]["mockjs"], "^1.0.0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_install_marks_spinner_failed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"dependencies":{}}"#).unwrap();
        let (exec, logger) = harness();
        let mut req = request(dir.path(), deps(&[("moment", "^2.0.0")]));
        req.npm_client = "false".into();
        let err = install_dependencies(&exec, &logger, &req).await.unwrap_err();
        assert!(matches!(err, DepsError::Process(ProcessError::NonZeroExit { .. })));
        let log = logger.get_log();
        assert!(log.starts_with("- 📦  Install additional dependencies moment@^2.0.0 with false"));
        assert!(log.ends_with("✖ 📦  Install additional dependencies moment@^2.0.0 with false --registry https://registry.npmjs.org\n"));
    }
}
