//! Built-in tasks of the installation pipeline.
//!
//! Git blocks run `parseUrl`, then `gitClone` or `gitUpdate` (or `loadBlock`
//! for a block already on disk), `install`, `runGenerator` and
//! `writeRoutes`. Inline file blocks skip the git step.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::deps::{self, DepMap, InstallRequest};
use crate::generator::GeneratorRequest;
use crate::git::{self, BlockSource};
use crate::insert_component::append_block_to_container;
use crate::project::add_prefix;
use crate::routes::{self, RouteNode, RouteOptions};

use super::{
    AddBlockArgs, BlockOrigin, CloneResult, FlowContext, FlowTask, ParseResult, TaskError,
};

const USAGE: &str = "run `umi help block` to checkout the usage";

/// Task list for `args`. Clone vs update is settled here, once, from
/// whether the repo is already in the cache.
pub fn registry_tasks(ctx: &FlowContext, args: &AddBlockArgs) -> Vec<Box<dyn FlowTask>> {
    if args.files.is_some() {
        return vec![
            Box::new(ParseFiles),
            Box::new(Install),
            Box::new(RunGenerator),
            Box::new(WriteRoutes),
        ];
    }
    let source = args.url.as_deref().map(|url| {
        git::resolve_block_source(url, &ctx.project.block, &ctx.settings, &ctx.project.cwd)
    });
    let sync: Box<dyn FlowTask> = match source {
        Some(Ok(BlockSource::Git(spec)))
            if spec.cache_dir(&ctx.settings.blocks_temp_path).exists() =>
        {
            Box::new(GitUpdate)
        }
        Some(Ok(BlockSource::Local { .. })) => Box::new(LoadBlock),
        _ => Box::new(GitClone),
    };
    vec![
        Box::new(ParseUrl),
        sync,
        Box::new(Install),
        Box::new(RunGenerator),
        Box::new(WriteRoutes),
    ]
}

/// Last `/` segment of the manifest's `name`.
pub fn block_name_from_pkg(pkg: &Value) -> Option<String> {
    pkg.get("name")
        .and_then(Value::as_str)
        .and_then(|n| n.rsplit('/').next())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// parseUrl
// ---------------------------------------------------------------------------

pub struct ParseUrl;

#[async_trait]
impl FlowTask for ParseUrl {
    fn name(&self) -> &'static str {
        "parseUrl"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        let url = args
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TaskError::Message(USAGE.to_string()))?;
        ctx.result.block_url = Some(url.to_string());

        let source =
            git::resolve_block_source(url, &ctx.project.block, &ctx.settings, &ctx.project.cwd)?;
        let blocks_temp_path = git::ensure_blocks_temp_path(&ctx.settings, args.dry_run)?;
        let (origin, source_path) = match source {
            BlockSource::Git(mut spec) => {
                if let Some(branch) = args.branch.as_deref().filter(|b| !b.is_empty()) {
                    spec.branch = branch.to_string();
                }
                let cache_dir = spec.cache_dir(&blocks_temp_path);
                let source_path = spec.source_path(&blocks_temp_path);
                let repo_exists = cache_dir.exists();
                tracing::debug!(repo = %spec.repo, branch = %spec.branch, repo_exists, "Parsed git block");
                (
                    BlockOrigin::Git {
                        spec,
                        cache_dir,
                        repo_exists,
                    },
                    source_path,
                )
            }
            BlockSource::Local { source_path } => (BlockOrigin::Local, source_path),
        };

        ctx.stages.parse = Some(ParseResult {
            origin,
            blocks_temp_path,
            source_path: Some(source_path),
            npm_client: ctx.project.npm_client(args.npm_client.as_deref()),
            registry: args
                .registry
                .clone()
                .unwrap_or_else(|| ctx.settings.registry.clone()),
        });
        Ok(())
    }
}

/// `parseUrl` for inline file blocks: the manifest comes from the request.
pub struct ParseFiles;

#[async_trait]
impl FlowTask for ParseFiles {
    fn name(&self) -> &'static str {
        "parseUrl"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        let files = args
            .files
            .as_ref()
            .ok_or_else(|| TaskError::Message(USAGE.to_string()))?;
        ctx.result.files = Some(files.clone());

        let file_path = add_prefix(&args.path.clone().unwrap_or_default().replace('\\', "/"));
        let route_path = add_prefix(args.route_path.as_deref().unwrap_or(&file_path));
        tracing::debug!(file_path = %file_path, route_path = %route_path, files = files.len(), "Parsed file block");

        ctx.stages.parse = Some(ParseResult {
            origin: BlockOrigin::Files,
            blocks_temp_path: ctx.settings.blocks_temp_path.clone(),
            source_path: None,
            npm_client: ctx.project.npm_client(args.npm_client.as_deref()),
            registry: args
                .registry
                .clone()
                .unwrap_or_else(|| ctx.settings.registry.clone()),
        });
        ctx.stages.clone = Some(CloneResult {
            pkg: json!({
                "dependencies": args.dependencies,
                "devDependencies": args.dev_dependencies,
            }),
            file_path,
            route_path,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// gitClone / gitUpdate / loadBlock
// ---------------------------------------------------------------------------

/// Read the block manifest from `source_path` and settle the destination
/// and route paths.
pub fn load_block_package(
    ctx: &FlowContext,
    args: &AddBlockArgs,
    source_path: &Path,
) -> Result<CloneResult, TaskError> {
    if !args.dry_run && !source_path.exists() {
        return Err(TaskError::Message(format!(
            "{} don't exists",
            source_path.display()
        )));
    }
    let pkg_path = source_path.join("package.json");
    let pkg = if pkg_path.exists() {
        deps::read_package_json(&pkg_path)?
    } else if args.dry_run {
        tracing::debug!(path = %pkg_path.display(), "dryRun is true, no block package.json");
        json!({})
    } else {
        return Err(TaskError::Message(format!(
            "not find package.json in {}",
            source_path.display()
        )));
    };

    let file_path = match args.path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => path.replace('\\', "/"),
        None => {
            let Some(name) = block_name_from_pkg(&pkg).or_else(|| args.name.clone()) else {
                let msg = "Can not find name in block's package.json";
                ctx.logger.append_log(msg);
                return Err(TaskError::Message(msg.to_string()));
            };
            format!("/{name}")
        }
    };
    let file_path = add_prefix(&file_path);
    let route_path = add_prefix(args.route_path.as_deref().unwrap_or(&file_path));
    Ok(CloneResult {
        pkg,
        file_path,
        route_path,
    })
}

fn git_origin(ctx: &FlowContext) -> Result<ParseResult, TaskError> {
    let parse = ctx.stages.parse()?.clone();
    match parse.origin {
        BlockOrigin::Git { .. } => Ok(parse),
        _ => Err(TaskError::Message("block is not in a git repository".into())),
    }
}

pub struct GitClone;

#[async_trait]
impl FlowTask for GitClone {
    fn name(&self) -> &'static str {
        "gitClone"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        let parse = git_origin(ctx)?;
        if let BlockOrigin::Git { spec, .. } = &parse.origin {
            if args.dry_run {
                ctx.logger
                    .append_log(&format!("🔍  dryRun, skip clone git repo from {}", spec.repo));
            } else {
                git::clone_repo(&ctx.exec, &ctx.logger, spec, &parse.blocks_temp_path).await?;
            }
        }
        let source_path = parse.source_path.unwrap_or_default();
        ctx.stages.clone = Some(load_block_package(ctx, args, &source_path)?);
        Ok(())
    }
}

pub struct GitUpdate;

#[async_trait]
impl FlowTask for GitUpdate {
    fn name(&self) -> &'static str {
        "gitUpdate"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        let parse = git_origin(ctx)?;
        if let BlockOrigin::Git {
            spec, cache_dir, ..
        } = &parse.origin
            && !args.dry_run
        {
            git::update_repo(&ctx.exec, &ctx.logger, cache_dir, &spec.branch).await?;
        }
        let source_path = parse.source_path.unwrap_or_default();
        ctx.stages.clone = Some(load_block_package(ctx, args, &source_path)?);
        Ok(())
    }
}

/// A block directory on the local disk; nothing to fetch.
pub struct LoadBlock;

#[async_trait]
impl FlowTask for LoadBlock {
    fn name(&self) -> &'static str {
        "loadBlock"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        let source_path = ctx.stages.parse()?.source_path.clone().unwrap_or_default();
        ctx.logger
            .append_log(&format!("📂  Use local block {}", source_path.display()));
        ctx.stages.clone = Some(load_block_package(ctx, args, &source_path)?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// install
// ---------------------------------------------------------------------------

pub struct Install;

#[async_trait]
impl FlowTask for Install {
    fn name(&self) -> &'static str {
        "install"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        let parse = ctx.stages.parse()?;
        let block = ctx.stages.clone_result()?;
        let block_deps = deps::dep_map(&block.pkg, "dependencies");
        // Inline-file blocks declare their dev dependencies directly. Fetched
        // blocks only need what their mock file imports; the rest of their
        // devDependencies are for building the block itself.
        let block_dev_deps = match (&parse.origin, &parse.source_path) {
            (BlockOrigin::Files, _) | (_, None) => deps::dep_map(&block.pkg, "devDependencies"),
            (_, Some(source_path)) => {
                let mock = source_path.join("src").join("_mock.js");
                match std::fs::read_to_string(&mock) {
                    Ok(text) => deps::mock_dependencies(&text, &block.pkg).unwrap_or_else(|e| {
                        tracing::warn!(path = %mock.display(), "Skipping mock dependencies: {e}");
                        DepMap::new()
                    }),
                    Err(_) => DepMap::new(),
                }
            }
        };

        let req = InstallRequest {
            package_json: ctx.project.package_json_path(),
            block_deps,
            block_dev_deps,
            npm_client: parse.npm_client.clone(),
            registry: parse.registry.clone(),
            dry_run: args.dry_run,
            skip_dependencies: args.skip_dependencies,
        };
        let plan = deps::install_dependencies(&ctx.exec, &ctx.logger, &req).await?;
        tracing::debug!(
            lacks = plan.lacks.len(),
            dev_lacks = plan.dev_lacks.len(),
            "Install finished"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// runGenerator
// ---------------------------------------------------------------------------

pub struct RunGenerator;

#[async_trait]
impl FlowTask for RunGenerator {
    fn name(&self) -> &'static str {
        "runGenerator"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        ctx.logger.append_log("📦  Start generate files");
        let parse = ctx.stages.parse()?;
        let block = ctx.stages.clone_result()?;

        let spec_version = block
            .pkg
            .pointer("/blockConfig/specVersion")
            .and_then(Value::as_str);
        let is_page_block = args.page.unwrap_or(spec_version == Some("0.1"));
        tracing::debug!(is_page_block, "Running generator");

        let req = GeneratorRequest {
            source_path: parse.source_path.clone(),
            files: args.files.clone(),
            path: block.file_path.clone(),
            route_path: block.route_path.clone(),
            block_type: args.block_type,
            block_name: args
                .name
                .clone()
                .or_else(|| block_name_from_pkg(&block.pkg))
                .unwrap_or_default(),
            is_page_block,
            dry_run: args.dry_run,
            execution: args.execution,
            cwd: ctx.project.cwd.clone(),
            pages_path: ctx.project.abs_pages_path.clone(),
        };
        let generator = ctx.generator.clone();
        let output = match generator.run(&req, &ctx.logger).await {
            Ok(output) => output,
            Err(e) => {
                ctx.logger
                    .append_log(&format!("Failed generate files: {e}\n"));
                return Err(e.into());
            }
        };
        ctx.logger.append_log("🎉  Success generate files\n");
        ctx.stages.generator = Some(output);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// writeRoutes
// ---------------------------------------------------------------------------

pub struct WriteRoutes;

#[async_trait]
impl FlowTask for WriteRoutes {
    fn name(&self) -> &'static str {
        "writeRoutes"
    }

    async fn run(&self, ctx: &mut FlowContext, args: &AddBlockArgs) -> Result<(), TaskError> {
        let generator = ctx.stages.generator()?.clone();
        let logger = ctx.logger.clone();

        if generator.need_create_new_route
            && ctx.project.has_routes
            && !args.skip_modify_routes
            && let Some(config_file) = &ctx.project.route_config_path
        {
            logger.append_log(&format!(
                "🛠 Start write route from {} to {}",
                generator.route_path,
                config_file.display()
            ));
            let route = RouteNode {
                name: args.name.clone(),
                path: generator.route_path.to_lowercase(),
                component: Some(format!(".{}", generator.path)),
                routes: args.layout.then(Vec::new),
                ..Default::default()
            };
            if !args.dry_run {
                let opts = RouteOptions {
                    src_root: &ctx.project.abs_src_path,
                    child_routes_compat: ctx.settings.child_routes_compat,
                };
                if let Err(e) = routes::write_new_route(config_file, &route, opts) {
                    logger.append_log(&format!("Failed to write route: {e}\n"));
                    return Err(e.into());
                }
            }
            logger.append_log("🎉  Success write route\n");
        }

        if !generator.is_page_block {
            logger.append_log(&format!(
                "🍽  Start write block component {} import to {}",
                generator.block_folder_name,
                generator.entry_path.display()
            ));
            append_block_to_container(
                &generator.entry_path,
                &generator.block_folder_name,
                args.dry_run,
                args.index,
            )?;
            logger.append_log("🎉  Success write block component \n");
        }

        let view_url = ctx.settings.preview_url(&generator.path);
        logger.append_log(&format!("✨  Probable url {view_url} for view the block."));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
