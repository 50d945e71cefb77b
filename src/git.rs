//! Block sources backed by git.
//!
//! A block URL is turned into either a [`RepoSpec`] (a repository in the
//! local clone cache plus the sub-directory holding the block) or a local
//! directory. The clone / update sequences run through [`Exec`] so they
//! stream into the flow log and can be cancelled.

use std::path::{Component, Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{BlockConfig, Settings};
use crate::logger::Logger;
use crate::process::{Exec, ProcessError};

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("{0} can't match any pattern")]
    UnmatchedUrl(String),
    #[error("Failed to prepare block cache {}: {source}", .path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

lazy_static! {
    // https://github.com/<owner>/<name>[/tree/<ref>/<path>][.git], http://, git@host:,
    // gitlab hosts and bare IPv4 hosts
    static ref GIT_SITE: Regex = Regex::new(
        r"^(https://|http://|git@)((?:github|gitlab)[.\w\-]+|(?:(?:[0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5])\.){3}(?:[0-9]|[1-9][0-9]|1[0-9]{2}|2[0-4][0-9]|25[0-5]))(/|:)([\w\-]+)/([\w\-]+)(/tree/[\w.\-]+[\w\-/]+)?(\.git)?$"
    ).unwrap();
    static ref SHORT_PATH: Regex = Regex::new(r"^\w+[\w\-/]*$").unwrap();
    static ref LOCAL_PATH: Regex = Regex::new(r"^[./]|^[c-zC-Z]:").unwrap();
}

/// A block living inside a git repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    /// Clone URL, always ending in `.git`.
    pub repo: String,
    pub branch: String,
    /// Block directory inside the repo, with a leading `/`.
    pub path: String,
    /// `<host>/<owner>/<name>`; keys the cache directory.
    pub id: String,
}

impl RepoSpec {
    /// Working tree of this repo inside the cache root.
    pub fn cache_dir(&self, blocks_root: &Path) -> PathBuf {
        blocks_root.join(&self.id)
    }

    /// Directory holding the block's sources.
    pub fn source_path(&self, blocks_root: &Path) -> PathBuf {
        let dir = self.cache_dir(blocks_root);
        let sub = self.path.trim_matches('/');
        if sub.is_empty() { dir } else { dir.join(sub) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSource {
    Git(RepoSpec),
    /// A block already on disk; no git step needed.
    Local { source_path: PathBuf },
}

pub fn is_git_url(url: &str) -> bool {
    GIT_SITE.is_match(url)
}

/// Resolve a user-supplied block URL.
///
/// Short paths such as `DashboardAnalysis` are looked up in the project's
/// default block repository on `master`.
pub fn resolve_block_source(
    url: &str,
    block_config: &BlockConfig,
    settings: &Settings,
    cwd: &Path,
) -> Result<BlockSource, GitError> {
    tracing::debug!(url, "Resolving block source");
    let real_url = if is_git_url(url) {
        url.to_string()
    } else if SHORT_PATH.is_match(url) {
        let base = block_config.default_git_url.trim_end_matches('/');
        let real = format!("{base}/tree/master/{url}");
        tracing::debug!(url = %real, "Using default block repository");
        real
    } else if LOCAL_PATH.is_match(url) {
        return Ok(BlockSource::Local {
            source_path: normalize(&cwd.join(url)),
        });
    } else {
        return Err(GitError::UnmatchedUrl(url.to_string()));
    };
    parse_git_url(&real_url, block_config.close_fast_github, settings)
        .map(BlockSource::Git)
        .ok_or(GitError::UnmatchedUrl(real_url))
}

fn parse_git_url(url: &str, close_fast_github: bool, settings: &Settings) -> Option<RepoSpec> {
    let caps = GIT_SITE.captures(url)?;
    let protocol = caps.get(1)?.as_str();
    let host = caps.get(2)?.as_str();
    let sep = if protocol == "git@" { ":" } else { "/" };
    let owner = caps.get(4)?.as_str();
    let name = caps.get(5)?.as_str();

    let (git_ref, file_path) = match caps.get(6) {
        Some(tree) => {
            let rest = tree.as_str().trim_start_matches("/tree/");
            match rest.split_once('/') {
                Some((r, p)) => (Some(r.to_string()), p.trim_end_matches('/').to_string()),
                None => (Some(rest.to_string()), String::new()),
            }
        }
        None => (None, String::new()),
    };

    let repo_host = match &settings.github_mirror {
        Some(mirror) if host == "github.com" && !close_fast_github => mirror.as_str(),
        _ => host,
    };

    Some(RepoSpec {
        repo: url_add_git(&format!("{protocol}{repo_host}{sep}{owner}/{name}")),
        branch: settings
            .branch_override
            .clone()
            .or(git_ref)
            .unwrap_or_else(|| "master".to_string()),
        path: format!("/{file_path}"),
        id: format!("{host}/{owner}/{name}"),
    })
}

/// Hosts like gitlab redirect to a login page without the `.git` suffix.
fn url_add_git(url: &str) -> String {
    if url.ends_with(".git") {
        url.to_string()
    } else {
        format!("{url}.git")
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Make sure the clone cache root exists. Nothing is created on dry run.
pub fn ensure_blocks_temp_path(settings: &Settings, dry_run: bool) -> Result<PathBuf, GitError> {
    let root = settings.blocks_temp_path.clone();
    if !dry_run && !root.exists() {
        tracing::debug!(path = %root.display(), "Creating blocks cache");
        std::fs::create_dir_all(&root).map_err(|source| GitError::Cache {
            path: root.clone(),
            source,
        })?;
    }
    Ok(root)
}

/// Remove the whole clone cache. Returns a message for the UI.
pub fn clear_git_cache(settings: &Settings, dry_run: bool) -> Result<String, GitError> {
    let root = ensure_blocks_temp_path(settings, dry_run)?;
    let info = format!("🗑  start clear: {}", root.display());
    if !dry_run && root.exists() {
        std::fs::remove_dir_all(&root).map_err(|source| GitError::Cache {
            path: root.clone(),
            source,
        })?;
    }
    tracing::info!(path = %root.display(), "Cleared blocks cache");
    Ok(info)
}

pub fn is_submodule(dir: &Path) -> bool {
    dir.join(".gitmodules").exists()
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Arguments for the initial clone, run from the cache root.
pub fn clone_args(spec: &RepoSpec, single_branch: bool) -> Vec<String> {
    let mut args = vec!["clone".to_string(), spec.repo.clone(), spec.id.clone()];
    if single_branch {
        args.extend(["--single-branch".into(), "-b".into(), spec.branch.clone()]);
    }
    args.push("--recurse-submodules".into());
    args
}

/// Non-default branches are cloned alone so the working tree starts on them.
pub async fn clone_repo(
    exec: &Exec,
    logger: &Logger,
    spec: &RepoSpec,
    blocks_root: &Path,
) -> Result<(), ProcessError> {
    logger.start(&format!("🔍  clone git repo from {}", spec.repo));
    let result = exec
        .command("git")
        .args(clone_args(spec, spec.branch != "master"))
        .current_dir(blocks_root)
        .run()
        .await;
    match &result {
        Ok(()) => logger.succeed(None),
        Err(_) => logger.fail(None),
    }
    result
}

/// Bring a cached working tree up to date with `branch`.
///
/// A failed checkout is logged and ignored: the branch may only exist
/// remotely until the following pull.
pub async fn update_repo(
    exec: &Exec,
    logger: &Logger,
    dir: &Path,
    branch: &str,
) -> Result<(), ProcessError> {
    let git = |args: &[&str]| {
        exec.command("git")
            .args(args.iter().copied())
            .current_dir(dir)
            .run()
    };

    logger.append_log("⚓  Start git fetch");
    if let Err(e) = git(&["fetch"]).await {
        logger.append_log(&format!("Failed git fetch: {e}"));
        return Err(e);
    }
    logger.append_log("🎉  Success git fetch\n");

    logger.append_log(&format!("⚓  Start git checkout {branch}"));
    if let Err(e) = git(&["checkout", branch]).await {
        if e.is_termination() {
            return Err(e);
        }
        tracing::warn!(branch, "git checkout failed: {e}");
        logger.append_log(&format!("Failed git checkout: {e}\n"));
    }
    logger.append_log(&format!("🎉  Success git checkout {branch}\n"));

    logger.append_log("⚓  Start git pull");
    let pulled = async {
        git(&["pull"]).await?;
        if is_submodule(dir) {
            git(&["submodule", "init"]).await?;
            git(&["submodule", "update", "--recursive"]).await?;
        }
        Ok::<_, ProcessError>(())
    };
    if let Err(e) = pulled.await {
        if e.is_termination() {
            logger.append_log("Cancel git pull\n");
        } else {
            logger.append_log(&format!("Failed git pull: {e}\n"));
        }
        return Err(e);
    }
    logger.append_log("🎉  Success git pull\n");
    Ok(())
}
