//! Boundary to the code generator that materializes a block's files.
//!
//! The flow only depends on [`BlockGenerator`]; [`FsGenerator`] is the
//! built-in implementation that copies a block's `src/` (or an inline file
//! map) into the project's pages directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::insert_component::upper_camel_case;
use crate::logger::Logger;

const JS_EXTNAMES: &[&str] = &[".js", ".jsx", ".ts", ".tsx"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    #[default]
    Block,
    Template,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    #[default]
    Shell,
    Auto,
}

/// Everything the generator needs to materialize one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorRequest {
    /// Block directory on disk; `None` for inline file blocks.
    pub source_path: Option<PathBuf>,
    pub files: Option<IndexMap<String, String>>,
    /// Destination under the pages directory, with a leading `/`.
    pub path: String,
    pub route_path: String,
    pub block_type: BlockType,
    pub block_name: String,
    pub is_page_block: bool,
    pub dry_run: bool,
    pub execution: Execution,
    pub cwd: PathBuf,
    pub pages_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorOutput {
    pub path: String,
    pub route_path: String,
    pub block_folder_name: String,
    /// Page file a component block gets inserted into.
    pub entry_path: PathBuf,
    pub is_page_block: bool,
    pub need_create_new_route: bool,
}

#[async_trait]
pub trait BlockGenerator: Send + Sync {
    async fn run(&self, req: &GeneratorRequest, logger: &Logger) -> anyhow::Result<GeneratorOutput>;
}

/// `<base>/<name>` with the first JS extension that exists.
pub fn find_js(base: &Path, name: &str) -> Option<PathBuf> {
    JS_EXTNAMES
        .iter()
        .map(|ext| base.join(format!("{name}{ext}")))
        .find(|p| p.exists())
}

// ---------------------------------------------------------------------------
// Built-in generator
// ---------------------------------------------------------------------------

/// Copies block sources into `pages/<path>` for page blocks and
/// `pages/<path>/<BlockName>` for component blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsGenerator;

fn copy_dir(from: &Path, to: &Path) -> anyhow::Result<usize> {
    std::fs::create_dir_all(to).with_context(|| format!("Failed to create {}", to.display()))?;
    let mut copied = 0;
    for entry in std::fs::read_dir(from).with_context(|| format!("Failed to read {}", from.display()))? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn write_files(files: &IndexMap<String, String>, to: &Path) -> anyhow::Result<usize> {
    for (name, content) in files {
        let target = to.join(name.trim_start_matches('/'));
        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(files.len())
}

#[async_trait]
impl BlockGenerator for FsGenerator {
    async fn run(&self, req: &GeneratorRequest, logger: &Logger) -> anyhow::Result<GeneratorOutput> {
        let block_folder_name = upper_camel_case(&req.block_name);
        let page_dir = req.pages_path.join(req.path.trim_start_matches('/'));
        let target = if req.is_page_block {
            page_dir.clone()
        } else {
            page_dir.join(&block_folder_name)
        };
        let entry_path = if req.is_page_block {
            find_js(&target, "index").unwrap_or_else(|| target.join("index.tsx"))
        } else {
            find_js(&page_dir, "index").unwrap_or_else(|| page_dir.join("index.tsx"))
        };
        tracing::debug!(
            target = %target.display(),
            page_block = req.is_page_block,
            "Generating block"
        );

        if req.is_page_block && target.exists() && !req.dry_run {
            bail!("{} already exists", target.display());
        }
        if !req.dry_run {
            let copied = match (&req.files, &req.source_path) {
                (Some(files), _) => write_files(files, &target)?,
                (None, Some(source)) => {
                    let src = source.join("src");
                    let from = if src.is_dir() { src } else { source.clone() };
                    copy_dir(&from, &target)?
                }
                (None, None) => bail!("block has neither a source path nor files"),
            };
            logger.append_log(&format!("📄  Wrote {copied} files to {}", target.display()));
        }

        Ok(GeneratorOutput {
            path: req.path.clone(),
            route_path: req.route_path.clone(),
            block_folder_name,
            entry_path,
            is_page_block: req.is_page_block,
            need_create_new_route: req.is_page_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;

    fn request(dir: &Path, page: bool) -> GeneratorRequest {
        GeneratorRequest {
            path: "/dashboard".into(),
            route_path: "/dashboard".into(),
            block_name: "demo-card".into(),
            is_page_block: page,
            cwd: dir.to_path_buf(),
            pages_path: dir.join("src").join("pages"),
            ..Default::default()
        }
    }

    fn logger() -> Logger {
        Logger::new("test", EventSink::detached())
    }

    #[tokio::test]
    async fn test_page_block_copies_src() {
        let dir = tempfile::tempdir().unwrap();
        let block = dir.path().join("block");
        std::fs::create_dir_all(block.join("src").join("components")).unwrap();
        std::fs::write(block.join("src").join("index.tsx"), "export default () => null;").unwrap();
        std::fs::write(block.join("src").join("components").join("A.tsx"), "").unwrap();

        let mut req = request(dir.path(), true);
        req.source_path = Some(block);
        let out = FsGenerator.run(&req, &logger()).await.unwrap();

        let pages = dir.path().join("src").join("pages").join("dashboard");
        assert!(pages.join("components").join("A.tsx").exists());
        assert_eq!(out.entry_path, pages.join("index.tsx"));
        assert!(out.need_create_new_route);
        assert_eq!(out.block_folder_name, "DemoCard");

        // A second page block on the same path is refused
        assert!(FsGenerator.run(&req, &logger()).await.is_err());
    }

    #[tokio::test]
    async fn test_component_block_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("src").join("pages").join("dashboard");
        std::fs::create_dir_all(&pages).unwrap();
        std::fs::write(pages.join("index.js"), "").unwrap();

        let mut req = request(dir.path(), false);
        req.files = Some(IndexMap::from([("index.tsx".to_string(), "x".to_string())]));
        let out = FsGenerator.run(&req, &logger()).await.unwrap();

        assert!(pages.join("DemoCard").join("index.tsx").exists());
        assert_eq!(out.entry_path, pages.join("index.js"));
        assert!(!out.need_create_new_route);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), true);
        req.dry_run = true;
        req.source_path = Some(dir.path().join("missing"));
        let out = FsGenerator.run(&req, &logger()).await.unwrap();
        assert_eq!(out.path, "/dashboard");
        assert!(!dir.path().join("src").exists());
    }
}
