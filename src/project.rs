//! The host project a block is added to: its paths, route config file,
//! enabled features and the pre-flight checks run before a flow starts.

use std::path::{Path, PathBuf};

use crate::config::BlockConfig;
use crate::generator::{BlockType, find_js};
use crate::routes;
use crate::syntax::{Module, SyntaxError};

/// Config files that may hold the route array, in lookup order.
const ROUTE_CONFIG_FILES: &[&str] = &[
    ".umirc.ts",
    ".umirc.js",
    "config/config.ts",
    "config/config.js",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanAddError {
    #[error(
        "The block adding does not support the conventional route, please convert to a configuration route."
    )]
    ConventionalRoutes,
    #[error("package.json is required to add {0}")]
    MissingPackageJson(&'static str),
    #[error("Block depends on dva, please install @umijs/preset-react and enable dva.")]
    DvaDisabled,
    #[error("Block depends on i18n, please install @umijs/preset-react and enable locale.")]
    LocaleDisabled,
}

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error(" {} Directory does not exist!", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("No {} found under the directory index.(ts|tsx|js|jsx) !", .0.display())]
    EntryNotFound(PathBuf),
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", .path.display())]
    Syntax { path: PathBuf, source: SyntaxError },
}

/// Leading `/` for a page or route path.
pub fn add_prefix(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub cwd: PathBuf,
    pub abs_src_path: PathBuf,
    pub abs_pages_path: PathBuf,
    /// File that declares (or imports) the route array.
    pub route_config_path: Option<PathBuf>,
    /// The project routes through a configured array, not the file system.
    pub has_routes: bool,
    pub dva: bool,
    pub locale: bool,
    pub block: BlockConfig,
}

impl Project {
    /// A project rooted at `cwd` with the conventional `src/pages` layout.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into();
        let abs_src_path = cwd.join("src");
        Self {
            abs_pages_path: abs_src_path.join("pages"),
            abs_src_path,
            cwd,
            route_config_path: None,
            has_routes: false,
            dva: false,
            locale: false,
            block: BlockConfig::default(),
        }
    }

    /// Like [`Project::new`], then look for a config file with a routes array.
    pub fn detect(cwd: impl Into<PathBuf>) -> Self {
        let mut project = Self::new(cwd);
        let config = ROUTE_CONFIG_FILES
            .iter()
            .map(|f| project.cwd.join(f))
            .find(|p| p.is_file());
        if let Some(path) = config {
            project.has_routes = match std::fs::read_to_string(&path) {
                Ok(text) => Module::parse(&text)
                    .map(|m| routes::find_route_source(&m).is_some())
                    .unwrap_or_else(|e| {
                        tracing::warn!(path = %path.display(), "Could not parse route config: {e}");
                        false
                    }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Could not read route config: {e}");
                    false
                }
            };
            tracing::debug!(path = %path.display(), has_routes = project.has_routes, "Found project config");
            project.route_config_path = Some(path);
        }
        project
    }

    pub fn with_route_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_config_path = Some(path.into());
        self.has_routes = true;
        self
    }

    pub fn with_src_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.abs_src_path = path.into();
        self.abs_pages_path = self.abs_src_path.join("pages");
        self
    }

    pub fn with_features(mut self, dva: bool, locale: bool) -> Self {
        self.dva = dva;
        self.locale = locale;
        self
    }

    pub fn with_block_config(mut self, block: BlockConfig) -> Self {
        self.block = block;
        self
    }

    pub fn package_json_path(&self) -> PathBuf {
        self.cwd.join("package.json")
    }

    /// Explicit request, then the project's `block.npmClient`, then yarn
    /// when a `yarn.lock` is present, else npm.
    pub fn npm_client(&self, requested: Option<&str>) -> String {
        if let Some(client) = requested.filter(|c| !c.is_empty()) {
            return client.to_string();
        }
        if let Some(client) = self.block.npm_client.as_deref().filter(|c| !c.is_empty()) {
            return client.to_string();
        }
        if self.cwd.join("yarn.lock").exists() {
            "yarn".to_string()
        } else {
            "npm".to_string()
        }
    }

    /// Whether `pages/<path>` is already taken.
    pub fn block_path_exists(&self, path: &str) -> bool {
        self.abs_pages_path.join(path.trim_start_matches('/')).exists()
    }

    pub fn check_if_can_add(
        &self,
        features: &[String],
        block_type: BlockType,
    ) -> Result<(), CanAddError> {
        if !self.has_routes {
            return Err(CanAddError::ConventionalRoutes);
        }
        if !self.package_json_path().exists() {
            let kind = match block_type {
                BlockType::Block => "Block",
                BlockType::Template => "template",
            };
            return Err(CanAddError::MissingPackageJson(kind));
        }
        let wants = |f: &str| features.iter().any(|x| x == f);
        if wants("dva") && !self.dva {
            return Err(CanAddError::DvaDisabled);
        }
        if wants("i18n") && !self.locale {
            return Err(CanAddError::LocaleDisabled);
        }
        Ok(())
    }

    /// Whether the page at `target_path` already declares `name` at its
    /// top level. `Bar` resolves to `Bar/index.*` or `Bar.*`.
    pub fn check_binding_in_file(&self, target_path: &str, name: &str) -> Result<bool, BindingError> {
        let rel = Path::new(target_path)
            .strip_prefix(&self.abs_pages_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(target_path.trim_start_matches('/')));
        let abs = self.abs_pages_path.join(rel);
        let as_file = abs
            .file_name()
            .and_then(|n| n.to_str())
            .zip(abs.parent())
            .and_then(|(n, dir)| find_js(dir, n));
        if !abs.exists() && as_file.is_none() {
            return Err(BindingError::DirectoryNotFound(abs));
        }
        let entry = find_js(&abs, "index")
            .or(as_file)
            .ok_or_else(|| BindingError::EntryNotFound(abs.clone()))?;
        tracing::debug!(entry = %entry.display(), name, "Checking binding");
        let text = std::fs::read_to_string(&entry).map_err(|source| BindingError::Read {
            path: entry.clone(),
            source,
        })?;
        let module = Module::parse(&text).map_err(|source| BindingError::Syntax {
            path: entry.clone(),
            source,
        })?;
        Ok(module.has_binding(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_prefix() {
        assert_eq!(add_prefix("Demo"), "/Demo");
        assert_eq!(add_prefix("/Demo"), "/Demo");
    }

    #[test]
    fn test_detect_route_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".umirc.ts"),
            "export default { routes: [{ path: '/', component: './index' }] };\n",
        )
        .unwrap();
        let project = Project::detect(dir.path());
        assert!(project.has_routes);
        assert_eq!(project.route_config_path, Some(dir.path().join(".umirc.ts")));
        assert_eq!(project.abs_pages_path, dir.path().join("src").join("pages"));
    }

    #[test]
    fn test_detect_shorthand_routes_property() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".umirc.ts"),
            "import routes from './routes';\nexport default defineConfig({ hash: true, routes });\n",
        )
        .unwrap();
        let project = Project::detect(dir.path());
        assert!(project.has_routes);
    }

    #[test]
    fn test_detect_conventional_routes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".umirc.ts"), "export default { hash: true };\n").unwrap();
        let project = Project::detect(dir.path());
        assert!(!project.has_routes);
        assert_eq!(
            project.check_if_can_add(&[], BlockType::Block),
            Err(CanAddError::ConventionalRoutes)
        );
    }

    #[test]
    fn test_check_if_can_add() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path()).with_route_config(dir.path().join(".umirc.ts"));
        assert_eq!(
            project.check_if_can_add(&[], BlockType::Template),
            Err(CanAddError::MissingPackageJson("template"))
        );

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(project.check_if_can_add(&features(&["antd"]), BlockType::Block), Ok(()));
        assert_eq!(
            project.check_if_can_add(&features(&["dva"]), BlockType::Block),
            Err(CanAddError::DvaDisabled)
        );
        assert_eq!(
            project.check_if_can_add(&features(&["i18n"]), BlockType::Block),
            Err(CanAddError::LocaleDisabled)
        );
        let project = project.with_features(true, true);
        assert_eq!(
            project.check_if_can_add(&features(&["dva", "i18n"]), BlockType::Block),
            Ok(())
        );
    }

    #[test]
    fn test_npm_client_selection() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        assert_eq!(project.npm_client(None), "npm");
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(project.npm_client(None), "yarn");
        let project = project.with_block_config(BlockConfig {
            npm_client: Some("tnpm".into()),
            ..Default::default()
        });
        assert_eq!(project.npm_client(None), "tnpm");
        assert_eq!(project.npm_client(Some("cnpm")), "cnpm");
    }

    #[test]
    fn test_block_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        std::fs::create_dir_all(project.abs_pages_path.join("Demo")).unwrap();
        assert!(project.block_path_exists("/Demo"));
        assert!(!project.block_path_exists("/Other"));
    }

    #[test]
    fn test_check_binding_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path());
        let page = project.abs_pages_path.join("Home");
        std::fs::create_dir_all(&page).unwrap();
        std::fs::write(
            page.join("index.tsx"),
            "import Card from './Card';\nconst Title = () => null;\nexport default () => <Card />;\n",
        )
        .unwrap();
        std::fs::write(project.abs_pages_path.join("About.js"), "function About() {}\n").unwrap();

        assert!(project.check_binding_in_file("/Home", "Card").unwrap());
        assert!(project.check_binding_in_file("/Home", "Title").unwrap());
        assert!(!project.check_binding_in_file("/Home", "Missing").unwrap());
        assert!(project.check_binding_in_file("/About", "About").unwrap());

        let abs = page.to_string_lossy().to_string();
        assert!(project.check_binding_in_file(&abs, "Card").unwrap());

        assert!(matches!(
            project.check_binding_in_file("/Nope", "Card"),
            Err(BindingError::DirectoryNotFound(_))
        ));
        std::fs::create_dir_all(project.abs_pages_path.join("Empty")).unwrap();
        assert!(matches!(
            project.check_binding_in_file("/Empty", "Card"),
            Err(BindingError::EntryNotFound(_))
        ));
    }
}
