//! Route-config rewriting.
//!
//! Finds the routes array of a project's route config (following a default
//! import when the config only references it) and inserts a new route node
//! at the position its path calls for. Only the inserted text is generated;
//! the rest of the file is kept byte for byte.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::git::normalize;
use crate::syntax::printer::{self, INDENT};
use crate::syntax::{ArrayLit, Edit, Literal, Module, SyntaxError, TokRange, TokenKind, apply_edits};

/// Import indirections followed before giving up.
const MAX_IMPORT_DEPTH: usize = 16;

/// Tokens after which `{` opens an object literal rather than a block.
const OBJECT_CONTEXT: &[&str] = &[
    "=", "(", ",", ":", "[", "?", "return", "default", "||", "&&", "??",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<RouteNode>>,
}

/// Where a config file keeps its routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteSource {
    /// `exports.routes = [...]`
    ExportsAssignment(ArrayLit),
    /// `export default [...]`
    DefaultExportArray(ArrayLit),
    /// `{ routes: [...] }` anywhere outside a route array.
    NestedObjectProperty(ArrayLit),
    /// `routes` refers to a binding, normally a default import.
    ImportedIdentifier(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route array config not found.")]
    RouteArrayNotFound,
    #[error("can not find import of {0}")]
    RouteConfigNotFound(String),
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", .path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RouteOptions<'a> {
    /// Target of the `@/` import alias.
    pub src_root: &'a Path,
    /// Also descend into `childRoutes`.
    pub child_routes_compat: bool,
}

/// Result of an insertion: the new text of the file that holds the array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    pub code: String,
    pub routes_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Source lookup
// ---------------------------------------------------------------------------

fn level_limit(m: &Module, k: usize) -> usize {
    m.parent(k).and_then(|p| m.jump(p)).unwrap_or(m.len())
}

fn array_or_ident(lit: Literal) -> Option<Result<ArrayLit, String>> {
    match lit {
        Literal::Array(arr) => Some(Ok(arr)),
        Literal::Ident { name, .. } => Some(Err(name)),
        _ => None,
    }
}

fn exports_assignment(m: &Module) -> Option<Result<ArrayLit, String>> {
    (0..m.len()).find_map(|k| {
        let is_exports = m.kind(k) == Some(TokenKind::Ident)
            && m.text(k) == "exports"
            && (k == 0 || !m.is(k - 1, "."))
            && m.is(k + 1, ".")
            && m.is(k + 2, "routes")
            && m.is(k + 3, "=");
        if !is_exports {
            return None;
        }
        let end = m.expr_end(k + 4, level_limit(m, k), false);
        array_or_ident(m.literal(TokRange::new(k + 4, end)))
    })
}

fn default_export_array(m: &Module) -> Option<ArrayLit> {
    match m.literal(m.export_default()?.value) {
        Literal::Array(arr) => Some(arr),
        _ => None,
    }
}

/// `{` at `open` starts an object literal that is not itself a route entry.
fn is_config_object(m: &Module, open: usize) -> bool {
    if !m.is(open, "{") || open == 0 {
        return false;
    }
    let prev = open - 1;
    let expression = matches!(m.kind(prev), Some(TokenKind::Ident | TokenKind::Punct))
        && OBJECT_CONTEXT.contains(&m.text(prev));
    let array_element =
        m.parent(open).is_some_and(|p| m.is(p, "[")) && (m.is(prev, "[") || m.is(prev, ","));
    expression && !array_element
}

/// `routes: <value>`, or the shorthand `{ routes }` which refers to the
/// `routes` binding.
fn routes_property(m: &Module) -> Option<Result<ArrayLit, String>> {
    (0..m.len()).find_map(|k| {
        let is_key = m.kind(k) == Some(TokenKind::Ident)
            && m.text(k) == "routes"
            && k > 0
            && (m.is(k - 1, "{") || m.is(k - 1, ","));
        let shorthand = m.is(k + 1, ",") || m.is(k + 1, "}");
        if !is_key || !(shorthand || m.is(k + 1, ":")) {
            return None;
        }
        let open = m.parent(k)?;
        if !is_config_object(m, open) {
            return None;
        }
        if shorthand {
            return Some(Err("routes".to_string()));
        }
        let end = m.expr_end(k + 2, m.jump(open)?, true);
        array_or_ident(m.literal(TokRange::new(k + 2, end)))
    })
}

/// Locate the routes of a config file, in priority order: an
/// `exports.routes` assignment, a default-exported array, then the first
/// `routes` property of a non-route object.
pub fn find_route_source(m: &Module) -> Option<RouteSource> {
    if let Some(found) = exports_assignment(m) {
        return Some(match found {
            Ok(arr) => RouteSource::ExportsAssignment(arr),
            Err(name) => RouteSource::ImportedIdentifier(name),
        });
    }
    if let Some(arr) = default_export_array(m) {
        return Some(RouteSource::DefaultExportArray(arr));
    }
    routes_property(m).map(|found| match found {
        Ok(arr) => RouteSource::NestedObjectProperty(arr),
        Err(name) => RouteSource::ImportedIdentifier(name),
    })
}

/// File behind an import of a routes module. `@/` is rooted at `src_root`;
/// other sources are relative to the importing file. Extensionless sources
/// become `.js` when that file exists, `.ts` otherwise.
pub fn module_path(config_path: &Path, source: &str, src_root: &Path) -> PathBuf {
    let joined = match source.strip_prefix("@/") {
        Some(rest) => src_root.join(rest),
        None => config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(source),
    };
    let path = normalize(&joined);
    let name = path.to_string_lossy();
    if name.ends_with(".js") || name.ends_with(".ts") {
        return path;
    }
    let js = PathBuf::from(format!("{name}.js"));
    if js.exists() {
        js
    } else {
        PathBuf::from(format!("{name}.ts"))
    }
}

// ---------------------------------------------------------------------------
// Insertion
// ---------------------------------------------------------------------------

/// Join a relative route path onto its parent's, resolving `.` and `..`.
pub fn join_route_path(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Path an existing entry matches against. Entries with a `redirect`, and
/// anything that is not an object, never match.
fn effective_path(element: &Literal, current: &str) -> Option<String> {
    let Literal::Object(obj) = element else {
        return None;
    };
    if obj.get("redirect").is_some() {
        return None;
    }
    match obj.get("path") {
        None => Some(current.to_string()),
        Some(Literal::Str { value, .. }) if value.starts_with('/') => Some(value.clone()),
        Some(Literal::Str { value, .. }) => Some(join_route_path(current, value)),
        Some(_) => None,
    }
}

/// Indentation for entries of `arr`.
fn entry_indent(src: &str, arr: &ArrayLit) -> String {
    match arr.elements.first() {
        Some(first) if printer::starts_line(src, first.span().0) => {
            printer::line_indent(src, first.span().0).to_string()
        }
        _ => format!("{}{INDENT}", printer::line_indent(src, arr.start)),
    }
}

fn is_multiline(src: &str, arr: &ArrayLit) -> bool {
    let first = arr.elements.first().map_or(arr.end, |e| e.span().0);
    src[arr.start..first].contains('\n')
}

fn print_route(route: &serde_json::Value, indent: &str, column: usize) -> String {
    printer::print_value(route, indent, column)
}

/// End of the line holding `pos` when the rest of it is a `//` comment.
fn line_comment_end(src: &str, pos: usize) -> Option<usize> {
    let line = src[pos..].split('\n').next().unwrap_or_default();
    let line = line.trim_end_matches('\r');
    line.trim_start().starts_with("//").then(|| pos + line.len())
}

fn append_edit(src: &str, arr: &ArrayLit, route: &serde_json::Value) -> Edit {
    let indent = entry_indent(src, arr);
    let Some(last) = arr.elements.last() else {
        let base = printer::line_indent(src, arr.start);
        if src[arr.start..arr.end].contains('\n') {
            let node = print_route(route, &indent, indent.len());
            return Edit::replace(arr.start + 1, arr.end - 1, format!("\n{indent}{node},\n{base}"));
        }
        let column = arr.start + 1 - printer::line_start(src, arr.start);
        return Edit::replace(arr.start + 1, arr.end - 1, print_route(route, base, column));
    };
    let last_end = last.span().1;
    if is_multiline(src, arr) {
        let node = print_route(route, &indent, indent.len());
        if arr.trailing_comma
            && let Some(comma) = src[last_end..arr.end].find(',')
        {
            let after = last_end + comma + 1;
            let at = line_comment_end(src, after).unwrap_or(after);
            return Edit::insert(at, format!("\n{indent}{node},"));
        }
        if let Some(eol) = line_comment_end(src, last_end) {
            let comment = &src[last_end..eol];
            return Edit::replace(last_end, eol, format!(",{comment}\n{indent}{node}"));
        }
        return Edit::insert(last_end, format!(",\n{indent}{node}"));
    }
    let column = last_end + 2 - printer::line_start(src, last_end);
    let base = printer::line_indent(src, arr.start);
    Edit::insert(last_end, format!(", {}", print_route(route, base, column)))
}

fn insert_before_edit(src: &str, arr: &ArrayLit, index: usize, route: &serde_json::Value) -> Edit {
    let start = arr.elements[index].span().0;
    if printer::starts_line(src, start) {
        let indent = printer::line_indent(src, start);
        let node = print_route(route, indent, indent.len());
        return Edit::insert(start, format!("{node},\n{indent}"));
    }
    let column = start - printer::line_start(src, start);
    let base = printer::line_indent(src, arr.start);
    Edit::insert(start, format!("{}, ", print_route(route, base, column)))
}

/// Edit placing `new_route` into `arr` (or one of its nested route arrays).
///
/// The first entry whose effective path prefixes the new path wins. With no
/// match the route is appended; a match without nested routes gets the new
/// route inserted right before it; otherwise the nested array is searched
/// with the match's path as context.
pub fn route_edit(
    src: &str,
    arr: &ArrayLit,
    new_route: &RouteNode,
    route: &serde_json::Value,
    current: &str,
    child_routes_compat: bool,
) -> Edit {
    let paths: Vec<Option<String>> = arr
        .elements
        .iter()
        .map(|el| effective_path(el, current))
        .collect();
    tracing::debug!(new_path = %new_route.path, current = %current, ?paths, "Matching route entries");
    let matched = paths
        .iter()
        .position(|p| p.as_deref().is_some_and(|p| new_route.path.starts_with(p)));
    let Some(index) = matched else {
        return append_edit(src, arr, route);
    };
    let children = match &arr.elements[index] {
        Literal::Object(obj) => obj
            .get("routes")
            .or_else(|| child_routes_compat.then(|| obj.get("childRoutes")).flatten()),
        _ => None,
    };
    match (children, &paths[index]) {
        (Some(Literal::Array(nested)), Some(path)) => {
            route_edit(src, nested, new_route, route, path, child_routes_compat)
        }
        _ => insert_before_edit(src, arr, index, route),
    }
}

/// Insert `new_route` into the routes of the config at `config_path`,
/// whose text is `source_text`. Imported route modules are read from disk.
pub fn insert_route(
    source_text: &str,
    new_route: &RouteNode,
    config_path: &Path,
    opts: RouteOptions<'_>,
) -> Result<RouteUpdate, RouteError> {
    let route = serde_json::to_value(new_route).unwrap_or_default();
    let mut path = config_path.to_path_buf();
    let mut text = source_text.to_string();
    for _ in 0..MAX_IMPORT_DEPTH {
        tracing::debug!(path = %path.display(), "Looking for routes");
        let module = Module::parse(&text).map_err(|source| RouteError::Syntax {
            path: path.clone(),
            source,
        })?;
        let found = find_route_source(&module).ok_or(RouteError::RouteArrayNotFound)?;
        let arr = match found {
            RouteSource::ExportsAssignment(arr)
            | RouteSource::DefaultExportArray(arr)
            | RouteSource::NestedObjectProperty(arr) => arr,
            RouteSource::ImportedIdentifier(name) => {
                let import = module
                    .imports()
                    .into_iter()
                    .find(|i| i.default.as_deref() == Some(name.as_str()))
                    .ok_or(RouteError::RouteConfigNotFound(name))?;
                path = module_path(&path, &import.source, opts.src_root);
                text = std::fs::read_to_string(&path).map_err(|source| RouteError::Read {
                    path: path.clone(),
                    source,
                })?;
                continue;
            }
        };
        let edit = route_edit(&text, &arr, new_route, &route, "/", opts.child_routes_compat);
        return Ok(RouteUpdate {
            code: apply_edits(&text, vec![edit]),
            routes_path: path,
        });
    }
    Err(RouteError::RouteArrayNotFound)
}

/// [`insert_route`] on the config file at `config_path`.
pub fn get_new_route_code(
    config_path: &Path,
    new_route: &RouteNode,
    opts: RouteOptions<'_>,
) -> Result<RouteUpdate, RouteError> {
    let text = std::fs::read_to_string(config_path).map_err(|source| RouteError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    insert_route(&text, new_route, config_path, opts)
}

/// Insert `new_route` and write the file that holds the routes array.
pub fn write_new_route(
    config_path: &Path,
    new_route: &RouteNode,
    opts: RouteOptions<'_>,
) -> Result<PathBuf, RouteError> {
    let update = get_new_route_code(config_path, new_route, opts)?;
    std::fs::write(&update.routes_path, &update.code).map_err(|source| RouteError::Write {
        path: update.routes_path.clone(),
        source,
    })?;
    Ok(update.routes_path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
