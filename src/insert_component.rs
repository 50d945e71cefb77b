//! Inserting a block's component into an existing page.
//!
//! Two ways to pick the insertion point:
//! - layout placeholders: the n-th `<UmiUIFlag />` element or
//!   `INSERT_BLOCK_PLACEHOLDER` text in the file, counted in document order;
//! - the JSX (or `createElement` call) returned by the default-exported
//!   component, after unwrapping HOC calls and local bindings.
//!
//! In extract mode the block is not imported but inlined: its returned JSX
//! and imports are copied into the page and its source file is removed.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::syntax::printer::{self, INDENT};
use crate::syntax::{
    Binding, Edit, Expr, Import, JsxChild, JsxElement, JsxNode, Module, SyntaxError, TokRange,
    TokenKind, apply_edits,
};

pub const BLOCK_LAYOUT_PREFIX: &str = "$BLOCK_LAYOUT_";
pub const INSERT_BLOCK_PLACEHOLDER: &str = "INSERT_BLOCK_PLACEHOLDER";
pub const UMI_UI_FLAG_PLACEHOLDER: &str = "UmiUIFlag";

/// HOC wrappers and identifier hops followed before giving up.
const MAX_UNWRAP: usize = 8;

const STYLES: &str = "styles";

lazy_static! {
    static ref STYLES_WORD: Regex = Regex::new(r"\bstyles\b").unwrap();
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("Can not find return node")]
    ReturnNodeNotFound,
    #[error("add block to jsx failed, not valid jsx element")]
    InvalidJsx,
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("Failed to parse {}: {source}", .path.display())]
    BlockSyntax {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },
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
    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Where to insert: a child position in the returned JSX, or the n-th
/// layout placeholder. Serialized as a number or `"$BLOCK_LAYOUT_<n>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIndex", into = "RawIndex")]
pub enum InsertIndex {
    Position(usize),
    Layout(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawIndex {
    Number(usize),
    Text(String),
}

impl Default for InsertIndex {
    fn default() -> Self {
        Self::Position(0)
    }
}

impl InsertIndex {
    pub fn parse(s: &str) -> Option<Self> {
        match s.strip_prefix(BLOCK_LAYOUT_PREFIX) {
            Some(n) => n.parse().ok().map(Self::Layout),
            None => s.parse().ok().map(Self::Position),
        }
    }
}

impl TryFrom<RawIndex> for InsertIndex {
    type Error = String;

    fn try_from(raw: RawIndex) -> Result<Self, Self::Error> {
        match raw {
            RawIndex::Number(n) => Ok(Self::Position(n)),
            RawIndex::Text(s) => Self::parse(&s).ok_or_else(|| format!("invalid insert index {s:?}")),
        }
    }
}

impl From<InsertIndex> for RawIndex {
    fn from(index: InsertIndex) -> Self {
        match index {
            InsertIndex::Position(n) => Self::Number(n),
            InsertIndex::Layout(n) => Self::Text(format!("{BLOCK_LAYOUT_PREFIX}{n}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Import source of the block component.
    pub relative_path: String,
    /// Block name; its upper camel case form becomes the component name.
    pub identifier: String,
    pub index: InsertIndex,
    /// Append after the last child instead of using `index`.
    pub latest: bool,
    pub extract: Option<ExtractBlock>,
}

/// Inline the block at `absolute_path` instead of importing it.
#[derive(Debug, Clone)]
pub struct ExtractBlock {
    pub absolute_path: PathBuf,
    /// Leave the block's file in place afterwards.
    pub keep_source: bool,
}

/// `demo-block` → `DemoBlock`.
pub fn upper_camel_case(s: &str) -> String {
    WORD.find_iter(s)
        .map(|word| {
            let mut chars = word.as_str().chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Insert the block component described by `opts` into `content`.
pub fn insert_component(content: &str, opts: &InsertOptions) -> Result<String, InsertError> {
    let module = Module::parse(content)?;
    let id = upper_camel_case(&opts.identifier);
    if let InsertIndex::Layout(target) = opts.index {
        return insert_at_placeholder(&module, &id, &opts.relative_path, target);
    }

    let returned = find_return(&module).ok_or(InsertError::ReturnNodeNotFound)?;
    let mut edits = Vec::new();
    let node = match &opts.extract {
        Some(extract) => {
            let styles = valid_styles_name(&module);
            let path = &extract.absolute_path;
            let block = std::fs::read_to_string(path).map_err(|source| InsertError::Read {
                path: path.clone(),
                source,
            })?;
            let extracted = extract_block(&block, path, &styles)?;
            edits.extend(merge_imports(&module, extracted.imports));
            extracted.node
        }
        None => {
            edits.push(add_import(&module, &id, &opts.relative_path));
            NewNode::tag(&id)
        }
    };
    edits.push(add_to_returned(&module, returned, &node, opts)?);
    let out = apply_edits(content, edits);

    if let Some(extract) = &opts.extract
        && !extract.keep_source
    {
        remove_block(&extract.absolute_path)?;
    }
    Ok(out)
}

/// Add a component block to the page at `entry_path` as `./<folder>`.
/// Returns the new source; the file is only written outside dry run.
pub fn append_block_to_container(
    entry_path: &Path,
    block_folder_name: &str,
    dry_run: bool,
    index: InsertIndex,
) -> Result<String, InsertError> {
    tracing::debug!(entry = %entry_path.display(), block = %block_folder_name, "Appending block to container");
    let old = std::fs::read_to_string(entry_path).map_err(|source| InsertError::Read {
        path: entry_path.to_path_buf(),
        source,
    })?;
    let new = insert_component(
        &old,
        &InsertOptions {
            relative_path: format!("./{block_folder_name}"),
            identifier: block_folder_name.to_string(),
            index,
            ..Default::default()
        },
    )?;
    if !dry_run {
        std::fs::write(entry_path, &new).map_err(|source| InsertError::Write {
            path: entry_path.to_path_buf(),
            source,
        })?;
    }
    Ok(new)
}

// ---------------------------------------------------------------------------
// Locating the returned JSX
// ---------------------------------------------------------------------------

/// The function or class behind an exported expression.
fn resolve_component(m: &Module, r: TokRange) -> Option<Expr> {
    let mut expr = m.classify(r);
    for _ in 0..MAX_UNWRAP {
        expr = match expr {
            // connect(...)(Page), withRouter(Page), memo(() => ...)
            Expr::Call { args, .. } => m.classify(*args.first()?),
            Expr::Ident(name) => match m.binding(&name)? {
                Binding::Function(decl) | Binding::Class(decl) => m.classify(decl),
                Binding::Var(Some(init)) => m.classify(init),
                Binding::Var(None) | Binding::Import => return None,
            },
            other => return Some(other),
        };
    }
    None
}

fn find_return(m: &Module) -> Option<TokRange> {
    let exported = m.export_default()?;
    let component = resolve_component(m, exported.value)?;
    m.rendered_value(&component)
}

// ---------------------------------------------------------------------------
// Inserting children
// ---------------------------------------------------------------------------

/// Source text for the node being inserted.
struct NewNode {
    text: String,
    /// Indentation `text`'s continuation lines are relative to.
    indent: String,
    /// Component name, for `createElement` returns.
    component: Option<String>,
}

impl NewNode {
    fn tag(id: &str) -> Self {
        Self {
            text: printer::jsx_tag(id),
            indent: String::new(),
            component: Some(id.to_string()),
        }
    }

    fn at(&self, indent: &str) -> String {
        printer::reindent(&self.text, &self.indent, indent)
    }

    fn as_arg(&self, callee: &str) -> String {
        match &self.component {
            Some(id) => format!("{callee}({id})"),
            None => self.text.clone(),
        }
    }
}

/// Span of a child without surrounding whitespace.
fn content_span(src: &str, child: &JsxChild) -> (usize, usize) {
    match child {
        JsxChild::Text { start, end } => {
            let text = &src[*start..*end];
            let lead = text.len() - text.trim_start().len();
            let trail = text.len() - text.trim_end().len();
            (start + lead, (end - trail).max(start + lead))
        }
        other => other.span(),
    }
}

fn insert_after(src: &str, child: &JsxChild, node: &NewNode) -> Edit {
    let (start, end) = content_span(src, child);
    let indent = printer::line_indent(src, start);
    if printer::starts_line(src, start) {
        Edit::insert(end, format!("\n{indent}{}", node.at(indent)))
    } else {
        Edit::insert(end, node.at(indent))
    }
}

fn insert_before(src: &str, child: &JsxChild, node: &NewNode) -> Edit {
    let (start, _) = content_span(src, child);
    let indent = printer::line_indent(src, start);
    if printer::starts_line(src, start) {
        Edit::insert(start, format!("{}\n{indent}", node.at(indent)))
    } else {
        Edit::insert(start, node.at(indent))
    }
}

/// Children are whitespace only.
fn insert_first(src: &str, el: &JsxElement, node: &NewNode) -> Edit {
    let indent = format!("{}{INDENT}", printer::line_indent(src, el.start));
    Edit::insert(el.open_end, format!("\n{indent}{}", node.at(&indent)))
}

/// A childless element becomes a fragment holding it and the new node.
fn wrap_in_fragment(src: &str, el: &JsxElement, node: &NewNode, new_first: bool) -> Edit {
    let base = printer::line_indent(src, el.start);
    let own_line = printer::starts_line(src, el.start);
    let frag = if own_line {
        base.to_string()
    } else {
        format!("{base}{INDENT}")
    };
    let inner = format!("{frag}{INDENT}");
    let original = printer::reindent(&src[el.start..el.end], base, &inner);
    let new = node.at(&inner);
    let (first, second) = if new_first {
        (new, original)
    } else {
        (original, new)
    };
    let body = format!("<>\n{inner}{first}\n{inner}{second}\n{frag}</>");
    if own_line {
        Edit::replace(el.start, el.end, body)
    } else {
        Edit::replace(el.start, el.end, format!("(\n{frag}{body}\n{base})"))
    }
}

fn add_jsx_child(src: &str, el: &JsxElement, node: &NewNode, opts: &InsertOptions) -> Edit {
    let index = match opts.index {
        InsertIndex::Position(n) => n,
        InsertIndex::Layout(_) => 0,
    };
    if el.children.is_empty() {
        return wrap_in_fragment(src, el, node, index == 0);
    }
    let content: Vec<&JsxChild> = el.children.iter().filter(|c| !c.is_blank(src)).collect();
    let (Some(first), Some(last)) = (content.first(), content.last()) else {
        return insert_first(src, el, node);
    };
    if opts.latest {
        return insert_after(src, last, node);
    }
    if index == 0 {
        return insert_before(src, first, node);
    }
    let elements: Vec<&JsxChild> = el.children.iter().filter(|c| c.is_element()).collect();
    match elements.get(index - 1) {
        Some(anchor) => insert_after(src, anchor, node),
        None => insert_after(src, last, node),
    }
}

fn add_create_element_child(
    m: &Module,
    callee: TokRange,
    args: &[TokRange],
    node: &NewNode,
    opts: &InsertOptions,
) -> Result<Edit, InsertError> {
    let arg = node.as_arg(m.slice(callee));
    let after = |r: &TokRange| Edit::insert(m.span(*r).1, format!(", {arg}"));
    let children = args.get(2..).unwrap_or_default();
    let Some(last) = children.last() else {
        let last = args.last().ok_or(InsertError::InvalidJsx)?;
        let text = if args.len() == 1 {
            format!(", null, {arg}")
        } else {
            format!(", {arg}")
        };
        return Ok(Edit::insert(m.span(*last).1, text));
    };
    if opts.latest {
        return Ok(after(last));
    }
    Ok(match opts.index {
        InsertIndex::Position(0) | InsertIndex::Layout(_) => {
            Edit::insert(m.span(children[0]).0, format!("{arg}, "))
        }
        InsertIndex::Position(n) => after(children.get(n - 1).unwrap_or(last)),
    })
}

fn add_to_returned(
    m: &Module,
    returned: TokRange,
    node: &NewNode,
    opts: &InsertOptions,
) -> Result<Edit, InsertError> {
    match m.classify(returned) {
        Expr::Jsx { root } => {
            let el = m.jsx_element(root).ok_or(InsertError::InvalidJsx)?;
            Ok(add_jsx_child(m.src(), &el, node, opts))
        }
        Expr::Call { callee, args } if m.slice(callee).ends_with("createElement") => {
            add_create_element_child(m, callee, &args, node, opts)
        }
        _ => Err(InsertError::InvalidJsx),
    }
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

fn add_import(m: &Module, id: &str, source: &str) -> Edit {
    let line = printer::print_import(Some(id), None, &[], source);
    match m.imports().last() {
        Some(last) => Edit::insert(last.end, format!("\n{line}")),
        None => Edit::insert(0, format!("{line}\n")),
    }
}

fn print_import(import: &Import) -> String {
    let line = printer::print_import(
        import.default.as_deref(),
        import.namespace.as_deref(),
        &import.named,
        &import.source,
    );
    if import.type_only {
        line.replacen("import ", "import type ", 1)
    } else {
        line
    }
}

/// Fold `incoming`'s specifiers into `target`. `None` when both bind a
/// different default or namespace name.
fn merge_specifiers(target: &mut Import, incoming: &Import) -> Option<bool> {
    let compatible = |a: &Option<String>, b: &Option<String>| a.is_none() || b.is_none() || a == b;
    if !compatible(&target.default, &incoming.default)
        || !compatible(&target.namespace, &incoming.namespace)
    {
        return None;
    }
    let mut changed = false;
    if target.default.is_none() && incoming.default.is_some() {
        target.default = incoming.default.clone();
        changed = true;
    }
    if target.namespace.is_none() && incoming.namespace.is_some() {
        target.namespace = incoming.namespace.clone();
        changed = true;
    }
    for (imported, local) in &incoming.named {
        if !target.named.iter().any(|(_, l)| l == local) {
            target.named.push((imported.clone(), local.clone()));
            changed = true;
        }
    }
    Some(changed)
}

struct PendingImport {
    span: Option<(usize, usize)>,
    import: Import,
    changed: bool,
}

/// Merge imports into the page's, one declaration per source. Changed
/// declarations are reprinted in place; new ones follow the last import.
fn merge_imports(m: &Module, incoming: Vec<Import>) -> Vec<Edit> {
    let existing = m.imports();
    let last_end = existing.last().map(|i| i.end);
    let mut pending: Vec<PendingImport> = existing
        .into_iter()
        .map(|import| PendingImport {
            span: Some((import.start, import.end)),
            import,
            changed: false,
        })
        .collect();

    for import in incoming {
        let merged = pending
            .iter_mut()
            .filter(|p| p.import.source == import.source && p.import.type_only == import.type_only)
            .find_map(|p| merge_specifiers(&mut p.import, &import).map(|changed| (p, changed)));
        match merged {
            Some((p, changed)) => p.changed |= changed,
            None => pending.push(PendingImport {
                span: None,
                import,
                changed: true,
            }),
        }
    }

    let mut edits = Vec::new();
    let mut appended = Vec::new();
    for p in pending {
        match p.span {
            Some((start, end)) if p.changed => {
                edits.push(Edit::replace(start, end, print_import(&p.import)));
            }
            Some(_) => {}
            None => appended.push(print_import(&p.import)),
        }
    }
    if !appended.is_empty() {
        edits.push(match last_end {
            Some(end) => Edit::insert(
                end,
                appended.iter().map(|line| format!("\n{line}")).collect::<String>(),
            ),
            None => Edit::insert(0, format!("{}\n", appended.join("\n"))),
        });
    }
    edits
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

struct Extracted {
    node: NewNode,
    imports: Vec<Import>,
}

/// First of `styles`, `styles1`, `styles2`, … not bound in the page.
fn valid_styles_name(m: &Module) -> String {
    let mut n = 0;
    loop {
        let name = if n == 0 {
            STYLES.to_string()
        } else {
            format!("{STYLES}{n}")
        };
        if !m.has_binding(&name) {
            return name;
        }
        n += 1;
    }
}

/// Rename `styles` inside the `${}` substitutions of a template literal.
fn rename_in_template(raw: &str, to: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open + 2]);
        rest = &rest[open + 2..];
        let mut depth = 1usize;
        let close = rest
            .char_indices()
            .find_map(|(i, c)| {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(i);
                        }
                    }
                    _ => {}
                }
                None
            })
            .unwrap_or(rest.len());
        out.push_str(&STYLES_WORD.replace_all(&rest[..close], to));
        rest = &rest[close..];
    }
    out.push_str(rest);
    out
}

/// Relative import of the block, as seen from the page next to its folder.
fn rebase_source(source: &str, folder: &str) -> String {
    if !source.starts_with('.') {
        return source.to_string();
    }
    let mut parts: Vec<&str> = vec![folder];
    for segment in source.split('/') {
        match segment {
            "" | "." => {}
            ".." if parts.last().is_some_and(|p| *p != "..") => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{joined}")
    }
}

fn extract_block(block_src: &str, path: &Path, styles: &str) -> Result<Extracted, InsertError> {
    let m = Module::parse(block_src).map_err(|source| InsertError::BlockSyntax {
        path: path.to_path_buf(),
        source,
    })?;
    let range = find_return(&m).ok_or(InsertError::ReturnNodeNotFound)?;
    let (start, end) = m.span(range);

    let renames: Vec<Edit> = (range.start..range.end)
        .filter_map(|k| {
            let tok = m.token(k);
            let text = match tok.kind {
                TokenKind::Ident if m.text(k) == STYLES => styles.to_string(),
                TokenKind::Template if m.text(k).contains("${") => {
                    let renamed = rename_in_template(m.text(k), styles);
                    if renamed == m.text(k) {
                        return None;
                    }
                    renamed
                }
                _ => return None,
            };
            Some(Edit::replace(tok.start - start, tok.end - start, text))
        })
        .collect();
    let text = apply_edits(&block_src[start..end], renames);

    let folder = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let rename = |name: &mut String| {
        if name.as_str() == STYLES {
            *name = styles.to_string();
        }
    };
    let imports = m
        .imports()
        .into_iter()
        .map(|mut import| {
            import.source = rebase_source(&import.source, &folder);
            if let Some(default) = import.default.as_mut() {
                rename(default);
            }
            if let Some(namespace) = import.namespace.as_mut() {
                rename(namespace);
            }
            for (_, local) in import.named.iter_mut() {
                rename(local);
            }
            import
        })
        .collect();

    Ok(Extracted {
        node: NewNode {
            text,
            indent: printer::line_indent(block_src, start).to_string(),
            component: None,
        },
        imports,
    })
}

/// Delete an inlined block file, and its folder once empty.
fn remove_block(path: &Path) -> Result<(), InsertError> {
    std::fs::remove_file(path).map_err(|source| InsertError::Remove {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(dir) = path.parent()
        && std::fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none())
    {
        std::fs::remove_dir(dir).map_err(|source| InsertError::Remove {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Layout placeholders
// ---------------------------------------------------------------------------

enum Placeholder<'e> {
    Flag {
        el: &'e JsxElement,
        parent: Option<&'e JsxElement>,
    },
    Text {
        start: usize,
        end: usize,
        parent: &'e JsxElement,
    },
}

/// Delete an element, with its line when nothing else is on it.
fn remove_element(src: &str, el: &JsxElement) -> Edit {
    let rest = &src[el.end..];
    let line_rest = rest.find('\n').map(|nl| (nl, &rest[..nl]));
    match line_rest {
        Some((nl, tail)) if printer::starts_line(src, el.start) && tail.trim().is_empty() => {
            Edit::delete(printer::line_start(src, el.start), el.end + nl + 1)
        }
        _ => Edit::delete(el.start, el.end),
    }
}

fn insert_at_placeholder(
    m: &Module,
    id: &str,
    relative_path: &str,
    target: usize,
) -> Result<String, InsertError> {
    let src = m.src();
    let roots = m.jsx_roots();
    let mut current = 0;
    let mut found = None;
    for root in &roots {
        root.walk(None, &mut |node| {
            let hit = match node {
                JsxNode::Element { el, parent }
                    if el.name.as_deref() == Some(UMI_UI_FLAG_PLACEHOLDER) =>
                {
                    Some(Placeholder::Flag { el, parent })
                }
                JsxNode::Text { start, end, parent }
                    if src[start..end].trim().starts_with(INSERT_BLOCK_PLACEHOLDER) =>
                {
                    Some(Placeholder::Text { start, end, parent })
                }
                _ => None,
            };
            if let Some(hit) = hit {
                if current == target && found.is_none() {
                    found = Some(hit);
                }
                current += 1;
            }
        });
    }
    let Some(found) = found else {
        tracing::warn!(target, count = current, "Layout placeholder not found");
        return Ok(src.to_string());
    };

    let node = NewNode::tag(id);
    let mut edits = vec![add_import(m, id, relative_path)];
    match found {
        Placeholder::Flag { el, parent } => {
            let parent = parent.ok_or(InsertError::InvalidJsx)?;
            let last = parent.children.iter().filter(|c| !c.is_blank(src)).last();
            match last {
                Some(last) if last.span().0 != el.start => {
                    edits.push(remove_element(src, el));
                    edits.push(insert_after(src, last, &node));
                }
                _ => edits.push(Edit::replace(el.start, el.end, node.text.clone())),
            }
        }
        Placeholder::Text { start, end, parent } => {
            let text = JsxChild::Text { start, end };
            let (ts, te) = content_span(src, &text);
            edits.push(Edit::replace(ts, te, INSERT_BLOCK_PLACEHOLDER));
            let last = parent
                .children
                .iter()
                .filter(|c| !c.is_blank(src))
                .last()
                .unwrap_or(&text);
            edits.push(insert_after(src, last, &node));
        }
    }
    Ok(apply_edits(src, edits))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(identifier: &str, index: InsertIndex, latest: bool) -> InsertOptions {
        InsertOptions {
            relative_path: format!("./{}", upper_camel_case(identifier)),
            identifier: identifier.to_string(),
            index,
            latest,
            extract: None,
        }
    }

    const PAGE: &str = "\
import React from 'react';

export default () => (
  <div>
    <h1>Title</h1>
    <p>Body</p>
  </div>
);
";

    #[test]
    fn test_upper_camel_case() {
        assert_eq!(upper_camel_case("demo-block"), "DemoBlock");
        assert_eq!(upper_camel_case("foo_bar baz"), "FooBarBaz");
        assert_eq!(upper_camel_case("alreadyCamel"), "AlreadyCamel");
    }

    #[test]
    fn test_insert_index_serde() {
        let layout: InsertIndex = serde_json::from_value(json!("$BLOCK_LAYOUT_2")).unwrap();
        assert_eq!(layout, InsertIndex::Layout(2));
        let position: InsertIndex = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(position, InsertIndex::Position(3));
        assert!(serde_json::from_value::<InsertIndex>(json!("nope")).is_err());
        assert_eq!(serde_json::to_value(InsertIndex::Layout(1)).unwrap(), json!("$BLOCK_LAYOUT_1"));
    }

    #[test]
    fn test_insert_first_child() {
        let out = insert_component(PAGE, &opts("demo-block", InsertIndex::Position(0), false)).unwrap();
        assert_eq!(
            out,
            "\
import React from 'react';
import DemoBlock from './DemoBlock';

export default () => (
  <div>
    <DemoBlock />
    <h1>Title</h1>
    <p>Body</p>
  </div>
);
"
        );
    }

    #[test]
    fn test_insert_after_nth_element() {
        let out = insert_component(PAGE, &opts("demo", InsertIndex::Position(1), false)).unwrap();
        assert!(out.contains("    <h1>Title</h1>\n    <Demo />\n    <p>Body</p>\n"));
        // Past the end appends
        let out = insert_component(PAGE, &opts("demo", InsertIndex::Position(9), false)).unwrap();
        assert!(out.contains("    <p>Body</p>\n    <Demo />\n  </div>"));
    }

    #[test]
    fn test_insert_latest() {
        let out = insert_component(PAGE, &opts("demo", InsertIndex::Position(0), true)).unwrap();
        assert!(out.contains("    <p>Body</p>\n    <Demo />\n  </div>"));
    }

    #[test]
    fn test_childless_return_becomes_fragment() {
        let src = "export default function Page() {\n  return <div />;\n}\n";
        let out = insert_component(src, &opts("demo", InsertIndex::Position(0), false)).unwrap();
        assert_eq!(
            out,
            "\
import Demo from './Demo';
export default function Page() {
  return (
    <>
      <Demo />
      <div />
    </>
  );
}
"
        );
        let out = insert_component(src, &opts("demo", InsertIndex::Position(1), false)).unwrap();
        assert!(out.contains("      <div />\n      <Demo />\n"));
    }

    #[test]
    fn test_unwraps_hoc_and_class_render() {
        let src = "\
import React from 'react';
import { connect } from 'dva';

class Page extends React.Component {
  render() {
    return (
      <div>
        <span>hi</span>
      </div>
    );
  }
}

export default connect(() => ({}))(Page);
";
        let out = insert_component(src, &opts("hello-world", InsertIndex::Position(0), false)).unwrap();
        assert!(out.contains("import { connect } from 'dva';\nimport HelloWorld from './HelloWorld';\n"));
        assert!(out.contains("      <div>\n        <HelloWorld />\n        <span>hi</span>\n"));
    }

    #[test]
    fn test_create_element_return() {
        let src = "export default () => React.createElement('div', null, React.createElement('span'));";
        let out = insert_component(src, &opts("demo", InsertIndex::Position(0), true)).unwrap();
        assert!(out.ends_with(
            "React.createElement('div', null, React.createElement('span'), React.createElement(Demo));"
        ));
        let src = "export default () => React.createElement('div');";
        let out = insert_component(src, &opts("demo", InsertIndex::Position(0), false)).unwrap();
        assert!(out.ends_with("React.createElement('div', null, React.createElement(Demo));"));
    }

    #[test]
    fn test_missing_return_node() {
        let err = insert_component("export default 42;", &opts("demo", InsertIndex::Position(0), false))
            .unwrap_err();
        assert_eq!(err.to_string(), "Can not find return node");
        let err = insert_component("const a = 1;", &opts("demo", InsertIndex::Position(0), false))
            .unwrap_err();
        assert!(matches!(err, InsertError::ReturnNodeNotFound));
    }

    #[test]
    fn test_non_jsx_return_is_rejected() {
        let err = insert_component(
            "export default () => { return null; };",
            &opts("demo", InsertIndex::Position(0), false),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "add block to jsx failed, not valid jsx element");
    }

    const LAYOUT: &str = "\
import React from 'react';
import { UmiUIFlag } from 'umi';

export default () => (
  <div>
    <UmiUIFlag />
    <Card />
    <UmiUIFlag />
  </div>
);
";

    #[test]
    fn test_flag_placeholder_last() {
        let out = insert_component(LAYOUT, &opts("demo", InsertIndex::Layout(1), false)).unwrap();
        assert!(out.contains("import { UmiUIFlag } from 'umi';\nimport Demo from './Demo';\n"));
        assert!(out.contains("    <UmiUIFlag />\n    <Card />\n    <Demo />\n  </div>"));
    }

    #[test]
    fn test_flag_placeholder_moves_to_end() {
        let out = insert_component(LAYOUT, &opts("demo", InsertIndex::Layout(0), false)).unwrap();
        assert!(out.contains("  <div>\n    <Card />\n    <UmiUIFlag />\n    <Demo />\n  </div>"));
    }

    #[test]
    fn test_text_placeholder() {
        let src = "export default () => <div>\n  INSERT_BLOCK_PLACEHOLDER (drop here)\n</div>;\n";
        let out = insert_component(src, &opts("demo", InsertIndex::Layout(0), false)).unwrap();
        assert_eq!(
            out,
            "import Demo from './Demo';\nexport default () => <div>\n  INSERT_BLOCK_PLACEHOLDER\n  <Demo />\n</div>;\n"
        );
    }

    #[test]
    fn test_missing_placeholder_leaves_source() {
        let out = insert_component(LAYOUT, &opts("demo", InsertIndex::Layout(5), false)).unwrap();
        assert_eq!(out, LAYOUT);
    }

    #[test]
    fn test_root_placeholder_is_rejected() {
        let err = insert_component(
            "export default () => <UmiUIFlag />;",
            &opts("demo", InsertIndex::Layout(0), false),
        )
        .unwrap_err();
        assert!(matches!(err, InsertError::InvalidJsx));
    }

    const TARGET: &str = "\
import React from 'react';
import { Button } from 'antd';
import styles from './index.less';

export default () => (
  <div className={styles.main}>
    <h1>Title</h1>
  </div>
);
";

    const BLOCK: &str = "\
import React from 'react';
import { Card, Button } from 'antd';
import styles from './index.less';

export default () => (
  <Card className={`${styles.card} wide`}>
    <p className={styles.text}>Block</p>
  </Card>
);
";

    fn write_block(dir: &Path) -> PathBuf {
        let block_dir = dir.join("Demo");
        std::fs::create_dir_all(&block_dir).unwrap();
        let path = block_dir.join("index.tsx");
        std::fs::write(&path, BLOCK).unwrap();
        path
    }

    #[test]
    fn test_extract_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_block(dir.path());
        let mut options = opts("demo", InsertIndex::Position(0), true);
        options.extract = Some(ExtractBlock {
            absolute_path: path.clone(),
            keep_source: false,
        });
        let out = insert_component(TARGET, &options).unwrap();
        assert_eq!(
            out,
            "\
import React from 'react';
import { Button, Card } from 'antd';
import styles from './index.less';
import styles1 from './Demo/index.less';

export default () => (
  <div className={styles.main}>
    <h1>Title</h1>
    <Card className={`${styles1.card} wide`}>
      <p className={styles1.text}>Block</p>
    </Card>
  </div>
);
"
        );
        assert!(!path.exists());
        assert!(!dir.path().join("Demo").exists());
    }

    #[test]
    fn test_extract_block_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_block(dir.path());
        std::fs::write(dir.path().join("Demo").join("index.less"), ".card {}").unwrap();
        let mut options = opts("demo", InsertIndex::Position(0), false);
        options.extract = Some(ExtractBlock {
            absolute_path: path.clone(),
            keep_source: true,
        });
        insert_component(TARGET, &options).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_extract_removes_file_but_not_busy_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_block(dir.path());
        std::fs::write(dir.path().join("Demo").join("index.less"), ".card {}").unwrap();
        let mut options = opts("demo", InsertIndex::Position(0), false);
        options.extract = Some(ExtractBlock {
            absolute_path: path.clone(),
            keep_source: false,
        });
        insert_component(TARGET, &options).unwrap();
        assert!(!path.exists());
        assert!(dir.path().join("Demo").exists());
    }

    #[test]
    fn test_rebase_source() {
        assert_eq!(rebase_source("./index.less", "Demo"), "./Demo/index.less");
        assert_eq!(rebase_source("../utils", "Demo"), "./utils");
        assert_eq!(rebase_source("antd", "Demo"), "antd");
    }

    #[test]
    fn test_append_block_to_container() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("index.tsx");
        std::fs::write(&entry, PAGE).unwrap();

        let preview = append_block_to_container(&entry, "Hello", true, InsertIndex::Position(0)).unwrap();
        assert!(preview.contains("import Hello from './Hello';"));
        assert_eq!(std::fs::read_to_string(&entry).unwrap(), PAGE);

        append_block_to_container(&entry, "Hello", false, InsertIndex::Position(0)).unwrap();
        assert_eq!(std::fs::read_to_string(&entry).unwrap(), preview);
    }
}
