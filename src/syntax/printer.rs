//! Formatting for generated code fragments.
//!
//! Output follows the formatting used across umi projects: single quotes,
//! two-space indentation, a 100-column print width and trailing commas in
//! multi-line literals.

use serde_json::Value;

pub const PRINT_WIDTH: usize = 100;
pub const INDENT: &str = "  ";

/// Single-quoted JS string literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

pub fn object_key(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

/// Print a JSON value as a JS literal whose first line starts at `column`
/// and whose continuation lines are indented by `indent`.
pub fn print_value(value: &Value, indent: &str, column: usize) -> String {
    let inline = print_inline(value);
    let fits = column + inline.chars().count() <= PRINT_WIDTH;
    match value {
        Value::Object(map) if !map.is_empty() && !fits => {
            let inner = format!("{indent}{INDENT}");
            let mut out = String::from("{\n");
            for (key, v) in map {
                let key = object_key(key);
                let column = inner.len() + key.len() + 2;
                out.push_str(&format!("{inner}{key}: {},\n", print_value(v, &inner, column)));
            }
            out.push_str(indent);
            out.push('}');
            out
        }
        Value::Array(items) if !items.is_empty() && !fits => {
            let inner = format!("{indent}{INDENT}");
            let mut out = String::from("[\n");
            for v in items {
                out.push_str(&format!("{inner}{},\n", print_value(v, &inner, inner.len())));
            }
            out.push_str(indent);
            out.push(']');
            out
        }
        _ => inline,
    }
}

fn print_inline(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(print_inline).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        Value::Object(map) => {
            let props: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", object_key(k), print_inline(v)))
                .collect();
            format!("{{ {} }}", props.join(", "))
        }
    }
}

/// `import` declaration with the given specifiers.
pub fn print_import(
    default: Option<&str>,
    namespace: Option<&str>,
    named: &[(String, String)],
    source: &str,
) -> String {
    let mut specifiers = Vec::new();
    if let Some(default) = default {
        specifiers.push(default.to_string());
    }
    if let Some(namespace) = namespace {
        specifiers.push(format!("* as {namespace}"));
    }
    if !named.is_empty() {
        let named: Vec<String> = named
            .iter()
            .map(|(imported, local)| {
                if imported == local {
                    imported.clone()
                } else {
                    format!("{imported} as {local}")
                }
            })
            .collect();
        specifiers.push(format!("{{ {} }}", named.join(", ")));
    }
    if specifiers.is_empty() {
        format!("import {};", quote(source))
    } else {
        format!("import {} from {};", specifiers.join(", "), quote(source))
    }
}

/// Self-closing JSX element for a component identifier.
pub fn jsx_tag(name: &str) -> String {
    format!("<{name} />")
}

/// Byte offset of the start of the line containing `offset`.
pub fn line_start(src: &str, offset: usize) -> usize {
    src[..offset].rfind('\n').map_or(0, |i| i + 1)
}

/// Leading whitespace of the line containing `offset`.
pub fn line_indent(src: &str, offset: usize) -> &str {
    let start = line_start(src, offset);
    let line = &src[start..];
    let len = line.len() - line.trim_start_matches([' ', '\t']).len();
    &line[..len]
}

/// Only whitespace precedes `offset` on its line.
pub fn starts_line(src: &str, offset: usize) -> bool {
    src[line_start(src, offset)..offset].trim().is_empty()
}

/// Shift every line after the first from `from` indentation to `to`.
pub fn reindent(text: &str, from: &str, to: &str) -> String {
    let mut lines = text.split('\n');
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(to);
        out.push_str(line.strip_prefix(from).unwrap_or(line.trim_start()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote() {
        assert_eq!(quote("./Foo"), "'./Foo'");
        assert_eq!(quote("it's"), r"'it\'s'");
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("path"), "path");
        assert_eq!(object_key("data-id"), "'data-id'");
    }

    #[test]
    fn test_print_value_inline() {
        let v = json!({ "path": "/a/b", "component": "./A/B" });
        assert_eq!(
            print_value(&v, "", 0),
            "{ path: '/a/b', component: './A/B' }"
        );
        assert_eq!(print_value(&json!([]), "", 0), "[]");
    }

    #[test]
    fn test_print_value_breaks_long_objects() {
        let v = json!({
            "name": "a very long route name that does not fit",
            "path": "/some/deeply/nested/route/path",
            "component": "./some/deeply/nested/route/path",
        });
        assert_eq!(
            print_value(&v, "    ", 4),
            "{\n      name: 'a very long route name that does not fit',\n      path: '/some/deeply/nested/route/path',\n      component: './some/deeply/nested/route/path',\n    }"
        );
    }

    #[test]
    fn test_print_import() {
        assert_eq!(
            print_import(Some("Demo"), None, &[], "./Demo"),
            "import Demo from './Demo';"
        );
        assert_eq!(
            print_import(
                Some("React"),
                None,
                &[("a".into(), "a".into()), ("b".into(), "c".into())],
                "react"
            ),
            "import React, { a, b as c } from 'react';"
        );
        assert_eq!(print_import(None, None, &[], "./x.less"), "import './x.less';");
    }

    #[test]
    fn test_line_helpers() {
        let src = "a\n    <div>\n";
        let offset = src.find('<').unwrap();
        assert_eq!(line_indent(src, offset), "    ");
        assert!(starts_line(src, offset));
        assert!(!starts_line(src, offset + 1));
    }

    #[test]
    fn test_reindent() {
        assert_eq!(reindent("<a>\n  <b />\n</a>", "", "    "), "<a>\n      <b />\n    </a>");
        assert_eq!(reindent("<a>\n\n</a>", "", "  "), "<a>\n\n  </a>");
    }
}
