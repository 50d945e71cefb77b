//! Literal arrays and objects, as found in route configs.

use super::{Module, TokRange, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Array(ArrayLit),
    Object(ObjectLit),
    Str { value: String, start: usize, end: usize },
    Ident { name: String, start: usize, end: usize },
    /// Anything else: calls, spreads, computed values.
    Other { start: usize, end: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayLit {
    /// Byte offset of `[`.
    pub start: usize,
    /// Byte offset just past `]`.
    pub end: usize,
    pub elements: Vec<Literal>,
    pub trailing_comma: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLit {
    pub start: usize,
    pub end: usize,
    pub props: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Static key; `None` for computed keys and spreads.
    pub key: Option<String>,
    pub value: Literal,
}

impl Literal {
    pub fn span(&self) -> (usize, usize) {
        match self {
            Self::Array(a) => (a.start, a.end),
            Self::Object(o) => (o.start, o.end),
            Self::Str { start, end, .. }
            | Self::Ident { start, end, .. }
            | Self::Other { start, end } => (*start, *end),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl ObjectLit {
    pub fn get(&self, key: &str) -> Option<&Literal> {
        self.props
            .iter()
            .find(|p| p.key.as_deref() == Some(key))
            .map(|p| &p.value)
    }
}

/// Value of a quoted string or a substitution-free template token.
pub fn string_value(raw: &str) -> String {
    let inner = if raw.len() >= 2 { &raw[1..raw.len() - 1] } else { "" };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            // Line continuation
            Some('\n') => {}
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

impl Module<'_> {
    /// Literal value of the expression in `r`.
    pub fn literal(&self, r: TokRange) -> Literal {
        let r = self.strip_parens(r);
        if r.is_empty() {
            return Literal::Other { start: 0, end: 0 };
        }
        let (start, end) = self.span(r);
        let first = r.start;
        let single = r.len() == 1;
        if self.is(first, "[") && self.jump(first) == Some(r.end - 1) {
            return Literal::Array(self.array_literal(first));
        }
        if self.is(first, "{") && self.jump(first) == Some(r.end - 1) {
            return Literal::Object(self.object_literal(first));
        }
        match self.kind(first) {
            Some(TokenKind::Str) if single => Literal::Str {
                value: string_value(self.text(first)),
                start,
                end,
            },
            Some(TokenKind::Template) if single && !self.text(first).contains("${") => {
                Literal::Str {
                    value: string_value(self.text(first)),
                    start,
                    end,
                }
            }
            Some(TokenKind::Ident) if single => Literal::Ident {
                name: self.text(first).to_string(),
                start,
                end,
            },
            _ => Literal::Other { start, end },
        }
    }

    fn array_literal(&self, open: usize) -> ArrayLit {
        let close = self.jump(open).unwrap_or(open);
        let inner = TokRange::new(open + 1, close);
        let elements = self
            .split_commas(inner)
            .into_iter()
            .map(|r| self.literal(r))
            .collect();
        let trailing_comma = close > open + 1 && self.is(close - 1, ",");
        ArrayLit {
            start: self.token(open).start,
            end: self.token(close).end,
            elements,
            trailing_comma,
        }
    }

    fn object_literal(&self, open: usize) -> ObjectLit {
        let close = self.jump(open).unwrap_or(open);
        let props = self
            .split_commas(TokRange::new(open + 1, close))
            .into_iter()
            .map(|p| self.property(p))
            .collect();
        ObjectLit {
            start: self.token(open).start,
            end: self.token(close).end,
            props,
        }
    }

    fn property(&self, p: TokRange) -> Property {
        let key = match self.kind(p.start) {
            Some(TokenKind::Ident) => Some(self.text(p.start).to_string()),
            Some(TokenKind::Str) => Some(string_value(self.text(p.start))),
            Some(TokenKind::Number) => Some(self.text(p.start).to_string()),
            _ => None,
        };
        if p.len() == 1 {
            return Property {
                key,
                value: self.literal(p),
            };
        }
        if self.is(p.start + 1, ":") {
            return Property {
                key,
                value: self.literal(TokRange::new(p.start + 2, p.end)),
            };
        }
        // Methods, getters, spreads, computed keys
        let (start, end) = self.span(p);
        Property {
            key: if self.is(p.start + 1, "(") { key } else { None },
            value: Literal::Other { start, end },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_value(src: &str) -> (Module<'_>, Literal) {
        let m = Module::parse(src).unwrap();
        let eq = m.find_at_level(TokRange::new(0, m.len()), "=").unwrap();
        let end = m.expr_end(eq + 1, m.len(), false);
        let lit = m.literal(TokRange::new(eq + 1, end));
        (m, lit)
    }

    #[test]
    fn test_route_array() {
        let src = r#"const routes = [
  { path: '/', component: '../layouts', routes: [{ path: "/a", redirect: '/b' }] },
  { path: '/c', component: Page, ...rest },
];"#;
        let (_, lit) = parse_value(src);
        let Literal::Array(arr) = lit else {
            panic!("not an array");
        };
        assert!(arr.trailing_comma);
        assert_eq!(arr.elements.len(), 2);
        let Literal::Object(first) = &arr.elements[0] else {
            panic!("not an object");
        };
        assert_eq!(first.get("path").and_then(Literal::as_str), Some("/"));
        let Some(Literal::Array(nested)) = first.get("routes") else {
            panic!("no nested routes");
        };
        let Literal::Object(child) = &nested.elements[0] else {
            panic!("not an object");
        };
        assert_eq!(child.get("redirect").and_then(Literal::as_str), Some("/b"));
        let Literal::Object(second) = &arr.elements[1] else {
            panic!("not an object");
        };
        assert!(matches!(second.get("component"), Some(Literal::Ident { name, .. }) if name == "Page"));
        assert_eq!(second.props[2].key, None);
        assert_eq!(&src[arr.start..arr.end].chars().last(), &Some(']'));
    }

    #[test]
    fn test_string_keys_and_templates() {
        let (_, lit) = parse_value("x = { 'path': `/a`, other: `${x}` }");
        let Literal::Object(obj) = lit else {
            panic!("not an object");
        };
        assert_eq!(obj.get("path").and_then(Literal::as_str), Some("/a"));
        assert!(matches!(obj.get("other"), Some(Literal::Other { .. })));
    }

    #[test]
    fn test_empty_array() {
        let (_, lit) = parse_value("x = []");
        let Literal::Array(arr) = lit else {
            panic!("not an array");
        };
        assert!(arr.elements.is_empty());
        assert!(!arr.trailing_comma);
    }

    #[test]
    fn test_string_value_escapes() {
        assert_eq!(string_value(r"'it\'s'"), "it's");
        assert_eq!(string_value(r#""a\nb""#), "a\nb");
        assert_eq!(string_value(r"'A'"), "A");
    }
}
