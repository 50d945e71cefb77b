//! Span-preserving analysis of JS / TS / JSX sources.
//!
//! Route configs and page components are edited in place: the source is
//! tokenized once, the few structures the installer cares about (imports,
//! top-level bindings, the default export, returned JSX, literal arrays and
//! objects) are located by token index, and changes are applied as byte-range
//! [`Edit`]s so everything outside the edited ranges is left untouched.

pub mod edit;
pub mod jsx;
pub mod lexer;
pub mod literal;
pub mod printer;

pub use edit::{Edit, apply_edits};
pub use jsx::{JsxChild, JsxElement, JsxNode};
pub use lexer::{Token, TokenKind};
pub use literal::{ArrayLit, Literal, ObjectLit, Property, string_value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Source that could not be tokenized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    #[error("Unterminated {0} at offset {1}")]
    Unterminated(&'static str, usize),
    #[error("Unbalanced bracket at offset {0}")]
    Unbalanced(usize),
    #[error("Unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("Unexpected end of file")]
    UnexpectedEof,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Half-open range of token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokRange {
    pub start: usize,
    pub end: usize,
}

impl TokRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Byte span of the whole declaration, trailing `;` included.
    pub start: usize,
    pub end: usize,
    pub default: Option<String>,
    pub namespace: Option<String>,
    /// `(imported, local)` pairs.
    pub named: Vec<(String, String)>,
    pub source: String,
    pub type_only: bool,
}

impl Import {
    pub fn locals(&self) -> impl Iterator<Item = &str> {
        self.default
            .iter()
            .chain(self.namespace.iter())
            .map(String::as_str)
            .chain(self.named.iter().map(|(_, local)| local.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDefault {
    pub stmt: TokRange,
    /// The exported expression or declaration, without the trailing `;`.
    pub value: TokRange,
}

/// What a top-level name is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Import,
    Function(TokRange),
    Class(TokRange),
    Var(Option<TokRange>),
}

/// Rough shape of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Ident(String),
    Call { callee: TokRange, args: Vec<TokRange> },
    /// Function with a block body; `body` is the index of its `{`.
    Function { body: usize },
    /// Arrow function with an expression body.
    Arrow { body: TokRange },
    Class { body: usize },
    Jsx { root: usize },
    Other,
}

const NON_TERMINAL_WORDS: &[&str] = &[
    "return", "typeof", "new", "delete", "void", "throw", "await", "yield", "in", "of",
    "instanceof", "case", "export", "default", "extends", "const", "let", "var", "import",
];

const CONTINUATION_WORDS: &[&str] = &[
    "as", "satisfies", "instanceof", "in", "of", "extends", "implements",
];

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// A tokenized source file.
pub struct Module<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    jump: Vec<Option<usize>>,
    parent: Vec<Option<usize>>,
}

impl std::fmt::Debug for Module<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl<'a> Module<'a> {
    pub fn parse(src: &'a str) -> Result<Self, SyntaxError> {
        let lexed = lexer::tokenize(src)?;
        Ok(Self {
            src,
            tokens: lexed.tokens,
            jump: lexed.jump,
            parent: lexed.parent,
        })
    }

    pub fn src(&self) -> &'a str {
        self.src
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, i: usize) -> Token {
        self.tokens[i]
    }

    pub fn kind(&self, i: usize) -> Option<TokenKind> {
        self.tokens.get(i).map(|t| t.kind)
    }

    pub fn text(&self, i: usize) -> &'a str {
        let t = self.tokens[i];
        &self.src[t.start..t.end]
    }

    /// Token `i` is the identifier or punctuator `s`.
    pub fn is(&self, i: usize, s: &str) -> bool {
        self.tokens
            .get(i)
            .is_some_and(|t| matches!(t.kind, TokenKind::Ident | TokenKind::Punct))
            && self.text(i) == s
    }

    /// Index of the token closing the bracket or element opened at `i`.
    pub fn jump(&self, i: usize) -> Option<usize> {
        self.jump.get(i).copied().flatten()
    }

    /// Innermost bracket enclosing token `i`.
    pub fn parent(&self, i: usize) -> Option<usize> {
        self.parent.get(i).copied().flatten()
    }

    /// Next token at the same nesting level as `i`.
    pub fn next(&self, i: usize) -> usize {
        self.jump(i).map_or(i + 1, |j| j + 1)
    }

    /// Byte span of a non-empty token range.
    pub fn span(&self, r: TokRange) -> (usize, usize) {
        (self.tokens[r.start].start, self.tokens[r.end - 1].end)
    }

    pub fn slice(&self, r: TokRange) -> &'a str {
        if r.is_empty() {
            return "";
        }
        let (start, end) = self.span(r);
        &self.src[start..end]
    }

    /// First token at the level of `r.start` matching `s`.
    pub fn find_at_level(&self, r: TokRange, s: &str) -> Option<usize> {
        let mut k = r.start;
        while k < r.end {
            if self.is(k, s) {
                return Some(k);
            }
            k = self.next(k);
        }
        None
    }

    /// Split `r` on commas at its own level. Empty pieces are dropped.
    pub fn split_commas(&self, r: TokRange) -> Vec<TokRange> {
        let mut out = Vec::new();
        let mut start = r.start;
        let mut k = r.start;
        while k < r.end {
            if self.is(k, ",") {
                if k > start {
                    out.push(TokRange::new(start, k));
                }
                start = k + 1;
            }
            k = self.next(k);
        }
        if r.end > start {
            out.push(TokRange::new(start, r.end));
        }
        out
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    pub fn statements(&self) -> Vec<TokRange> {
        self.statements_in(0, self.tokens.len())
    }

    /// Statements between token `start` and `limit`, e.g. a block body.
    pub fn statements_in(&self, start: usize, limit: usize) -> Vec<TokRange> {
        let mut out = Vec::new();
        let mut k = start;
        while k < limit {
            let end = self.statement_end(k, limit).max(k + 1).min(limit);
            out.push(TokRange::new(k, end));
            k = end;
        }
        out
    }

    fn with_semicolon(&self, end: usize, limit: usize) -> usize {
        if end < limit && self.is(end, ";") {
            end + 1
        } else {
            end
        }
    }

    /// End (exclusive) of the statement starting at `i`.
    pub fn statement_end(&self, i: usize, limit: usize) -> usize {
        if i >= limit {
            return limit;
        }
        let word = match self.kind(i) {
            Some(TokenKind::Ident | TokenKind::Punct) => self.text(i),
            _ => "",
        };
        let next_is_ident = self.kind(i + 1) == Some(TokenKind::Ident);
        match word {
            ";" => i + 1,
            "{" => self.next(i),
            "import" if !self.is(i + 1, "(") && !self.is(i + 1, ".") => self.import_end(i, limit),
            "export" => self.export_end(i, limit),
            "function" => self.function_end(i, limit),
            "async" if self.is(i + 1, "function") => self.function_end(i + 1, limit),
            "class" | "interface" | "enum" | "namespace" if next_is_ident => {
                self.block_end_after(i, limit)
            }
            "declare" | "abstract" if next_is_ident => self.statement_end(i + 1, limit),
            "return" | "throw" => {
                if i + 1 < limit && !self.tokens[i + 1].nl_before && !self.is(i + 1, ";") {
                    let end = self.expr_end(i + 1, limit, false);
                    self.with_semicolon(end, limit)
                } else {
                    self.with_semicolon(i + 1, limit)
                }
            }
            "if" | "for" | "while" | "with" | "switch" if self.is(i + 1, "(") || self.is(i + 1, "await") => {
                let mut k = i + 1;
                if self.is(k, "await") {
                    k += 1;
                }
                let body = self.next(k);
                let end = self.statement_end(body, limit);
                if word == "if" && self.is(end, "else") {
                    self.statement_end(end + 1, limit)
                } else {
                    end
                }
            }
            "try" if self.is(i + 1, "{") => {
                let mut k = self.next(i + 1);
                if self.is(k, "catch") {
                    k += 1;
                    if self.is(k, "(") {
                        k = self.next(k);
                    }
                    k = self.next(k);
                }
                if self.is(k, "finally") {
                    k = self.next(k + 1);
                }
                k
            }
            "do" => {
                let body_end = self.statement_end(i + 1, limit);
                if self.is(body_end, "while") {
                    let end = self.next(body_end + 1);
                    self.with_semicolon(end, limit)
                } else {
                    body_end
                }
            }
            _ => {
                let end = self.expr_end(i, limit, false);
                self.with_semicolon(end, limit)
            }
        }
    }

    fn import_end(&self, i: usize, limit: usize) -> usize {
        let mut k = i + 1;
        while k < limit {
            if self.tokens[k].kind == TokenKind::Str {
                return self.with_semicolon(k + 1, limit);
            }
            if self.is(k, ";") {
                return k + 1;
            }
            k = self.next(k);
        }
        limit
    }

    fn export_end(&self, i: usize, limit: usize) -> usize {
        let j = i + 1;
        if self.is(j, "default") {
            let k = j + 1;
            let declaration = self.is(k, "function")
                || self.is(k, "class")
                || (self.is(k, "async") && self.is(k + 1, "function"));
            if declaration {
                return self.statement_end(k, limit);
            }
            let end = self.expr_end(k, limit, false);
            return self.with_semicolon(end, limit);
        }
        if self.is(j, "{") || self.is(j, "*") {
            let end = self.expr_end(j, limit, false);
            return self.with_semicolon(end, limit);
        }
        self.statement_end(j, limit)
    }

    fn function_end(&self, i: usize, limit: usize) -> usize {
        let Some(params) = self.find_at_level(TokRange::new(i + 1, limit), "(") else {
            return self.expr_end(i, limit, false);
        };
        let mut k = self.next(params);
        while k < limit {
            if self.is(k, "{") {
                return self.next(k);
            }
            // Overload signature without a body
            if self.is(k, ";") {
                return k + 1;
            }
            k = self.next(k);
        }
        limit
    }

    fn block_end_after(&self, i: usize, limit: usize) -> usize {
        match self.find_at_level(TokRange::new(i + 1, limit), "{") {
            Some(open) => self.next(open),
            None => self.with_semicolon(self.expr_end(i, limit, false), limit),
        }
    }

    /// End (exclusive) of the expression starting at `i`. Stops before a
    /// `;`, a closing bracket of the enclosing level, a `,` when
    /// `stop_at_comma`, or a line break where a semicolon would be inserted.
    pub fn expr_end(&self, i: usize, limit: usize, stop_at_comma: bool) -> usize {
        let mut k = i;
        let mut prev: Option<usize> = None;
        while k < limit {
            let tok = self.tokens[k];
            if tok.kind == TokenKind::Punct {
                match self.text(k) {
                    ";" | ")" | "]" | "}" => return k,
                    "," if stop_at_comma => return k,
                    _ => {}
                }
            }
            if let Some(p) = prev
                && tok.nl_before
                && self.ends_expression(p)
                && self.starts_statement(k)
            {
                return k;
            }
            prev = Some(k);
            k = self.next(k);
        }
        limit
    }

    fn ends_expression(&self, i: usize) -> bool {
        if self.jump(i).is_some() {
            return true;
        }
        match self.tokens[i].kind {
            TokenKind::Ident => !NON_TERMINAL_WORDS.contains(&self.text(i)),
            TokenKind::Str | TokenKind::Number | TokenKind::Template | TokenKind::Regex => true,
            TokenKind::Punct => matches!(self.text(i), ")" | "]" | "}" | "++" | "--"),
            _ => false,
        }
    }

    fn starts_statement(&self, i: usize) -> bool {
        match self.tokens[i].kind {
            TokenKind::Ident => !CONTINUATION_WORDS.contains(&self.text(i)),
            TokenKind::Str | TokenKind::Number | TokenKind::JsxTagStart => true,
            TokenKind::Punct => matches!(self.text(i), "++" | "--" | "@"),
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Imports and exports
    // -----------------------------------------------------------------------

    fn is_import_statement(&self, stmt: TokRange) -> bool {
        self.is(stmt.start, "import") && !self.is(stmt.start + 1, "(") && !self.is(stmt.start + 1, ".")
    }

    pub fn imports(&self) -> Vec<Import> {
        self.statements()
            .into_iter()
            .filter(|stmt| self.is_import_statement(*stmt))
            .filter_map(|stmt| self.parse_import(stmt))
            .collect()
    }

    fn parse_import(&self, stmt: TokRange) -> Option<Import> {
        let mut k = stmt.start + 1;
        let mut import = Import {
            start: self.tokens[stmt.start].start,
            end: self.tokens[stmt.end - 1].end,
            default: None,
            namespace: None,
            named: Vec::new(),
            source: String::new(),
            type_only: false,
        };
        if self.is(k, "type") && !self.is(k + 1, "from") && !self.is(k + 1, ",") {
            import.type_only = true;
            k += 1;
        }
        if self.kind(k) == Some(TokenKind::Ident) && !self.is(k, "from") {
            import.default = Some(self.text(k).to_string());
            k += 1;
            if self.is(k, ",") {
                k += 1;
            }
        }
        if self.is(k, "*") && self.is(k + 1, "as") {
            import.namespace = Some(self.text(k + 2).to_string());
            k += 3;
        }
        if self.is(k, "{") {
            let close = self.jump(k)?;
            for spec in self.split_commas(TokRange::new(k + 1, close)) {
                let mut s = spec.start;
                if spec.len() > 1 && self.is(s, "type") {
                    s += 1;
                }
                let imported = self.name_value(s);
                let local = if self.is(s + 1, "as") && s + 2 < spec.end {
                    self.name_value(s + 2)
                } else {
                    imported.clone()
                };
                import.named.push((imported, local));
            }
            k = close + 1;
        }
        if self.is(k, "from") {
            k += 1;
        }
        if self.kind(k) != Some(TokenKind::Str) {
            return None;
        }
        import.source = string_value(self.text(k));
        Some(import)
    }

    fn name_value(&self, i: usize) -> String {
        match self.kind(i) {
            Some(TokenKind::Str) => string_value(self.text(i)),
            _ => self.text(i).to_string(),
        }
    }

    pub fn export_default(&self) -> Option<ExportDefault> {
        self.statements().into_iter().find_map(|stmt| {
            if !self.is(stmt.start, "export") || !self.is(stmt.start + 1, "default") {
                return None;
            }
            let mut end = stmt.end;
            if end > stmt.start + 2 && self.is(end - 1, ";") {
                end -= 1;
            }
            Some(ExportDefault {
                stmt,
                value: TokRange::new(stmt.start + 2, end),
            })
        })
    }

    // -----------------------------------------------------------------------
    // Bindings
    // -----------------------------------------------------------------------

    /// Names declared at the top level, in source order.
    pub fn top_level_bindings(&self) -> Vec<(String, Binding)> {
        let mut out = Vec::new();
        for stmt in self.statements() {
            if self.is_import_statement(stmt) {
                if let Some(import) = self.parse_import(stmt) {
                    out.extend(import.locals().map(|l| (l.to_string(), Binding::Import)));
                }
                continue;
            }
            let mut k = stmt.start;
            if self.is(k, "export") {
                k += 1;
                if self.is(k, "default") {
                    k += 1;
                }
            }
            if self.is(k, "declare") {
                k += 1;
            }
            let mut end = stmt.end;
            if end > k + 1 && self.is(end - 1, ";") {
                end -= 1;
            }
            let decl = TokRange::new(k, end);
            let mut f = k;
            if self.is(f, "async") && self.is(f + 1, "function") {
                f += 1;
            }
            if self.is(f, "function") {
                let mut name = f + 1;
                if self.is(name, "*") {
                    name += 1;
                }
                if self.kind(name) == Some(TokenKind::Ident) {
                    out.push((self.text(name).to_string(), Binding::Function(decl)));
                }
            } else if self.is(k, "class") {
                if self.kind(k + 1) == Some(TokenKind::Ident) && !self.is(k + 1, "extends") {
                    out.push((self.text(k + 1).to_string(), Binding::Class(decl)));
                }
            } else if self.is(k, "const") || self.is(k, "let") || self.is(k, "var") {
                for declarator in self.split_commas(TokRange::new(k + 1, end)) {
                    self.declarator_bindings(declarator, &mut out);
                }
            }
        }
        out
    }

    fn declarator_bindings(&self, d: TokRange, out: &mut Vec<(String, Binding)>) {
        let eq = self.find_at_level(d, "=");
        let init = eq.map(|eq| TokRange::new(eq + 1, d.end)).filter(|r| !r.is_empty());
        let pattern_end = eq.unwrap_or(d.end);
        match self.kind(d.start) {
            Some(TokenKind::Ident) => {
                out.push((self.text(d.start).to_string(), Binding::Var(init)));
            }
            Some(TokenKind::Punct) if self.jump(d.start).is_some() => {
                for k in d.start + 1..pattern_end {
                    let key = self.is(k + 1, ":");
                    let default_value = k > 0 && self.is(k - 1, "=");
                    if self.kind(k) == Some(TokenKind::Ident) && !key && !default_value {
                        out.push((self.text(k).to_string(), Binding::Var(None)));
                    }
                }
            }
            _ => {}
        }
    }

    pub fn binding(&self, name: &str) -> Option<Binding> {
        self.top_level_bindings()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.top_level_bindings().iter().any(|(n, _)| n == name)
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Drop parentheses wrapping the whole range.
    pub fn strip_parens(&self, mut r: TokRange) -> TokRange {
        while r.len() >= 2 && self.is(r.start, "(") && self.jump(r.start) == Some(r.end - 1) {
            r = TokRange::new(r.start + 1, r.end - 1);
        }
        r
    }

    /// Drop a trailing `as T` / `satisfies T` / `!`.
    fn strip_type_suffix(&self, r: TokRange) -> TokRange {
        let mut k = r.start + 1;
        while k < r.end {
            if self.is(k, "as") || self.is(k, "satisfies") {
                return TokRange::new(r.start, k);
            }
            k = self.next(k);
        }
        if r.len() > 1 && self.is(r.end - 1, "!") {
            return TokRange::new(r.start, r.end - 1);
        }
        r
    }

    pub fn classify(&self, r: TokRange) -> Expr {
        let r = self.strip_parens(r);
        if r.is_empty() {
            return Expr::Other;
        }
        let mut s = r.start;
        if self.is(s, "async")
            && s + 1 < r.end
            && (self.is(s + 1, "function")
                || self.find_at_level(TokRange::new(s + 1, r.end), "=>").is_some())
        {
            s += 1;
        }
        if self.is(s, "function") {
            return self
                .find_at_level(TokRange::new(s + 1, r.end), "(")
                .and_then(|params| {
                    self.find_at_level(TokRange::new(self.next(params), r.end), "{")
                })
                .map_or(Expr::Other, |body| Expr::Function { body });
        }
        if self.is(s, "class") {
            return self
                .find_at_level(TokRange::new(s + 1, r.end), "{")
                .map_or(Expr::Other, |body| Expr::Class { body });
        }
        if let Some(arrow) = self.find_at_level(TokRange::new(s, r.end), "=>") {
            let body = arrow + 1;
            if self.is(body, "{") && self.jump(body) == Some(r.end - 1) {
                return Expr::Function { body };
            }
            return Expr::Arrow {
                body: self.strip_parens(TokRange::new(body, r.end)),
            };
        }

        let r = self.strip_parens(self.strip_type_suffix(TokRange::new(s, r.end)));
        if r.is_empty() {
            return Expr::Other;
        }
        let s = r.start;
        let last = r.end - 1;
        if self.kind(s) == Some(TokenKind::JsxTagStart) && self.jump(s) == Some(last) {
            return Expr::Jsx { root: s };
        }
        if r.len() == 1 && self.kind(s) == Some(TokenKind::Ident) {
            return Expr::Ident(self.text(s).to_string());
        }
        if self.is(last, ")") {
            let mut k = s;
            while k < r.end {
                if self.jump(k) == Some(last) {
                    break;
                }
                k = self.next(k);
            }
            if k > s && k < last {
                return Expr::Call {
                    callee: TokRange::new(s, k),
                    args: self.split_commas(TokRange::new(k + 1, last)),
                };
            }
        }
        Expr::Other
    }

    /// Range of the last top-level `return` argument in a block body.
    pub fn last_return(&self, body: usize) -> Option<TokRange> {
        let close = self.jump(body)?;
        let mut found = None;
        for stmt in self.statements_in(body + 1, close) {
            if self.is(stmt.start, "return") {
                let mut end = stmt.end;
                if end > stmt.start + 1 && self.is(end - 1, ";") {
                    end -= 1;
                }
                found = Some(TokRange::new(stmt.start + 1, end));
            }
        }
        found.filter(|r| !r.is_empty())
    }

    /// The `render` member of a class body, as a function expression.
    pub fn class_render(&self, body: usize) -> Option<Expr> {
        let close = self.jump(body)?;
        let mut k = body + 1;
        while k < close {
            if self.kind(k) == Some(TokenKind::Ident) && self.text(k) == "render" {
                if self.is(k + 1, "(") {
                    let after = self.next(k + 1);
                    let block = self.find_at_level(TokRange::new(after, close), "{")?;
                    return Some(Expr::Function { body: block });
                }
                if self.is(k + 1, "=") || self.is(k + 1, ":") {
                    let eq = self.find_at_level(TokRange::new(k + 1, close), "=")?;
                    let end = self.expr_end(eq + 1, close, false);
                    return Some(self.classify(TokRange::new(eq + 1, end)));
                }
            }
            k = self.next(k);
        }
        None
    }

    /// Range of the value a component renders: the last top-level return
    /// of a function body, an arrow's expression body, or the same for a
    /// class's `render`.
    pub fn rendered_value(&self, expr: &Expr) -> Option<TokRange> {
        match expr {
            Expr::Function { body } => self.last_return(*body).map(|r| self.strip_parens(r)),
            Expr::Arrow { body } => Some(*body),
            Expr::Class { body } => match self.class_render(*body)? {
                render @ (Expr::Function { .. } | Expr::Arrow { .. }) => self.rendered_value(&render),
                _ => None,
            },
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
