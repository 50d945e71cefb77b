//! JS / TS / JSX tokenizer.
//!
//! Produces a flat token list with byte spans into the source. Besides the
//! tokens it records, for every opening bracket and every JSX element, the
//! index of the token that closes it, plus the innermost bracket enclosing
//! each token. That is enough structure to walk statements, expressions and
//! element trees without building a full AST.

use super::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifiers and keywords.
    Ident,
    Punct,
    Str,
    Template,
    Number,
    Regex,
    /// `<` opening or closing a JSX tag.
    JsxTagStart,
    /// Tag or attribute name inside a JSX tag.
    JsxName,
    JsxText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// A line break separates this token from the previous one.
    pub nl_before: bool,
}

#[derive(Debug)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    /// For `(`, `[`, `{` and element-starting `<`: index of the closing token.
    pub jump: Vec<Option<usize>>,
    /// Innermost open bracket enclosing each token.
    pub parent: Vec<Option<usize>>,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Js { braces: usize },
    JsxTag { closing: bool, self_closing: bool },
    JsxChildren,
}

const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Keywords after which `/` starts a regex and `<` may start JSX.
const EXPR_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await", "default",
];

const JSX_AFTER_PUNCT: &[&str] = &[
    "(", ",", "=", ":", "?", "[", "{", "=>", "&&", "||", "??", "!", "||=", "&&=", "??=",
];

pub fn tokenize(src: &str) -> Result<Lexed, SyntaxError> {
    let mut lexer = Lexer {
        src,
        bytes: src.as_bytes(),
        pos: 0,
        nl: false,
        tokens: Vec::new(),
        jump: Vec::new(),
        parent: Vec::new(),
        modes: vec![Mode::Js { braces: 0 }],
        brackets: Vec::new(),
        elements: Vec::new(),
    };
    lexer.run()?;
    Ok(Lexed {
        tokens: lexer.tokens,
        jump: lexer.jump,
        parent: lexer.parent,
    })
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    nl: bool,
    tokens: Vec<Token>,
    jump: Vec<Option<usize>>,
    parent: Vec<Option<usize>>,
    modes: Vec<Mode>,
    /// Token indices of unclosed brackets.
    brackets: Vec<usize>,
    /// Token indices of unclosed JSX elements.
    elements: Vec<usize>,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$' || c == '#'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl<'a> Lexer<'a> {
    fn run(&mut self) -> Result<(), SyntaxError> {
        loop {
            let mode = *self.modes.last().ok_or(SyntaxError::UnexpectedEof)?;
            if let Mode::JsxChildren = mode {
                if self.pos >= self.bytes.len() {
                    return Err(SyntaxError::UnexpectedEof);
                }
                self.lex_jsx_children()?;
                continue;
            }
            self.skip_trivia()?;
            if self.pos >= self.bytes.len() {
                break;
            }
            match mode {
                Mode::Js { .. } => self.lex_js()?,
                Mode::JsxTag { .. } => self.lex_jsx_tag()?,
                Mode::JsxChildren => {}
            }
        }
        if self.modes.len() != 1 || !self.elements.is_empty() {
            return Err(SyntaxError::UnexpectedEof);
        }
        if let Some(&open) = self.brackets.last() {
            return Err(SyntaxError::Unbalanced(self.tokens[open].start));
        }
        Ok(())
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) -> usize {
        let idx = self.tokens.len();
        self.tokens.push(Token {
            kind,
            start,
            end,
            nl_before: std::mem::take(&mut self.nl),
        });
        self.jump.push(None);
        self.parent.push(self.brackets.last().copied());
        idx
    }

    fn prev(&self) -> Option<(TokenKind, &'a str)> {
        self.tokens
            .last()
            .map(|t| (t.kind, &self.src[t.start..t.end]))
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        while let Some(c) = self.peek() {
            if c == '\n' {
                self.nl = true;
                self.pos += 1;
            } else if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if self.src[self.pos..].starts_with("//") {
                match self.src[self.pos..].find('\n') {
                    Some(n) => self.pos += n,
                    None => self.pos = self.bytes.len(),
                }
            } else if self.src[self.pos..].starts_with("/*") {
                let Some(n) = self.src[self.pos + 2..].find("*/") else {
                    return Err(SyntaxError::Unterminated("comment", self.pos));
                };
                if self.src[self.pos..self.pos + 2 + n].contains('\n') {
                    self.nl = true;
                }
                self.pos += n + 4;
            } else {
                break;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // JS
    // -----------------------------------------------------------------------

    fn lex_js(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(());
        };
        match c {
            '\'' | '"' => self.lex_string(c),
            '`' => {
                let end = self.scan_template(self.pos)?;
                self.pos = end;
                self.push(TokenKind::Template, start, end);
                Ok(())
            }
            '0'..='9' => {
                self.lex_number();
                Ok(())
            }
            '.' if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => {
                self.lex_number();
                Ok(())
            }
            '/' if self.regex_allowed() => self.lex_regex(),
            '<' if self.jsx_allowed() => {
                self.pos += 1;
                let idx = self.push(TokenKind::JsxTagStart, start, self.pos);
                self.elements.push(idx);
                self.modes.push(Mode::JsxTag {
                    closing: false,
                    self_closing: false,
                });
                Ok(())
            }
            '(' | '[' | '{' => {
                self.pos += 1;
                let idx = self.push(TokenKind::Punct, start, self.pos);
                self.brackets.push(idx);
                if c == '{'
                    && let Some(Mode::Js { braces }) = self.modes.last_mut()
                {
                    *braces += 1;
                }
                Ok(())
            }
            ')' | ']' | '}' => {
                self.pos += 1;
                let idx = self.push(TokenKind::Punct, start, self.pos);
                self.close_bracket(idx, c)?;
                if c == '}' {
                    let nested = self.modes.len() > 1;
                    if let Some(Mode::Js { braces }) = self.modes.last_mut() {
                        if *braces == 0 && nested {
                            // End of a JSX expression container
                            self.modes.pop();
                        } else {
                            *braces = braces.saturating_sub(1);
                        }
                    }
                }
                Ok(())
            }
            c if is_ident_start(c) => {
                self.lex_ident(false);
                Ok(())
            }
            _ => {
                let rest = &self.src[self.pos..];
                let len = PUNCTUATORS
                    .iter()
                    .find(|p| rest.starts_with(*p))
                    .map(|p| p.len())
                    .unwrap_or(c.len_utf8());
                self.pos += len;
                self.push(TokenKind::Punct, start, self.pos);
                Ok(())
            }
        }
    }

    fn close_bracket(&mut self, idx: usize, close: char) -> Result<(), SyntaxError> {
        let Some(open) = self.brackets.pop() else {
            return Err(SyntaxError::Unbalanced(self.tokens[idx].start));
        };
        let open_tok = self.tokens[open];
        let expected = match &self.src[open_tok.start..open_tok.end] {
            "(" => ')',
            "[" => ']',
            _ => '}',
        };
        if expected != close {
            return Err(SyntaxError::Unbalanced(self.tokens[idx].start));
        }
        // The closer belongs to the bracket's own level.
        self.parent[idx] = self.brackets.last().copied();
        self.jump[open] = Some(idx);
        Ok(())
    }

    fn regex_allowed(&self) -> bool {
        match self.prev() {
            None => true,
            Some((TokenKind::Punct, p)) => !matches!(p, ")" | "]" | "}"),
            Some((TokenKind::Ident, word)) => EXPR_KEYWORDS.contains(&word),
            Some((TokenKind::JsxTagStart, _)) => true,
            _ => false,
        }
    }

    fn jsx_allowed(&self) -> bool {
        let next_ok = self
            .src
            .get(self.pos + 1..)
            .and_then(|s| s.chars().next())
            .is_some_and(|c| c == '>' || is_ident_start(c));
        if !next_ok {
            return false;
        }
        match self.prev() {
            None => true,
            Some((TokenKind::Punct, p)) => JSX_AFTER_PUNCT.contains(&p),
            Some((TokenKind::Ident, word)) => EXPR_KEYWORDS.contains(&word),
            _ => false,
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<(), SyntaxError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            if c == '\\' {
                if let Some(next) = self.peek() {
                    self.pos += next.len_utf8();
                }
            } else if c == quote {
                self.push(TokenKind::Str, start, self.pos);
                return Ok(());
            } else if c == '\n' && !matches!(self.modes.last(), Some(Mode::JsxTag { .. })) {
                break;
            }
        }
        Err(SyntaxError::Unterminated("string", start))
    }

    /// Returns the offset just past the closing backtick.
    fn scan_template(&self, start: usize) -> Result<usize, SyntaxError> {
        let mut pos = start + 1;
        while pos < self.bytes.len() {
            match self.bytes[pos] {
                b'\\' => pos += 2,
                b'`' => return Ok(pos + 1),
                b'$' if self.bytes.get(pos + 1) == Some(&b'{') => {
                    pos = self.scan_substitution(pos + 2)?;
                }
                _ => pos += 1,
            }
        }
        Err(SyntaxError::Unterminated("template", start))
    }

    /// Skips a `${ ... }` body; returns the offset past its `}`.
    fn scan_substitution(&self, mut pos: usize) -> Result<usize, SyntaxError> {
        let start = pos;
        let mut depth = 0usize;
        while pos < self.bytes.len() {
            match self.bytes[pos] {
                b'{' => depth += 1,
                b'}' if depth == 0 => return Ok(pos + 1),
                b'}' => depth -= 1,
                b'`' => {
                    pos = self.scan_template(pos)?;
                    continue;
                }
                q @ (b'\'' | b'"') => {
                    pos += 1;
                    while pos < self.bytes.len() && self.bytes[pos] != q {
                        if self.bytes[pos] == b'\\' {
                            pos += 1;
                        }
                        pos += 1;
                    }
                }
                _ => {}
            }
            pos += 1;
        }
        Err(SyntaxError::Unterminated("template", start))
    }

    fn lex_number(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '+' || c == '-')
                && matches!(self.bytes.get(self.pos.wrapping_sub(1)), Some(b'e' | b'E'))
                && !self.src[start..self.pos].starts_with("0x");
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.push(TokenKind::Number, start, self.pos);
    }

    fn lex_regex(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        loop {
            let Some(c) = self.peek() else {
                return Err(SyntaxError::Unterminated("regex", start));
            };
            self.pos += c.len_utf8();
            match c {
                '\\' => {
                    if let Some(next) = self.peek() {
                        self.pos += next.len_utf8();
                    }
                }
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => break,
                '\n' => return Err(SyntaxError::Unterminated("regex", start)),
                _ => {}
            }
        }
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        self.push(TokenKind::Regex, start, self.pos);
        Ok(())
    }

    fn lex_ident(&mut self, jsx: bool) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_char(c) || (jsx && c == '-') || (self.pos == start && c == '#') {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let kind = if jsx { TokenKind::JsxName } else { TokenKind::Ident };
        self.push(kind, start, self.pos);
    }

    // -----------------------------------------------------------------------
    // JSX
    // -----------------------------------------------------------------------

    fn lex_jsx_tag(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(());
        };
        match c {
            '>' => {
                self.pos += 1;
                let idx = self.push(TokenKind::Punct, start, self.pos);
                let Some(Mode::JsxTag {
                    closing,
                    self_closing,
                }) = self.modes.pop()
                else {
                    return Err(SyntaxError::UnexpectedChar('>', start));
                };
                if closing {
                    // Leave the children of the element being closed
                    self.modes.pop();
                    self.finish_element(idx, start)?;
                } else if self_closing {
                    self.finish_element(idx, start)?;
                } else {
                    self.modes.push(Mode::JsxChildren);
                }
                Ok(())
            }
            '/' => {
                self.pos += 1;
                self.push(TokenKind::Punct, start, self.pos);
                if let Some(Mode::JsxTag { self_closing, .. }) = self.modes.last_mut() {
                    *self_closing = true;
                }
                Ok(())
            }
            '{' => {
                self.pos += 1;
                let idx = self.push(TokenKind::Punct, start, self.pos);
                self.brackets.push(idx);
                self.modes.push(Mode::Js { braces: 0 });
                Ok(())
            }
            '\'' | '"' => self.lex_string(c),
            '=' | '.' | ':' => {
                self.pos += 1;
                self.push(TokenKind::Punct, start, self.pos);
                Ok(())
            }
            c if is_ident_start(c) => {
                self.lex_ident(true);
                Ok(())
            }
            other => Err(SyntaxError::UnexpectedChar(other, start)),
        }
    }

    fn finish_element(&mut self, close_idx: usize, offset: usize) -> Result<(), SyntaxError> {
        let Some(open) = self.elements.pop() else {
            return Err(SyntaxError::Unbalanced(offset));
        };
        self.jump[open] = Some(close_idx);
        Ok(())
    }

    fn lex_jsx_children(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        match self.bytes[self.pos] {
            b'<' => {
                self.pos += 1;
                let idx = self.push(TokenKind::JsxTagStart, start, self.pos);
                self.skip_trivia()?;
                if self.peek() == Some('/') {
                    let slash = self.pos;
                    self.pos += 1;
                    self.push(TokenKind::Punct, slash, self.pos);
                    self.modes.push(Mode::JsxTag {
                        closing: true,
                        self_closing: false,
                    });
                } else {
                    self.elements.push(idx);
                    self.modes.push(Mode::JsxTag {
                        closing: false,
                        self_closing: false,
                    });
                }
            }
            b'{' => {
                self.pos += 1;
                let idx = self.push(TokenKind::Punct, start, self.pos);
                self.brackets.push(idx);
                self.modes.push(Mode::Js { braces: 0 });
            }
            _ => {
                let len = self.src[self.pos..]
                    .find(['<', '{'])
                    .unwrap_or(self.bytes.len() - self.pos);
                self.pos += len;
                self.nl = false;
                self.push(TokenKind::JsxText, start, self.pos);
            }
        }
        Ok(())
    }
}
