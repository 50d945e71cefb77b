//! JSX element trees built from the token stream.

use super::{Module, TokRange, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsxElement {
    /// Tag name, `None` for fragments.
    pub name: Option<String>,
    /// Token index of the opening `<`.
    pub root: usize,
    pub start: usize,
    pub end: usize,
    /// Byte offset just past the opening tag's `>`.
    pub open_end: usize,
    /// Byte offset of the closing tag's `<`, `None` when self-closing.
    pub close_start: Option<usize>,
    pub children: Vec<JsxChild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsxChild {
    Element(JsxElement),
    Text {
        start: usize,
        end: usize,
    },
    /// `{ ... }` container, with any elements found inside it.
    Expr {
        start: usize,
        end: usize,
        nested: Vec<JsxElement>,
    },
}

impl JsxChild {
    pub fn span(&self) -> (usize, usize) {
        match self {
            Self::Element(el) => (el.start, el.end),
            Self::Text { start, end } | Self::Expr { start, end, .. } => (*start, *end),
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element(_))
    }

    /// Whitespace-only text.
    pub fn is_blank(&self, src: &str) -> bool {
        match self {
            Self::Text { start, end } => src[*start..*end].trim().is_empty(),
            _ => false,
        }
    }
}

/// A node visited by [`JsxElement::walk`], with the element directly
/// containing it (`None` when it sits inside an expression container or is
/// a root).
#[derive(Debug, Clone, Copy)]
pub enum JsxNode<'e> {
    Element {
        el: &'e JsxElement,
        parent: Option<&'e JsxElement>,
    },
    Text {
        start: usize,
        end: usize,
        parent: &'e JsxElement,
    },
}

impl JsxElement {
    pub fn is_self_closing(&self) -> bool {
        self.close_start.is_none()
    }

    /// Pre-order traversal over elements and text, in source order.
    pub fn walk<'e>(&'e self, parent: Option<&'e JsxElement>, f: &mut impl FnMut(JsxNode<'e>)) {
        f(JsxNode::Element { el: self, parent });
        for child in &self.children {
            match child {
                JsxChild::Element(el) => el.walk(Some(self), f),
                JsxChild::Text { start, end } => f(JsxNode::Text {
                    start: *start,
                    end: *end,
                    parent: self,
                }),
                JsxChild::Expr { nested, .. } => {
                    for el in nested {
                        el.walk(None, f);
                    }
                }
            }
        }
    }
}

impl Module<'_> {
    /// Element tree rooted at the JSX `<` token `root`.
    pub fn jsx_element(&self, root: usize) -> Option<JsxElement> {
        let last = self.jump(root)?;
        let mut k = root + 1;
        let mut name = String::new();
        if self.kind(k) == Some(TokenKind::JsxName) {
            name.push_str(self.text(k));
            k += 1;
            while (self.is(k, ".") || self.is(k, ":"))
                && self.kind(k + 1) == Some(TokenKind::JsxName)
            {
                name.push_str(self.text(k));
                name.push_str(self.text(k + 1));
                k += 2;
            }
        }
        // Skip attributes up to the end of the opening tag
        while k < last && !self.is(k, ">") {
            k = self.next(k);
        }
        let mut element = JsxElement {
            name: (!name.is_empty()).then_some(name),
            root,
            start: self.token(root).start,
            end: self.token(last).end,
            open_end: self.token(k).end,
            close_start: None,
            children: Vec::new(),
        };
        if k == last {
            return Some(element);
        }
        k += 1;
        while k < last {
            let tok = self.token(k);
            match tok.kind {
                TokenKind::JsxText => {
                    element.children.push(JsxChild::Text {
                        start: tok.start,
                        end: tok.end,
                    });
                    k += 1;
                }
                TokenKind::JsxTagStart if self.jump(k).is_some() => {
                    element
                        .children
                        .push(JsxChild::Element(self.jsx_element(k)?));
                    k = self.next(k);
                }
                TokenKind::JsxTagStart => {
                    element.close_start = Some(tok.start);
                    break;
                }
                _ if self.is(k, "{") => {
                    let close = self.jump(k)?;
                    element.children.push(JsxChild::Expr {
                        start: tok.start,
                        end: self.token(close).end,
                        nested: self.jsx_roots_in(TokRange::new(k + 1, close)),
                    });
                    k = close + 1;
                }
                _ => k += 1,
            }
        }
        Some(element)
    }

    /// Outermost elements within `r`, in source order.
    pub fn jsx_roots_in(&self, r: TokRange) -> Vec<JsxElement> {
        let mut out = Vec::new();
        let mut k = r.start;
        while k < r.end {
            if self.kind(k) == Some(TokenKind::JsxTagStart)
                && self.jump(k).is_some()
                && let Some(el) = self.jsx_element(k)
            {
                out.push(el);
                k = self.next(k);
            } else {
                k += 1;
            }
        }
        out
    }

    pub fn jsx_roots(&self) -> Vec<JsxElement> {
        self.jsx_roots_in(TokRange::new(0, self.len()))
    }
}
