/// Replacement of the byte range `start..end` with `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Edit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            text: text.into(),
        }
    }

    pub fn replace(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    pub fn delete(start: usize, end: usize) -> Self {
        Self::replace(start, end, "")
    }
}

/// Apply non-overlapping edits given in original-source offsets.
///
/// Inserts at the same offset keep the order they were given in, and land
/// before a replacement starting at that offset.
pub fn apply_edits(src: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.start, e.end));
    let extra: usize = edits.iter().map(|e| e.text.len()).sum();
    let mut out = String::with_capacity(src.len() + extra);
    let mut cursor = 0;
    for edit in edits {
        let start = edit.start.clamp(cursor, src.len());
        out.push_str(&src[cursor..start]);
        out.push_str(&edit.text);
        cursor = edit.end.clamp(start, src.len());
    }
    out.push_str(&src[cursor..]);
    out
}
