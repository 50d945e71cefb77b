//! npm-style semantic versions and version ranges.
//!
//! A range (`^1.2.0 || >=3 <4`, `1.2 - 2.x`, `~0.3`, ...) is desugared into a
//! set of version intervals. Two ranges are compatible when at least one
//! interval of each overlaps. Pre-release versions are ordered by semver
//! precedence and otherwise treated like any other point on the line.

use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("invalid version: {0}")]
    InvalidVersion(String),
    #[error("invalid comparator '{0}'")]
    InvalidComparator(String),
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// One dot-separated pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            (Self::Numeric(_), Self::Alpha(_)) => Ordering::Less,
            (Self::Alpha(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::Alpha(a), Self::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Alpha(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<Identifier>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: Vec::new(),
        }
    }

    /// `major.minor.patch-0`, the lowest version sharing that core.
    fn floor(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: vec![Identifier::Numeric(0)],
        }
    }

    /// Parse a full `x.y.z[-pre][+build]` version. A leading `v` or `=` is accepted.
    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let partial = Partial::parse(input)?;
        match (partial.major, partial.minor, partial.patch) {
            (Some(major), Some(minor), Some(patch)) => Ok(Self {
                major,
                minor,
                patch,
                pre: partial.pre,
            }),
            _ => Err(RangeError::InvalidVersion(input.to_string())),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            let pre: Vec<String> = self.pre.iter().map(ToString::to_string).collect();
            write!(f, "-{}", pre.join("."))?;
        }
        Ok(())
    }
}

/// A possibly incomplete version: `1`, `1.2`, `1.x`, `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Vec<Identifier>,
}

impl Partial {
    fn parse(input: &str) -> Result<Self, RangeError> {
        let trimmed = input.trim();
        let s = trimmed.trim_start_matches(['v', '=']);
        let s = s.split('+').next().unwrap_or_default();

        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (s, None),
        };

        let mut parts = [None, None, None];
        let mut wildcard = false;
        for (slot, raw) in core.split('.').enumerate() {
            if slot >= 3 {
                return Err(RangeError::InvalidVersion(input.to_string()));
            }
            if wildcard || raw.is_empty() || matches!(raw, "x" | "X" | "*") {
                wildcard = true;
                continue;
            }
            let n = raw
                .parse::<u64>()
                .map_err(|_| RangeError::InvalidVersion(input.to_string()))?;
            parts[slot] = Some(n);
        }

        let pre = match pre {
            Some(pre) if parts[2].is_some() => parse_pre(pre, input)?,
            Some(_) => return Err(RangeError::InvalidVersion(input.to_string())),
            None => Vec::new(),
        };

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            pre,
        })
    }

    fn full(&self) -> Option<Version> {
        Some(Version {
            major: self.major?,
            minor: self.minor?,
            patch: self.patch?,
            pre: self.pre.clone(),
        })
    }

    /// Missing components filled with zero.
    fn zeroed(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
        }
    }
}

fn parse_pre(pre: &str, input: &str) -> Result<Vec<Identifier>, RangeError> {
    pre.split('.')
        .map(|id| {
            if id.is_empty() {
                Err(RangeError::InvalidVersion(input.to_string()))
            } else if let Ok(n) = id.parse::<u64>() {
                Ok(Identifier::Numeric(n))
            } else {
                Ok(Identifier::Alpha(id.to_string()))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Intervals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

impl Bound {
    fn incl(version: Version) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    fn excl(version: Version) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }
}

/// A contiguous span of versions; `None` bounds are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Interval {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl Interval {
    fn nothing() -> Self {
        Self {
            lower: Some(Bound::excl(Version::new(0, 0, 0))),
            upper: Some(Bound::excl(Version::new(0, 0, 0))),
        }
    }

    fn raise_lower(&mut self, bound: Bound) {
        let replace = match &self.lower {
            None => true,
            Some(cur) => match bound.version.cmp(&cur.version) {
                Ordering::Greater => true,
                Ordering::Equal => !bound.inclusive,
                Ordering::Less => false,
            },
        };
        if replace {
            self.lower = Some(bound);
        }
    }

    fn drop_upper(&mut self, bound: Bound) {
        let replace = match &self.upper {
            None => true,
            Some(cur) => match bound.version.cmp(&cur.version) {
                Ordering::Less => true,
                Ordering::Equal => !bound.inclusive,
                Ordering::Greater => false,
            },
        };
        if replace {
            self.upper = Some(bound);
        }
    }

    fn intersect(&self, other: &Interval) -> Interval {
        let mut out = self.clone();
        if let Some(lower) = &other.lower {
            out.raise_lower(lower.clone());
        }
        if let Some(upper) = &other.upper {
            out.drop_upper(upper.clone());
        }
        out
    }

    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi)) => match lo.version.cmp(&hi.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(lo.inclusive && hi.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    fn contains(&self, version: &Version) -> bool {
        let above = match &self.lower {
            None => true,
            Some(b) if b.inclusive => version >= &b.version,
            Some(b) => version > &b.version,
        };
        let below = match &self.upper {
            None => true,
            Some(b) if b.inclusive => version <= &b.version,
            Some(b) => version < &b.version,
        };
        above && below
    }
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

lazy_static! {
    static ref HYPHEN: Regex = Regex::new(r"^(\S+)\s+-\s+(\S+)$").unwrap();
    static ref OP_GAP: Regex = Regex::new(r"(<=|>=|~>|<|>|=|\^|~)\s+").unwrap();
}

/// A parsed version range: the union of its intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    raw: String,
    set: Vec<Interval>,
}

impl Range {
    /// The range that accepts every version.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            set: vec![Interval::default()],
        }
    }

    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let mut set = Vec::new();
        for alternative in input.split("||") {
            let interval = parse_alternative(alternative.trim())?;
            if !interval.is_empty() {
                set.push(interval);
            }
        }
        Ok(Self {
            raw: input.trim().to_string(),
            set,
        })
    }

    /// Parse a dependency specifier as found in a `package.json`.
    ///
    /// Dist-tags (`latest`, `next`), git/URL/file/workspace specifiers and
    /// anything else that is not a semver range accept every version.
    pub fn from_specifier(spec: &str) -> Self {
        Self::parse(spec).unwrap_or_else(|_| Self {
            raw: spec.trim().to_string(),
            ..Self::any()
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn satisfies(&self, version: &Version) -> bool {
        self.set.iter().any(|i| i.contains(version))
    }

    /// Whether some version satisfies both ranges.
    pub fn intersects(&self, other: &Range) -> bool {
        self.set
            .iter()
            .any(|a| other.set.iter().any(|b| !a.intersect(b).is_empty()))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Convenience wrapper: do two `package.json` specifiers overlap?
pub fn intersects(a: &str, b: &str) -> bool {
    Range::from_specifier(a).intersects(&Range::from_specifier(b))
}

fn parse_alternative(input: &str) -> Result<Interval, RangeError> {
    let mut interval = Interval::default();
    if input.is_empty() {
        return Ok(interval);
    }

    if let Some(caps) = HYPHEN.captures(input) {
        apply(&mut interval, ">=", &Partial::parse(&caps[1])?);
        apply(&mut interval, "<=", &Partial::parse(&caps[2])?);
        return Ok(interval);
    }

    let normalized = OP_GAP.replace_all(input, "$1");
    for comparator in normalized.split_whitespace() {
        let (op, rest) = split_operator(comparator);
        if rest.is_empty() && !op.is_empty() {
            return Err(RangeError::InvalidComparator(comparator.to_string()));
        }
        let partial = Partial::parse(rest)
            .map_err(|_| RangeError::InvalidComparator(comparator.to_string()))?;
        apply(&mut interval, op, &partial);
    }
    Ok(interval)
}

fn split_operator(comparator: &str) -> (&str, &str) {
    for op in [">=", "<=", "~>", ">", "<", "=", "^", "~"] {
        if let Some(rest) = comparator.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", comparator)
}

/// Exclusive upper bound at `upper`; none when the bump overflowed.
fn cap(interval: &mut Interval, upper: Option<Version>) {
    if let Some(upper) = upper {
        interval.drop_upper(Bound::excl(upper));
    }
}

/// Narrow `interval` by one desugared comparator.
///
/// Bumps past `u64::MAX` leave the range open above.
fn apply(interval: &mut Interval, op: &str, p: &Partial) {
    let Some(major) = p.major else {
        // `*`-like operand: `<*` and `>*` match nothing, the rest match anything.
        if op == "<" || op == ">" {
            *interval = Interval::nothing();
        }
        return;
    };
    let next_major = || major.checked_add(1).map(|m| Version::floor(m, 0, 0));
    let next_minor =
        |minor: u64| minor.checked_add(1).map(|n| Version::floor(major, n, 0));

    match op {
        "^" => {
            interval.raise_lower(Bound::incl(p.zeroed()));
            let upper = match (major, p.minor, p.patch) {
                (m, _, _) if m > 0 => next_major(),
                (_, None, _) => Some(Version::floor(1, 0, 0)),
                (_, Some(minor), _) if minor > 0 => next_minor(minor),
                (_, Some(_), None) => Some(Version::floor(0, 1, 0)),
                (_, Some(_), Some(patch)) => {
                    patch.checked_add(1).map(|n| Version::floor(0, 0, n))
                }
            };
            cap(interval, upper);
        }
        "~" | "~>" => {
            interval.raise_lower(Bound::incl(p.zeroed()));
            let upper = match p.minor {
                None => next_major(),
                Some(minor) => next_minor(minor),
            };
            cap(interval, upper);
        }
        ">" => {
            let lower = match (p.minor, p.full()) {
                (_, Some(v)) => Some(Bound::excl(v)),
                (None, None) => major
                    .checked_add(1)
                    .map(|m| Bound::incl(Version::new(m, 0, 0))),
                (Some(minor), None) => minor
                    .checked_add(1)
                    .map(|n| Bound::incl(Version::new(major, n, 0))),
            };
            match lower {
                Some(bound) => interval.raise_lower(bound),
                None => *interval = Interval::nothing(),
            }
        }
        ">=" => interval.raise_lower(Bound::incl(p.zeroed())),
        "<" => match (p.minor, p.full()) {
            (_, Some(v)) => interval.drop_upper(Bound::excl(v)),
            (None, None) => interval.drop_upper(Bound::excl(Version::floor(major, 0, 0))),
            (Some(minor), None) => interval.drop_upper(Bound::excl(Version::floor(major, minor, 0))),
        },
        "<=" => match (p.minor, p.full()) {
            (_, Some(v)) => interval.drop_upper(Bound::incl(v)),
            (None, None) => cap(interval, next_major()),
            (Some(minor), None) => cap(interval, next_minor(minor)),
        },
        _ => match (p.minor, p.full()) {
            (_, Some(v)) => {
                interval.raise_lower(Bound::incl(v.clone()));
                interval.drop_upper(Bound::incl(v));
            }
            (None, None) => {
                interval.raise_lower(Bound::incl(Version::new(major, 0, 0)));
                cap(interval, next_major());
            }
            (Some(minor), None) => {
                interval.raise_lower(Bound::incl(Version::new(major, minor, 0)));
                cap(interval, next_minor(minor));
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
