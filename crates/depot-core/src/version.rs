//! Version parsing, comparison, ranges, and constraints.
//!
//! The repository version scheme uses a custom ordering that differs from
//! semver:
//! - Segments are split on `.` and `-`
//! - Numeric segments compare as numbers
//! - String qualifiers have a special ordering:
//!   `alpha` < `beta` < `milestone` < `rc` < `snapshot` < `""` (release) < `sp`
//! - SNAPSHOT versions sort before their release equivalent

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A parsed version with comparable segments.
#[derive(Debug, Clone)]
pub struct Version {
    original: String,
    segments: Vec<Segment>,
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Equal versions (1.0 == 1.0.0) must hash alike: hash the segments
        // with trailing zero/release padding stripped.
        let mut end = self.segments.len();
        while end > 0 && matches!(
            self.segments[end - 1],
            Segment::Numeric(0) | Segment::Qualifier(QualifierKind::Release)
        ) {
            end -= 1;
        }
        self.segments[..end].hash(state);
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
enum Segment {
    Numeric(u64),
    Qualifier(QualifierKind),
    Text(String),
}

/// Well-known qualifiers with defined ordering.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
enum QualifierKind {
    Alpha,
    Beta,
    Milestone,
    Rc,
    Snapshot,
    Release,
    Sp,
}

impl Version {
    pub fn parse(version: &str) -> Self {
        let segments = parse_segments(version);
        Self {
            original: version.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn is_snapshot(&self) -> bool {
        crate::artifact::is_snapshot_version(&self.original)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let max_len = self.segments.len().max(other.segments.len());
        for i in 0..max_len {
            let a = self.segments.get(i);
            let b = other.segments.get(i);
            let ord = compare_segments(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_segments(a: Option<&Segment>, b: Option<&Segment>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(s), None) => compare_segment_to_empty(s),
        (None, Some(s)) => compare_segment_to_empty(s).reverse(),
        (Some(a), Some(b)) => compare_two_segments(a, b),
    }
}

fn compare_segment_to_empty(seg: &Segment) -> Ordering {
    match seg {
        Segment::Numeric(0) => Ordering::Equal,
        Segment::Numeric(_) => Ordering::Greater,
        Segment::Qualifier(q) => q.cmp(&QualifierKind::Release),
        Segment::Text(s) if s.is_empty() => Ordering::Equal,
        Segment::Text(_) => Ordering::Less,
    }
}

fn compare_two_segments(a: &Segment, b: &Segment) -> Ordering {
    match (a, b) {
        (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
        (Segment::Qualifier(a), Segment::Qualifier(b)) => a.cmp(b),
        (Segment::Numeric(_), Segment::Qualifier(_)) => Ordering::Greater,
        (Segment::Qualifier(_), Segment::Numeric(_)) => Ordering::Less,
        (Segment::Numeric(_), Segment::Text(_)) => Ordering::Greater,
        (Segment::Text(_), Segment::Numeric(_)) => Ordering::Less,
        (Segment::Text(a), Segment::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Segment::Qualifier(q), Segment::Text(_)) => {
            if *q >= QualifierKind::Release {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Segment::Text(_), Segment::Qualifier(q)) => {
            if *q >= QualifierKind::Release {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

fn parse_segments(version: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();

    for ch in version.chars() {
        if ch == '.' || ch == '-' {
            if !current.is_empty() {
                segments.push(classify(&current));
                current.clear();
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        segments.push(classify(&current));
    }

    segments
}

fn classify(token: &str) -> Segment {
    if let Ok(n) = token.parse::<u64>() {
        return Segment::Numeric(n);
    }
    match token.to_lowercase().as_str() {
        "alpha" | "a" => Segment::Qualifier(QualifierKind::Alpha),
        "beta" | "b" => Segment::Qualifier(QualifierKind::Beta),
        "milestone" | "m" => Segment::Qualifier(QualifierKind::Milestone),
        "rc" | "cr" => Segment::Qualifier(QualifierKind::Rc),
        "snapshot" => Segment::Qualifier(QualifierKind::Snapshot),
        "" | "ga" | "final" | "release" => Segment::Qualifier(QualifierKind::Release),
        "sp" => Segment::Qualifier(QualifierKind::Sp),
        _ => Segment::Text(token.to_string()),
    }
}

/// A version range expression.
///
/// Supports `[1.0,2.0)`, `[1.0,]`, `(,2.0)`, and `[1.0]` (exact).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

impl VersionRange {
    /// Parse a version range string.
    ///
    /// Returns `None` for bare versions (not a range).
    pub fn parse(spec: &str) -> Option<Self> {
        let s = spec.trim();
        if !s.starts_with('[') && !s.starts_with('(') {
            return None;
        }
        if s.len() < 2 || (!s.ends_with(']') && !s.ends_with(')')) {
            return None;
        }

        let open_inclusive = s.starts_with('[');
        let close_inclusive = s.ends_with(']');
        let inner = &s[1..s.len() - 1];

        if let Some((lower, upper)) = inner.split_once(',') {
            let lower = lower.trim();
            let upper = upper.trim();
            Some(VersionRange {
                lower: if lower.is_empty() {
                    None
                } else {
                    Some(Bound {
                        version: Version::parse(lower),
                        inclusive: open_inclusive,
                    })
                },
                upper: if upper.is_empty() {
                    None
                } else {
                    Some(Bound {
                        version: Version::parse(upper),
                        inclusive: close_inclusive,
                    })
                },
            })
        } else {
            // Exact version: [1.0] means exactly 1.0
            let v = Version::parse(inner.trim());
            Some(VersionRange {
                lower: Some(Bound {
                    version: v.clone(),
                    inclusive: true,
                }),
                upper: Some(Bound {
                    version: v,
                    inclusive: true,
                }),
            })
        }
    }

    /// Check if a version satisfies this range.
    pub fn contains(&self, version: &Version) -> bool {
        if let Some(ref lower) = self.lower {
            let cmp = version.cmp(&lower.version);
            if lower.inclusive {
                if cmp == Ordering::Less {
                    return false;
                }
            } else if cmp != Ordering::Greater {
                return false;
            }
        }
        if let Some(ref upper) = self.upper {
            let cmp = version.cmp(&upper.version);
            if upper.inclusive {
                if cmp == Ordering::Greater {
                    return false;
                }
            } else if cmp != Ordering::Less {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Some(b) if b.inclusive => write!(f, "[{}", b.version)?,
            Some(b) => write!(f, "({}", b.version)?,
            None => write!(f, "(")?,
        }
        write!(f, ",")?;
        match &self.upper {
            Some(b) if b.inclusive => write!(f, "{}]", b.version),
            Some(b) => write!(f, "{})", b.version),
            None => write!(f, ")"),
        }
    }
}

/// Either a hard range or a soft preferred version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionConstraint {
    Range(VersionRange),
    Soft(Version),
}

impl VersionConstraint {
    /// Parse a version specification into a constraint.
    pub fn parse(spec: &str) -> Self {
        match VersionRange::parse(spec) {
            Some(range) => VersionConstraint::Range(range),
            None => VersionConstraint::Soft(Version::parse(spec)),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, VersionConstraint::Range(_))
    }

    pub fn contains(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Range(range) => range.contains(version),
            VersionConstraint::Soft(_) => true,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Range(range) => range.fmt(f),
            VersionConstraint::Soft(version) => version.fmt(f),
        }
    }
}
