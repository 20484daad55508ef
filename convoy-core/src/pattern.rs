//! Canonical path-pattern matcher for reservations.
//!
//! Every place that compares lease patterns goes through [`patterns_overlap`]:
//! the grant decision, the read-only conflict check and the active-lease
//! query. Keeping a single implementation is what makes grant-time and
//! query-time answers agree.
//!
//! # Pattern language
//!
//! - Paths are `/`-separated and project-relative. A leading `/` is ignored,
//!   `.` segments and empty segments are dropped, `..` pops the previous
//!   segment (and may not escape the root).
//! - `*` matches any run of characters inside one segment, `?` matches one
//!   character.
//! - A segment that is exactly `**` matches zero or more whole segments.
//! - A trailing `/` claims the whole subtree: `src/` is `src/**`.
//!
//! Two patterns overlap iff at least one concrete path matches both.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

const DEEP: &str = "**";

/// Longest raw pattern accepted, in bytes.
pub const MAX_PATTERN_LEN: usize = 4096;
/// Most segments a normalized pattern may have.
pub const MAX_SEGMENTS: usize = 32;
/// Longest single segment, in bytes.
pub const MAX_SEGMENT_LEN: usize = 255;

/// A normalized, validated reservation pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathPattern {
    segments: Vec<String>,
}

impl PathPattern {
    /// Parse and normalize a pattern.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidPattern` for empty input, a pattern
    /// whose `..` segments climb above the project root, or one longer than
    /// [`MAX_PATTERN_LEN`], [`MAX_SEGMENTS`] or [`MAX_SEGMENT_LEN`] allow.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if trimmed.len() > MAX_PATTERN_LEN {
            return Err(invalid(&format!(
                "pattern is longer than {MAX_PATTERN_LEN} bytes"
            )));
        }

        let unified = trimmed.replace('\\', "/");
        let subtree = unified.ends_with('/');

        let mut segments: Vec<String> = Vec::new();
        for part in unified.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(invalid("escapes the project root"));
                    }
                }
                other => {
                    if other.len() > MAX_SEGMENT_LEN {
                        return Err(invalid(&format!(
                            "segment is longer than {MAX_SEGMENT_LEN} bytes"
                        )));
                    }
                    // Adjacent `**` segments are equivalent to one.
                    if other == DEEP && segments.last().map(String::as_str) == Some(DEEP) {
                        continue;
                    }
                    segments.push(other.to_string());
                }
            }
        }

        if subtree && segments.last().map(String::as_str) != Some(DEEP) {
            segments.push(DEEP.to_string());
        }
        if segments.is_empty() {
            return Err(invalid("pattern names no path"));
        }
        if segments.len() > MAX_SEGMENTS {
            return Err(invalid(&format!(
                "pattern has more than {MAX_SEGMENTS} segments"
            )));
        }

        Ok(Self { segments })
    }

    /// Normalized segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether the pattern contains any wildcard.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| !s.contains('*') && !s.contains('?'))
    }

    /// Whether this pattern and `other` can both match some concrete path.
    pub fn overlaps(&self, other: &PathPattern) -> bool {
        glob_overlap(
            &self.segments,
            &other.segments,
            |s: &String| s == DEEP,
            |s: &String| s == DEEP,
            |a: &String, b: &String| segment_overlap(a, b),
        )
    }

    /// Whether a concrete path (wildcard characters taken literally) matches.
    pub fn matches(&self, path: &str) -> bool {
        let concrete: Vec<&str> = path
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        glob_overlap(
            &self.segments,
            &concrete,
            |s: &String| s == DEEP,
            |_: &&str| false,
            |pattern: &String, segment: &&str| segment_matches(pattern, segment),
        )
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl TryFrom<String> for PathPattern {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PathPattern::parse(&value)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.to_string()
    }
}

/// Overlap test on raw pattern strings.
///
/// Patterns that fail to parse overlap nothing; callers validate before
/// granting, so this only matters for historical data.
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    match (PathPattern::parse(a), PathPattern::parse(b)) {
        (Ok(a), Ok(b)) => a.overlaps(&b),
        _ => false,
    }
}

fn segment_overlap(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    glob_overlap(
        &a,
        &b,
        |c: &char| *c == '*',
        |c: &char| *c == '*',
        |x: &char, y: &char| *x == '?' || *y == '?' || x == y,
    )
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = segment.chars().collect();
    glob_overlap(
        &p,
        &s,
        |c: &char| *c == '*',
        |_: &char| false,
        |x: &char, y: &char| *x == '?' || x == y,
    )
}

/// Decide whether two star-patterns share a word.
///
/// `dp[i][j]` answers the question for the suffixes `a[i..]` and `b[j..]`.
/// A star either matches nothing (advance past it) or swallows the next
/// token of the other side (stay put, advance the other side). Non-star
/// tokens must be pairwise compatible.
fn glob_overlap<A, B>(
    a: &[A],
    b: &[B],
    a_star: impl Fn(&A) -> bool,
    b_star: impl Fn(&B) -> bool,
    compatible: impl Fn(&A, &B) -> bool,
) -> bool {
    let (la, lb) = (a.len(), b.len());
    let width = lb + 1;
    let mut dp = vec![false; (la + 1) * width];
    dp[la * width + lb] = true;

    for i in (0..=la).rev() {
        for j in (0..=lb).rev() {
            if i == la && j == lb {
                continue;
            }
            let value = if i < la && a_star(&a[i]) {
                dp[(i + 1) * width + j] || (j < lb && dp[i * width + j + 1])
            } else if j < lb && b_star(&b[j]) {
                dp[i * width + j + 1] || (i < la && dp[(i + 1) * width + j])
            } else if i == la || j == lb {
                false
            } else {
                compatible(&a[i], &b[j]) && dp[(i + 1) * width + j + 1]
            };
            dp[i * width + j] = value;
        }
    }

    dp[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> PathPattern {
        PathPattern::parse(raw).unwrap()
    }

    #[test]
    fn test_normalization() {
        assert_eq!(p("./src//auth.ts").to_string(), "src/auth.ts");
        assert_eq!(p("/src/auth.ts").to_string(), "src/auth.ts");
        assert_eq!(p("src/lib/../auth.ts").to_string(), "src/auth.ts");
        assert_eq!(p("src/").to_string(), "src/**");
        assert_eq!(p("src/**/**/x").to_string(), "src/**/x");
        assert_eq!(p("src\\win\\path.rs").to_string(), "src/win/path.rs");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("").is_err());
        assert!(PathPattern::parse("   ").is_err());
        assert!(PathPattern::parse("../outside").is_err());
        assert!(PathPattern::parse("./").is_ok());
        assert!(PathPattern::parse(".").is_err());
    }

    #[test]
    fn test_size_limits() {
        let long_segment = "a".repeat(MAX_SEGMENT_LEN + 1);
        assert!(matches!(
            PathPattern::parse(&long_segment),
            Err(ValidationError::InvalidPattern { .. })
        ));
        assert!(PathPattern::parse(&"a".repeat(MAX_SEGMENT_LEN)).is_ok());

        let too_long = format!("{}/{}", "b".repeat(200), "*".repeat(MAX_PATTERN_LEN));
        assert!(matches!(
            PathPattern::parse(&too_long),
            Err(ValidationError::InvalidPattern { .. })
        ));

        let deep = vec!["d"; MAX_SEGMENTS + 1].join("/");
        assert!(PathPattern::parse(&deep).is_err());
        assert!(PathPattern::parse(&vec!["d"; MAX_SEGMENTS].join("/")).is_ok());

        // `..` is resolved before the segment count is checked.
        let climbing = format!("{}/{}", vec!["d"; MAX_SEGMENTS].join("/"), "x/..");
        assert!(PathPattern::parse(&climbing).is_ok());
    }

    #[test]
    fn test_exact_paths() {
        assert!(patterns_overlap("src/auth.ts", "src/auth.ts"));
        assert!(patterns_overlap("src/auth.ts", "./src/auth.ts"));
        assert!(!patterns_overlap("src/auth.ts", "src/auth.tsx"));
        assert!(!patterns_overlap("src/auth", "src/auth/login.ts"));
    }

    #[test]
    fn test_subtree_claims() {
        assert!(patterns_overlap("src/", "src/auth.ts"));
        assert!(patterns_overlap("src/", "src/deep/nested/file.rs"));
        assert!(patterns_overlap("src/**", "src/"));
        assert!(!patterns_overlap("src/", "docs/readme.md"));
        assert!(!patterns_overlap("src/", "srcx/file.rs"));
    }

    #[test]
    fn test_single_segment_wildcards() {
        assert!(patterns_overlap("src/*.ts", "src/auth.ts"));
        assert!(!patterns_overlap("src/*.ts", "src/auth/login.ts"));
        assert!(patterns_overlap("src/a?th.ts", "src/auth.ts"));
        assert!(patterns_overlap("src/*.ts", "src/auth*"));
        assert!(!patterns_overlap("src/*.ts", "src/*.rs"));
    }

    #[test]
    fn test_deep_wildcards() {
        assert!(patterns_overlap("**/*.rs", "crates/core/src/lib.rs"));
        assert!(patterns_overlap("**", "anything/at/all"));
        assert!(patterns_overlap("a/**/z", "a/z"));
        assert!(patterns_overlap("a/**/z", "a/**/y/z"));
        assert!(!patterns_overlap("a/**/z", "b/**"));
    }

    #[test]
    fn test_concrete_match() {
        let pattern = p("src/**/*.rs");
        assert!(pattern.matches("src/lib.rs"));
        assert!(pattern.matches("src/a/b/c.rs"));
        assert!(!pattern.matches("src/a/b/c.ts"));
        assert!(!pattern.matches("lib.rs"));
        // Wildcard characters in a concrete path are literal.
        assert!(!p("src/a.rs").matches("src/*.rs"));
    }

    #[test]
    fn test_serde_normalizes() -> Result<(), serde_json::Error> {
        let pattern: PathPattern = serde_json::from_str("\"./src//x.rs\"")?;
        assert_eq!(serde_json::to_string(&pattern)?, "\"src/x.rs\"");
        Ok(())
    }
}
