//! Pluggable matching of update edge sources against version ids
//!
//! An update edge's `from` field is either an exact id or a range
//! expression. The matcher decides which catalogue versions an edge
//! starts from: `EqualityMatcher` for exact ids, `SemverMatcher` for
//! range expressions like `1.5.*` or `~1.5.x`.

use semver::{Version, VersionReq};

use crate::error::VersionError;

/// Decides whether an update edge source expression matches a version.
pub trait Matcher: Send + Sync {
    /// True iff `expr` matches the version id `id`.
    fn matches(&self, expr: &str, id: &str) -> Result<bool, VersionError>;
}

/// Matches only on exact id equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualityMatcher;

impl Matcher for EqualityMatcher {
    fn matches(&self, expr: &str, id: &str) -> Result<bool, VersionError> {
        Ok(expr == id)
    }
}

/// Matches `expr` as a semantic version range against `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemverMatcher;

impl Matcher for SemverMatcher {
    fn matches(&self, expr: &str, id: &str) -> Result<bool, VersionError> {
        let req = parse_range(expr)?;
        let version = parse_version(id)?;
        Ok(req.matches(&version))
    }
}

/// Parses a version id, reporting the offending expression on failure.
pub fn parse_version(id: &str) -> Result<Version, VersionError> {
    Version::parse(id).map_err(|e| VersionError::InvalidExpression {
        expr: id.to_string(),
        reason: e.to_string(),
    })
}

/// Parses a range expression, normalizing the `x` wildcard spelling
/// (`~1.5.x`, `1.5.X`) that the update lists use into the `*` form the
/// semver crate understands. An operator prefix in front of a wildcard
/// is dropped since the wildcard already spans the same versions. A
/// bare version id like `1.5.3` means exactly that version, so it is
/// pinned with `=` before parsing; the semver crate would otherwise
/// read it as the caret range `^1.5.3`.
pub fn parse_range(expr: &str) -> Result<VersionReq, VersionError> {
    let normalized = normalize_range(expr);
    VersionReq::parse(&normalized).map_err(|e| VersionError::InvalidExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

fn normalize_range(expr: &str) -> String {
    let trimmed = expr.trim();
    let has_wildcard = trimmed
        .split(['.', ',', ' '])
        .any(|part| matches!(part, "x" | "X" | "*"));
    if !has_wildcard {
        if Version::parse(trimmed).is_ok() {
            return format!("={trimmed}");
        }
        return trimmed.to_string();
    }
    trimmed
        .trim_start_matches(['~', '^', '=', '>', '<'])
        .split('.')
        .map(|part| if matches!(part, "x" | "X") { "*" } else { part })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_matcher_is_exact() {
        let m = EqualityMatcher;
        assert!(m.matches("1.5.2", "1.5.2").unwrap());
        assert!(!m.matches("1.5.*", "1.5.2").unwrap());
    }

    #[test]
    fn semver_matcher_accepts_star_wildcards() {
        let m = SemverMatcher;
        assert!(m.matches("1.5.*", "1.5.2").unwrap());
        assert!(m.matches("1.5.*", "1.5.9").unwrap());
        assert!(!m.matches("1.5.*", "1.6.0").unwrap());
    }

    #[test]
    fn semver_matcher_accepts_x_wildcards() {
        let m = SemverMatcher;
        assert!(m.matches("~1.5.x", "1.5.2").unwrap());
        assert!(m.matches("1.5.x", "1.5.4").unwrap());
        assert!(!m.matches("~1.5.x", "1.6.0").unwrap());
    }

    #[test]
    fn semver_matcher_accepts_tilde_ranges() {
        let m = SemverMatcher;
        assert!(m.matches("~1.5.1", "1.5.3").unwrap());
        assert!(!m.matches("~1.5.1", "1.6.0").unwrap());
    }

    #[test]
    fn bare_version_expression_is_exact() {
        let m = SemverMatcher;
        assert!(m.matches("1.5.3", "1.5.3").unwrap());
        assert!(!m.matches("1.5.3", "1.5.4").unwrap());
        assert!(!m.matches("1.5.3", "1.6.0").unwrap());
    }

    #[test]
    fn invalid_expressions_error() {
        let m = SemverMatcher;
        assert!(m.matches("not-a-version", "1.5.2").is_err());
        assert!(m.matches("1.5.*", "not-a-version").is_err());
    }
}
