//! Requirement expressions and version constraints.
//!
//! Registries describe dependencies with expressions such as
//! `chardet (<4,>=3.0.2)` or `idna>=2.5; python_version >= "3"`. This module
//! splits such an expression into a package name and a [`Constraint`] that can
//! be matched against published release versions.

use crate::resolve::ResolveError;
use semver::{BuildMetadata, Comparator, Op, Prerelease, Version, VersionReq};
use std::fmt;

/// The constraint text meaning "any version".
pub const ANY: &str = "*";

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Any published version; the registry's latest artifact is used.
    Any,
    /// A version range that releases are matched against.
    Range(VersionRange),
}

/// A set of comparators plus explicit exclusions (`!=` clauses).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    req: VersionReq,
    excluded: Vec<Version>,
}

impl VersionRange {
    /// Check whether a version falls inside the range.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version) && !self.excluded.iter().any(|e| same_release(e, version))
    }
}

fn same_release(a: &Version, b: &Version) -> bool {
    a.major == b.major && a.minor == b.minor && a.patch == b.patch && a.pre == b.pre
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "{ANY}"),
            Self::Range(range) => {
                write!(f, "{}", range.req)?;
                for excluded in &range.excluded {
                    write!(f, ", !={excluded}")?;
                }
                Ok(())
            }
        }
    }
}

impl Constraint {
    /// Parse a constraint expression.
    ///
    /// `*`, `any` and the empty string mean [`Constraint::Any`]. Otherwise the
    /// text is a comma-separated list of clauses using `==`, `!=`, `>=`, `<=`,
    /// `>`, `<`, `~=`, `=`, `^` or `~`. A bare version is a caret requirement.
    pub fn parse(text: &str) -> Result<Self, ResolveError> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == ANY || trimmed.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }

        let invalid = |reason: String| ResolveError::InvalidRequirement {
            expression: text.to_string(),
            reason,
        };

        let mut comparators = Vec::new();
        let mut excluded = Vec::new();

        for clause in trimmed.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (op, version_text) = split_operator(clause);
            match op {
                "!=" => {
                    // `!=1.2.*` cannot be expressed as a single exclusion; ignore it
                    if !version_text.ends_with(".*") {
                        let version = parse_release_version(version_text)
                            .ok_or_else(|| invalid(format!("invalid version '{version_text}'")))?;
                        excluded.push(version);
                    }
                }
                "~=" => {
                    let version = parse_release_version(version_text)
                        .ok_or_else(|| invalid(format!("invalid version '{version_text}'")))?;
                    comparators.push(comparator(Op::GreaterEq, &version));
                    comparators.push(compatible_upper_bound(version_text, &version));
                }
                "==" | "=" | "===" if version_text.ends_with(".*") => {
                    comparators.push(wildcard(version_text).ok_or_else(|| {
                        invalid(format!("invalid wildcard '{version_text}'"))
                    })?);
                }
                _ => {
                    let op = match op {
                        "==" | "=" | "===" => Op::Exact,
                        ">=" => Op::GreaterEq,
                        "<=" => Op::LessEq,
                        ">" => Op::Greater,
                        "<" => Op::Less,
                        "~" => Op::Tilde,
                        "^" | "" => Op::Caret,
                        other => return Err(invalid(format!("unknown operator '{other}'"))),
                    };
                    let version = parse_release_version(version_text)
                        .ok_or_else(|| invalid(format!("invalid version '{version_text}'")))?;
                    comparators.push(comparator(op, &version));
                }
            }
        }

        if comparators.is_empty() && excluded.is_empty() {
            return Err(invalid("no version clauses".to_string()));
        }

        Ok(Self::Range(VersionRange {
            req: VersionReq { comparators },
            excluded,
        }))
    }

    /// Returns true if this is the "any version" constraint.
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Check a release version string against the constraint.
    ///
    /// Release strings that cannot be parsed never match a range.
    #[must_use]
    pub fn matches_release(&self, release: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Range(range) => parse_release_version(release).is_some_and(|v| range.matches(&v)),
        }
    }
}

fn split_operator(clause: &str) -> (&str, &str) {
    const OPERATORS: [&str; 10] = ["===", "==", "!=", ">=", "<=", "~=", ">", "<", "=", "^"];
    for op in OPERATORS {
        if let Some(rest) = clause.strip_prefix(op) {
            return (op, rest.trim());
        }
    }
    if let Some(rest) = clause.strip_prefix('~') {
        return ("~", rest.trim());
    }
    ("", clause)
}

fn comparator(op: Op, version: &Version) -> Comparator {
    Comparator {
        op,
        major: version.major,
        minor: Some(version.minor),
        patch: Some(version.patch),
        pre: version.pre.clone(),
    }
}

/// Upper bound for `~=X.Y` (`<X+1`) and `~=X.Y.Z` (`<X.Y+1`).
fn compatible_upper_bound(text: &str, version: &Version) -> Comparator {
    let components = text.split('.').take_while(|c| c.chars().all(|ch| ch.is_ascii_digit())).count();
    let (major, minor) = if components >= 3 {
        (version.major, version.minor + 1)
    } else {
        (version.major + 1, 0)
    };
    Comparator {
        op: Op::Less,
        major,
        minor: Some(minor),
        patch: Some(0),
        pre: Prerelease::EMPTY,
    }
}

fn wildcard(text: &str) -> Option<Comparator> {
    let prefix = text.strip_suffix(".*")?;
    let mut parts = prefix.split('.').map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = match parts.next() {
        Some(part) => Some(part.ok()?),
        None => None,
    };
    Some(Comparator {
        op: Op::Exact,
        major,
        minor,
        patch: None,
        pre: Prerelease::EMPTY,
    })
}

/// Leniently parse a published release version.
///
/// Missing minor/patch components are zero-filled and a fourth component is
/// dropped. A `post` suffix becomes build metadata; any other suffix (`rc1`,
/// `b2`, `.dev0`) marks a pre-release.
#[must_use]
pub fn parse_release_version(text: &str) -> Option<Version> {
    let text = text.trim();
    let text = text.strip_prefix('v').unwrap_or(text);

    let numeric_len = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map_or(text.len(), |(i, _)| i);
    let (numeric, suffix) = text.split_at(numeric_len);
    let numeric = numeric.trim_end_matches('.');

    let mut parts = numeric.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;

    let mut version = Version::new(major, minor, patch);

    let suffix: String = suffix
        .trim_start_matches(['.', '-', '_'])
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    if !suffix.is_empty() {
        if suffix.starts_with("post") {
            version.build = BuildMetadata::new(&suffix).ok()?;
        } else {
            version.pre = Prerelease::new(&suffix).ok()?;
        }
    }

    Some(version)
}

/// A requirement expression split into name and constraint text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementExpr {
    /// Package name.
    pub name: String,
    /// Constraint text, `*` when the expression names no versions.
    pub constraint: String,
    /// The marker limits the requirement to an optional extra
    /// (`; extra == "socks"`).
    pub optional_extra: bool,
}

impl RequirementExpr {
    /// Split a registry requirement expression.
    ///
    /// Extras in `[...]` are dropped and parentheses around the version
    /// clauses are removed. Environment markers after `;` are not evaluated;
    /// only an `extra` test in them is recorded.
    pub fn parse(expression: &str) -> Result<Self, ResolveError> {
        let (without_marker, marker) = expression.split_once(';').unwrap_or((expression, ""));
        let without_marker = without_marker.trim();
        let optional_extra = marker
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| word == "extra");

        let name_len = without_marker
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
            .map_or(without_marker.len(), |(i, _)| i);
        let (name, mut rest) = without_marker.split_at(name_len);

        if name.is_empty() {
            return Err(ResolveError::InvalidRequirement {
                expression: expression.to_string(),
                reason: "missing package name".to_string(),
            });
        }

        rest = rest.trim_start();
        if rest.starts_with('[') {
            rest = rest.find(']').map_or("", |end| &rest[end + 1..]).trim_start();
        }
        let rest = rest
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim();

        Ok(Self {
            name: name.to_string(),
            constraint: if rest.is_empty() {
                ANY.to_string()
            } else {
                rest.to_string()
            },
            optional_extra,
        })
    }
}
