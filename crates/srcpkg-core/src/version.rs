//! Version tag algebra.
//!
//! Package versions are git tag names. A tag is a semantic version with an
//! optional `v`/`V` prefix (`v1.2.3`, `1.2.3-beta.1+build.5`), or the sentinel
//! `development`, which tracks the latest commit of the default branch.
//!
//! Constraint expressions select the highest matching tag:
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `^1.2.0` | `>= 1.2.0` within major `1` |
//! | `~1.2.3` | `>= 1.2.3` within `1.2` (`~1.2` stays within major `1`) |
//! | `>=1.2`, `<=1.2` | bounded, never crossing the major of the reference |
//! | `>1.2`, `<1.2` | bounded, may cross majors |
//! | `1.2.*`, `1.2.x`, `*` | stable tags with the given numeric prefix |
//! | `@stable` | highest stable tag |
//! | `1.2.3`, `v1.2.3` | exactly that version |
//!
//! Alternatives are joined with `|` or `||`; terms inside one alternative are
//! separated by whitespace or `,` and must all hold.

use std::cmp::Ordering;
use std::fmt;

use semver::{BuildMetadata, Prerelease};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tag sentinel for "latest commit on the default branch".
pub const DEVELOPMENT: &str = "development";

fn strip_v(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

struct Parts<'a> {
    core: &'a str,
    pre: Option<&'a str>,
    build: Option<&'a str>,
}

fn split(tag: &str) -> Parts<'_> {
    let s = strip_v(tag);
    let (rest, build) = match s.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (s, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };
    Parts { core, pre, build }
}

fn compare_component(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn compare_core(a: &str, b: &str) -> Ordering {
    let a: Vec<&str> = a.split('.').collect();
    let b: Vec<&str> = b.split('.').collect();
    for i in 0..a.len().max(b.len()) {
        let ord = compare_component(
            a.get(i).copied().unwrap_or("0"),
            b.get(i).copied().unwrap_or("0"),
        );
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_pre(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        // A pre-release sorts below the release it precedes.
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (Prerelease::new(a), Prerelease::new(b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        },
    }
}

fn compare_build(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (BuildMetadata::new(a), BuildMetadata::new(b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        },
    }
}

/// Compare two version tags.
///
/// The `v` prefix is ignored, numeric components are compared left to right
/// (missing components count as `0`), then pre-release suffixes, then build
/// metadata.
///
/// ```
/// use srcpkg_core::version::compare;
/// use std::cmp::Ordering;
/// assert_eq!(compare("v1.0.0", "1.0.0"), Ordering::Equal);
/// assert_eq!(compare("1.0.0-rc.1", "1.0.0"), Ordering::Less);
/// ```
pub fn compare(a: &str, b: &str) -> Ordering {
    let (a, b) = (split(a), split(b));
    compare_core(a.core, b.core)
        .then_with(|| compare_pre(a.pre, b.pre))
        .then_with(|| compare_build(a.build, b.build))
}

/// Parse a tag into a [`semver::Version`], with or without `v` prefix.
pub fn parse_version(tag: &str) -> Option<semver::Version> {
    semver::Version::parse(strip_v(tag)).ok()
}

/// `MAJOR.MINOR.PATCH[-pre][+build]`, optionally prefixed with `v` or `V`.
pub fn is_valid_semantic(tag: &str) -> bool {
    tag == tag.trim() && parse_version(tag).is_some()
}

/// A valid semantic version without pre-release or build suffix.
pub fn is_stable(tag: &str) -> bool {
    tag == tag.trim() && parse_version(tag).is_some_and(|v| v.pre.is_empty() && v.build.is_empty())
}

/// The leading numeric component of a tag.
pub fn major(tag: &str) -> &str {
    let s = strip_v(tag);
    let end = s.find(['.', '-', '+']).unwrap_or(s.len());
    &s[..end]
}

/// True when moving between `a` and `b` crosses a major version boundary.
pub fn has_major_change(a: &str, b: &str) -> bool {
    major(a) != major(b)
}

fn has_numeric_core(s: &str) -> bool {
    let core = split(s).core;
    !core.is_empty()
        && core
            .split('.')
            .all(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Caret(String),
    Tilde(String),
    AtLeast(String),
    Greater(String),
    AtMost(String),
    Less(String),
    Stable,
    Wildcard(Vec<String>),
    Exact(String),
}

fn parse_wildcard(s: &str) -> Option<Term> {
    let mut prefix = Vec::new();
    let mut components = s.split('.');
    for component in components.by_ref() {
        if matches!(component, "*" | "x" | "X") {
            break;
        }
        if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        prefix.push(component.to_string());
    }
    // Nothing may follow the wildcard component.
    components.next().is_none().then_some(Term::Wildcard(prefix))
}

fn parse_term(token: &str) -> Option<Term> {
    let token = token.trim();
    if token.eq_ignore_ascii_case("@stable") {
        return Some(Term::Stable);
    }

    let operators: [(&str, fn(String) -> Term); 7] = [
        (">=", Term::AtLeast),
        ("<=", Term::AtMost),
        (">", Term::Greater),
        ("<", Term::Less),
        ("^", Term::Caret),
        ("~", Term::Tilde),
        ("=", Term::Exact),
    ];
    for (op, make) in operators {
        if let Some(reference) = token.strip_prefix(op) {
            let reference = reference.trim();
            return has_numeric_core(reference).then(|| make(reference.to_string()));
        }
    }

    let bare = strip_v(token);
    if bare.split('.').any(|c| matches!(c, "*" | "x" | "X")) {
        return parse_wildcard(bare);
    }
    has_numeric_core(token).then(|| Term::Exact(token.to_string()))
}

/// Split an alternative into terms, gluing a lone operator to the version after it.
fn tokenize(alternative: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending = String::new();
    for raw in alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        if raw.chars().all(|c| matches!(c, '^' | '~' | '>' | '<' | '=')) {
            pending.push_str(raw);
            continue;
        }
        tokens.push(format!("{}{}", std::mem::take(&mut pending), raw));
    }
    if !pending.is_empty() {
        tokens.push(pending);
    }
    tokens
}

fn parse_alternative(alternative: &str) -> Option<Vec<Term>> {
    let terms: Option<Vec<Term>> = tokenize(alternative).iter().map(|t| parse_term(t)).collect();
    terms.filter(|t| !t.is_empty())
}

/// Reference version an alternative is ordered by. `@stable` sorts last.
fn sort_key(terms: &[Term]) -> Option<String> {
    match terms.first()? {
        Term::Caret(r)
        | Term::Tilde(r)
        | Term::AtLeast(r)
        | Term::Greater(r)
        | Term::AtMost(r)
        | Term::Less(r)
        | Term::Exact(r) => Some(r.clone()),
        Term::Wildcard(prefix) if prefix.is_empty() => Some("0".to_string()),
        Term::Wildcard(prefix) => Some(prefix.join(".")),
        Term::Stable => None,
    }
}

fn core_components(tag: &str) -> Vec<&str> {
    split(tag).core.split('.').collect()
}

/// A pre-release tag only satisfies ranges whose reference is itself a pre-release.
fn admits_prerelease(tag: &str, reference: &str) -> bool {
    split(tag).pre.is_none() || split(reference).pre.is_some()
}

fn term_matches(term: &Term, tag: &str) -> bool {
    if !is_valid_semantic(tag) {
        return false;
    }
    match term {
        Term::Caret(r) | Term::AtLeast(r) => {
            admits_prerelease(tag, r)
                && compare(tag, r) != Ordering::Less
                && !has_major_change(tag, r)
        }
        Term::Tilde(r) => {
            let reference = core_components(r);
            let same_minor = reference.len() < 3
                || core_components(tag).get(1).copied().unwrap_or("0") == reference[1];
            admits_prerelease(tag, r)
                && compare(tag, r) != Ordering::Less
                && !has_major_change(tag, r)
                && same_minor
        }
        Term::AtMost(r) => {
            admits_prerelease(tag, r)
                && compare(tag, r) != Ordering::Greater
                && !has_major_change(tag, r)
        }
        Term::Greater(r) => admits_prerelease(tag, r) && compare(tag, r) == Ordering::Greater,
        Term::Less(r) => admits_prerelease(tag, r) && compare(tag, r) == Ordering::Less,
        Term::Stable => is_stable(tag),
        Term::Wildcard(prefix) => {
            let components = core_components(tag);
            is_stable(tag)
                && prefix
                    .iter()
                    .enumerate()
                    .all(|(i, p)| {
                        components
                            .get(i)
                            .is_some_and(|c| compare_component(c, p).is_eq())
                    })
        }
        Term::Exact(r) => compare(tag, r) == Ordering::Equal,
    }
}

/// Find the highest tag satisfying `constraint`.
///
/// Alternatives are tried from the highest reference version down; within an
/// alternative, tags are scanned newest first and the first match wins.
///
/// ```
/// use srcpkg_core::version::match_highest_version;
/// let tags = ["v2.1.0", "v2.0.0", "v1.5.0"].map(String::from);
/// assert_eq!(match_highest_version(&tags, "^2.0.0").as_deref(), Some("v2.1.0"));
/// assert_eq!(match_highest_version(&tags, "^3.0.0"), None);
/// ```
pub fn match_highest_version(tags: &[String], constraint: &str) -> Option<String> {
    let mut alternatives: Vec<Vec<Term>> = constraint
        .split('|')
        .filter(|alt| !alt.trim().is_empty())
        .filter_map(parse_alternative)
        .collect();
    alternatives.sort_by(|a, b| match (sort_key(a), sort_key(b)) {
        (Some(a), Some(b)) => compare(&b, &a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let mut sorted: Vec<&String> = tags.iter().collect();
    sorted.sort_by(|a, b| compare(b, a));

    alternatives.iter().find_map(|terms| {
        sorted
            .iter()
            .find(|tag| terms.iter().all(|term| term_matches(term, tag)))
            .map(|tag| (*tag).clone())
    })
}

/// A validated version tag: a semantic version or [`DEVELOPMENT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Tag {
    Release(String),
    Development,
}

impl Tag {
    pub fn parse(tag: &str) -> Result<Self> {
        if tag == DEVELOPMENT {
            Ok(Tag::Development)
        } else if is_valid_semantic(tag) {
            Ok(Tag::Release(tag.to_string()))
        } else {
            Err(Error::InvalidTag(tag.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Tag::Release(tag) => tag,
            Tag::Development => DEVELOPMENT,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Tag::Development)
    }

    /// Order two tags. `development` outranks every release.
    pub fn compare(&self, other: &Tag) -> Ordering {
        match (self, other) {
            (Tag::Development, Tag::Development) => Ordering::Equal,
            (Tag::Development, Tag::Release(_)) => Ordering::Greater,
            (Tag::Release(_), Tag::Development) => Ordering::Less,
            (Tag::Release(a), Tag::Release(b)) => compare(a, b),
        }
    }

    /// Major boundaries only exist between two releases.
    pub fn has_major_change(&self, other: &Tag) -> bool {
        match (self, other) {
            (Tag::Release(a), Tag::Release(b)) => has_major_change(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Tag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Tag::parse(&value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compare() {
        for tag in ["1.0.0", "v2.3.4", "1.0.0-alpha", "0.0.1+build", "development"] {
            assert_eq!(compare(tag, tag), Ordering::Equal);
        }
        assert_eq!(compare("v1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare("V1.0.0", "v1.0.0"), Ordering::Equal);
        assert_eq!(compare("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare("1.0.0-rc.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare("1.0.0-alpha", "1.0.0-beta"), Ordering::Less);
        assert_eq!(compare("1.0.0-alpha.2", "1.0.0-alpha.10"), Ordering::Less);
        assert_eq!(compare("1.0.0+b", "1.0.0"), Ordering::Greater);

        let pairs = [("1.0.0", "2.0.0"), ("1.0.0-rc.1", "1.0.0"), ("v0.9.9", "0.10.0")];
        for (a, b) in pairs {
            assert_eq!(compare(a, b), compare(b, a).reverse());
        }
    }

    #[test]
    fn test_is_valid_semantic() {
        assert!(is_valid_semantic("1.2.3"));
        assert!(is_valid_semantic("v1.2.3"));
        assert!(is_valid_semantic("V1.2.3-beta.1+build.7"));
        assert!(!is_valid_semantic("1.2"));
        assert!(!is_valid_semantic("1..3"));
        assert!(!is_valid_semantic(".1.2.3"));
        assert!(!is_valid_semantic("1.2.3."));
        assert!(!is_valid_semantic("1.2.3-"));
        assert!(!is_valid_semantic("vv1.2.3"));
        assert!(!is_valid_semantic("development"));
    }

    #[test]
    fn test_is_stable_and_major() {
        assert!(is_stable("v1.2.3"));
        assert!(!is_stable("1.2.3-rc.1"));
        assert!(!is_stable("1.2.3+meta"));
        assert!(!is_stable("1.2"));

        assert_eq!(major("v12.3.4"), "12");
        assert_eq!(major("3-beta"), "3");
        assert!(has_major_change("1.0.0", "2.0.0"));
        assert!(!has_major_change("1.0.0", "1.9.9"));
        assert!(!has_major_change("v1.0.0", "1.2.0"));
    }

    #[test]
    fn test_match_caret() {
        let available = tags(&["v2.1.0", "v2.0.0", "v1.5.0"]);
        assert_eq!(
            match_highest_version(&available, "^2.0.0").as_deref(),
            Some("v2.1.0")
        );
        assert_eq!(
            match_highest_version(&available, "^1.0.0").as_deref(),
            Some("v1.5.0")
        );
        assert_eq!(match_highest_version(&tags(&["v2.0.0"]), "^1.0.0"), None);
    }

    #[test]
    fn test_match_tilde() {
        let available = tags(&["1.2.0", "1.2.9", "1.3.0", "2.0.0"]);
        assert_eq!(
            match_highest_version(&available, "~1.2.3").as_deref(),
            Some("1.2.9")
        );
        assert_eq!(
            match_highest_version(&available, "~1.2").as_deref(),
            Some("1.3.0")
        );
    }

    #[test]
    fn test_match_bounds() {
        let available = tags(&["v1.0.0", "v1.4.0", "v2.0.0", "v3.1.0"]);
        assert_eq!(
            match_highest_version(&available, ">=1.1").as_deref(),
            Some("v1.4.0")
        );
        assert_eq!(
            match_highest_version(&available, ">1.1").as_deref(),
            Some("v3.1.0")
        );
        assert_eq!(
            match_highest_version(&available, "<3.0.0").as_deref(),
            Some("v2.0.0")
        );
        assert_eq!(
            match_highest_version(&available, "<=2.5.0").as_deref(),
            Some("v2.0.0")
        );
        assert_eq!(
            match_highest_version(&available, ">=1.0.0 <1.4.0").as_deref(),
            Some("v1.0.0")
        );
        assert_eq!(
            match_highest_version(&available, ">= 1.0, < 2.0").as_deref(),
            Some("v1.4.0")
        );
    }

    #[test]
    fn test_match_wildcard_stable_exact() {
        let available = tags(&["1.2.0", "1.2.7", "1.3.0", "1.4.0-rc.1"]);
        assert_eq!(
            match_highest_version(&available, "1.2.*").as_deref(),
            Some("1.2.7")
        );
        assert_eq!(
            match_highest_version(&available, "1.2.x").as_deref(),
            Some("1.2.7")
        );
        assert_eq!(match_highest_version(&available, "*").as_deref(), Some("1.3.0"));
        assert_eq!(
            match_highest_version(&available, "@stable").as_deref(),
            Some("1.3.0")
        );
        assert_eq!(
            match_highest_version(&available, "v1.2.0").as_deref(),
            Some("1.2.0")
        );
        assert_eq!(
            match_highest_version(&available, "1.4.0-rc.1").as_deref(),
            Some("1.4.0-rc.1")
        );
        assert_eq!(match_highest_version(&available, "9.9.9"), None);
    }

    #[test]
    fn test_match_prerelease_policy() {
        let available = tags(&["1.0.0", "1.1.0-beta.1"]);
        assert_eq!(
            match_highest_version(&available, "^1.0.0").as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            match_highest_version(&available, "^1.1.0-alpha").as_deref(),
            Some("1.1.0-beta.1")
        );
    }

    #[test]
    fn test_match_alternatives() {
        let available = tags(&["v1.9.0", "v2.3.0", "v3.0.0"]);
        assert_eq!(
            match_highest_version(&available, "^1.0 || ^2.0").as_deref(),
            Some("v2.3.0")
        );
        assert_eq!(
            match_highest_version(&available, "^2.0|^1.0").as_deref(),
            Some("v2.3.0")
        );
        assert_eq!(
            match_highest_version(&available, "^5.0 || ^1.2").as_deref(),
            Some("v1.9.0")
        );
        assert_eq!(match_highest_version(&available, "not-a-version"), None);
        assert_eq!(match_highest_version(&[], "^1.0"), None);
    }

    #[test]
    fn test_tag() {
        assert_eq!(Tag::parse("development").unwrap(), Tag::Development);
        assert_eq!(
            Tag::parse("v1.0.0").unwrap(),
            Tag::Release("v1.0.0".to_string())
        );
        assert!(matches!(Tag::parse("latest"), Err(Error::InvalidTag(_))));

        let dev = Tag::Development;
        let v1 = Tag::parse("v1.0.0").unwrap();
        let v2 = Tag::parse("2.0.0").unwrap();
        assert_eq!(dev.compare(&v2), Ordering::Greater);
        assert_eq!(v1.compare(&v2), Ordering::Less);
        assert!(v1.has_major_change(&v2));
        assert!(!dev.has_major_change(&v1));
    }
}
