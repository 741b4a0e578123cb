//! The link string grammar: `<kind><target><suffix>?`.
//!
//! A link names an upstream node (the `source` of the edge, in dataflow
//! terms: the node that produces a value) and records which parameter of
//! the node whose configuration held the string (the `target` of the edge:
//! the consumer) it should be bound to. `tree()` in `sluice-graph` walks
//! these edges; "upstream" means following `source` from a `target`.

use std::fmt::Display;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    combinator::{map, rest},
    sequence::{preceded, tuple},
    IResult,
};

/// `@` (by-value) or `&` (by-reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    ByValue,
    ByRef,
}

impl LinkKind {
    pub fn sigil(self) -> char {
        match self {
            LinkKind::ByValue => '@',
            LinkKind::ByRef => '&',
        }
    }
}

/// The trailing modifier on a link string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSuffix {
    /// No suffix: resolves to the target's plain value or reference.
    None,
    /// `/<path>`: a filesystem path under the source's work directory.
    Path(String),
    /// `/.`: the source's work directory joined with the *value* itself.
    SelfValuePath,
    /// `/.:<expr>`: the work directory joined with an expression result.
    SelfValuePathExpr(String),
    /// `:<expr>`: an expression evaluated over the source's value.
    Expr(String),
}

impl Display for LinkSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSuffix::None => Ok(()),
            LinkSuffix::Path(p) => write!(f, "/{p}"),
            LinkSuffix::SelfValuePath => write!(f, "/."),
            LinkSuffix::SelfValuePathExpr(e) => write!(f, "/.:{e}"),
            LinkSuffix::Expr(e) => write!(f, ":{e}"),
        }
    }
}

/// How a target was spelled, kept so canonical rendering can reproduce the
/// original locality (self / same-scope / cross-scope / cross-file) without
/// leaking process-specific paths when source and target share a flow file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpelling {
    /// `.` — refers back to the node's own value.
    SelfRef,
    /// `name` — same scope.
    Name(String),
    /// `scope.name` — another scope, same flow file.
    ScopeName { scope: String, name: String },
    /// `file#scope.name` — another flow file entirely.
    FileScopeName {
        file: String,
        scope: String,
        name: String,
    },
    /// `file#slug` — another flow file, addressed directly by slug.
    FileSlug { file: String, slug: String },
}

impl Display for TargetSpelling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSpelling::SelfRef => write!(f, "."),
            TargetSpelling::Name(n) => write!(f, "{n}"),
            TargetSpelling::ScopeName { scope, name } => write!(f, "{scope}.{name}"),
            TargetSpelling::FileScopeName { file, scope, name } => {
                write!(f, "{file}#{scope}.{name}")
            }
            TargetSpelling::FileSlug { file, slug } => write!(f, "{file}#{slug}"),
        }
    }
}

/// A directed reference from an upstream node (`source`) to a parameter of
/// a downstream node (`target`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Canonical id (`scope.name`, possibly file-qualified) of the upstream
    /// node that produces the value.
    pub source: String,
    /// Canonical id of the node whose configuration contained this link.
    pub target: String,
    /// Name of the parameter on `target` that receives this link.
    pub param: String,
    pub suffix: LinkSuffix,
    pub kind: LinkKind,
    /// How the source was spelled, for locality-preserving canonical display.
    pub spelling: TargetSpelling,
}

impl Link {
    /// True if the param name marks this as a metadata-only edge, skipped
    /// by `omit_internal` graph traversals.
    pub fn is_internal(&self) -> bool {
        self.param.starts_with('_')
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.kind.sigil(), self.spelling, self.suffix)
    }
}

/// Parses the body of a link string (after the leading `@`/`&` has been
/// consumed) into `(spelling, suffix)`.
fn parse_target(input: &str) -> IResult<&str, (TargetSpelling, LinkSuffix)> {
    let ident = |s| take_while1::<_, _, nom::error::Error<&str>>(|c: char| c != '/' && c != ':')(s);

    let (input, target) = ident(input)?;
    let (input, suffix) = parse_suffix(input)?;

    let spelling = if target == "." {
        TargetSpelling::SelfRef
    } else if let Some((file, rest)) = target.split_once('#') {
        if let Some((scope, name)) = rest.split_once('.') {
            TargetSpelling::FileScopeName {
                file: file.to_owned(),
                scope: scope.to_owned(),
                name: name.to_owned(),
            }
        } else {
            TargetSpelling::FileSlug {
                file: file.to_owned(),
                slug: rest.to_owned(),
            }
        }
    } else if let Some((scope, name)) = target.split_once('.') {
        TargetSpelling::ScopeName {
            scope: scope.to_owned(),
            name: name.to_owned(),
        }
    } else {
        TargetSpelling::Name(target.to_owned())
    };

    Ok((input, (spelling, suffix)))
}

fn parse_suffix(input: &str) -> IResult<&str, LinkSuffix> {
    if input.is_empty() {
        return Ok((input, LinkSuffix::None));
    }
    alt((
        map(tag("/."), |_| LinkSuffix::SelfValuePath),
        map(preceded(tag("/.:"), rest), |e: &str| {
            LinkSuffix::SelfValuePathExpr(e.to_owned())
        }),
        map(preceded(tag(":"), rest), |e: &str| {
            LinkSuffix::Expr(e.to_owned())
        }),
        map(preceded(tag("/"), rest), |p: &str| {
            LinkSuffix::Path(p.to_owned())
        }),
    ))(input)
}

fn parse_kind(input: &str) -> IResult<&str, LinkKind> {
    alt((
        map(tag("@"), |_| LinkKind::ByValue),
        map(tag("&"), |_| LinkKind::ByRef),
    ))(input)
}

/// The raw, unresolved shape of a link string: its kind, spelling and
/// suffix, before the spelling has been turned into a graph node id.
pub struct RawLink {
    pub kind: LinkKind,
    pub spelling: TargetSpelling,
    pub suffix: LinkSuffix,
}

/// Parses a full link string such as `@scope.name/path` or `&.`
///
/// Returns `Ok(None)` for strings that are not link syntax at all (most
/// plain strings), so callers can fall through to treating the value as a
/// plain string leaf. Returns `Err` when the string carries a live,
/// unescaped sigil (`@`/`&`) but fails the stricter target/suffix grammar
/// — a bare `@` or `@:expr` with an empty target — since that is almost
/// always a typo the author should see, not a literal string.
pub fn parse_link_string(s: &str) -> Result<Option<RawLink>, crate::error::EngineError> {
    // escapes: `@@`, `&&`, `$$` are literal, never links.
    if s.starts_with("@@") || s.starts_with("&&") || s.starts_with("$$") {
        return Ok(None);
    }
    let sigil = s.starts_with('@') || s.starts_with('&');
    match tuple((parse_kind, parse_target))(s) {
        Ok((_, (kind, (spelling, suffix)))) => Ok(Some(RawLink { kind, spelling, suffix })),
        Err(_) if sigil => Err(crate::error::EngineError::InvalidLink(s.to_string())),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        let raw = parse_link_string("@tokenize").unwrap().unwrap();
        assert_eq!(raw.kind, LinkKind::ByValue);
        assert_eq!(raw.spelling, TargetSpelling::Name("tokenize".into()));
        assert_eq!(raw.suffix, LinkSuffix::None);
    }

    #[test]
    fn parses_by_ref() {
        let raw = parse_link_string("&tokenize").unwrap().unwrap();
        assert_eq!(raw.kind, LinkKind::ByRef);
    }

    #[test]
    fn parses_scope_name() {
        let raw = parse_link_string("@scope.name").unwrap().unwrap();
        assert_eq!(
            raw.spelling,
            TargetSpelling::ScopeName {
                scope: "scope".into(),
                name: "name".into()
            }
        );
    }

    #[test]
    fn parses_file_scope_name() {
        let raw = parse_link_string("@other.json#scope.name").unwrap().unwrap();
        assert_eq!(
            raw.spelling,
            TargetSpelling::FileScopeName {
                file: "other.json".into(),
                scope: "scope".into(),
                name: "name".into()
            }
        );
    }

    #[test]
    fn parses_self_ref() {
        let raw = parse_link_string("@.").unwrap().unwrap();
        assert_eq!(raw.spelling, TargetSpelling::SelfRef);
    }

    #[test]
    fn parses_path_suffix() {
        let raw = parse_link_string("@src/some/path").unwrap().unwrap();
        assert_eq!(raw.suffix, LinkSuffix::Path("some/path".into()));
    }

    #[test]
    fn parses_self_value_path() {
        let raw = parse_link_string("@src/.").unwrap().unwrap();
        assert_eq!(raw.suffix, LinkSuffix::SelfValuePath);
    }

    #[test]
    fn parses_self_value_path_expr() {
        let raw = parse_link_string("@src/.:upper(input)").unwrap().unwrap();
        assert_eq!(raw.suffix, LinkSuffix::SelfValuePathExpr("upper(input)".into()));
    }

    #[test]
    fn parses_expr_suffix() {
        let raw = parse_link_string("@src:upper(input)").unwrap().unwrap();
        assert_eq!(raw.suffix, LinkSuffix::Expr("upper(input)".into()));
    }

    #[test]
    fn escapes_are_not_links() {
        assert!(parse_link_string("@@literal").unwrap().is_none());
        assert!(parse_link_string("&&literal").unwrap().is_none());
        assert!(parse_link_string("$$literal").unwrap().is_none());
    }

    #[test]
    fn non_link_string_returns_none() {
        assert!(parse_link_string("plain string").unwrap().is_none());
    }

    #[test]
    fn lone_sigil_is_an_error_not_a_literal() {
        assert!(parse_link_string("@").is_err());
    }

    #[test]
    fn sigil_with_empty_target_before_expr_is_an_error() {
        assert!(parse_link_string("@:expr").is_err());
    }
}
