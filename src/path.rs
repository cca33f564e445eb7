//! Path expressions and their resolution against a compiled program tree.
//!
//! Every navigation request names its destination with a path expression.
//! Expressions come in several addressing modes:
//!
//! - **Absolute**: `//list/all` walks from the program root.
//! - **Branch-rooted**: `/draft` walks from the nearest root-marked
//!   ancestor (or self) of the base state; `/` alone names that root.
//! - **Relative**: `complete` performs a nearest-scope name search from the
//!   base state outward, then walks remaining segments as direct children.
//! - **Parent**: `..` steps to the parent of the current position.
//! - **Alias**: `@start` names a state carrying that alias marker.
//! - **Self**: `@self` names the base state itself.
//! - **Program root**: `@program` (or `//` alone) names the tree root.
//! - **Terminate**: `@null` names the terminate pseudo-target; navigating
//!   there destroys the instance.
//!
//! Expressions are parsed once per call site (and once at compile time for
//! shorthand directives) into [`PathExpr`] and reused.

use miette::Diagnostic;
use thiserror::Error;

use crate::tree::{NodeId, Program};

/// A parsed path expression.
///
/// Parsing is independent of any program; resolution binds the expression to
/// a concrete state (or the terminate pseudo-target) relative to a base
/// state.
///
/// # Examples
///
/// ```
/// use trellis::path::PathExpr;
///
/// let abs = PathExpr::parse("//list/all").unwrap();
/// let rel = PathExpr::parse("complete").unwrap();
/// let term = PathExpr::parse("@null").unwrap();
/// assert!(matches!(term, PathExpr::Terminate));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathExpr {
    /// The terminate pseudo-target (`@null`).
    Terminate,
    /// The base state itself (`@self`).
    SelfState,
    /// The program root (`@program` or a bare `//`).
    ProgramRoot,
    /// A user-declared alias (`@name`).
    Alias(String),
    /// A segment walk from an anchor.
    Walk { anchor: Anchor, segs: Vec<Seg> },
}

/// Where a segment walk starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// From the program root (`//a/b`).
    Absolute,
    /// From the nearest root-marked ancestor-or-self of the base (`/a`).
    BranchRoot,
    /// From the base state, with nearest-scope search for the first name.
    Relative,
}

/// One walk segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seg {
    /// `..` — step to the parent.
    Up,
    /// A state name.
    Name(String),
}

/// The result of resolving a path expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// A concrete state in the program tree.
    Node(NodeId),
    /// The terminate pseudo-target.
    Terminate,
}

/// Errors produced while parsing or resolving a path expression.
///
/// Resolution errors abort a transition request before any hook runs; the
/// instance stays at its prior stable state.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ResolutionError {
    /// The expression was empty or all whitespace.
    #[error("empty path expression")]
    #[diagnostic(code(trellis::path::empty))]
    Empty,

    /// A segment contained reserved characters or was malformed.
    #[error("invalid segment `{segment}` in path expression `{expr}`")]
    #[diagnostic(
        code(trellis::path::invalid_segment),
        help("segments are state names or `..`; `@` tokens only stand alone")
    )]
    InvalidSegment { expr: String, segment: String },

    /// A name in the walk does not resolve to any state.
    #[error("`{name}` does not name a state reachable from `{from}`")]
    #[diagnostic(
        code(trellis::path::undefined),
        help("check the program specification for the state name and its position")
    )]
    Undefined { name: String, from: String },

    /// An `@alias` token that no state declares.
    #[error("unknown alias `@{alias}`")]
    #[diagnostic(code(trellis::path::unknown_alias))]
    UnknownAlias { alias: String },

    /// A `..` walk stepped above the program root.
    #[error("path expression walks above the program root")]
    #[diagnostic(code(trellis::path::above_root))]
    AboveRoot,
}

impl PathExpr {
    /// Parse a raw path expression.
    ///
    /// Parsing validates shape only; name existence is checked at
    /// resolution time.
    pub fn parse(raw: &str) -> Result<PathExpr, ResolutionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolutionError::Empty);
        }

        if let Some(token) = raw.strip_prefix('@') {
            return match token {
                "null" => Ok(PathExpr::Terminate),
                "self" => Ok(PathExpr::SelfState),
                "program" => Ok(PathExpr::ProgramRoot),
                "" => Err(ResolutionError::InvalidSegment {
                    expr: raw.to_string(),
                    segment: "@".to_string(),
                }),
                name if is_valid_name(name) => Ok(PathExpr::Alias(name.to_string())),
                other => Err(ResolutionError::InvalidSegment {
                    expr: raw.to_string(),
                    segment: format!("@{other}"),
                }),
            };
        }

        let (anchor, rest) = if let Some(rest) = raw.strip_prefix("//") {
            (Anchor::Absolute, rest)
        } else if let Some(rest) = raw.strip_prefix('/') {
            (Anchor::BranchRoot, rest)
        } else {
            (Anchor::Relative, raw)
        };

        let mut segs = Vec::new();
        for piece in rest.split('/') {
            match piece {
                // Trailing (or doubled) slashes are tolerated, matching the
                // original program notation `//list/all/`.
                "" => continue,
                ".." => segs.push(Seg::Up),
                name if is_valid_name(name) => segs.push(Seg::Name(name.to_string())),
                bad => {
                    return Err(ResolutionError::InvalidSegment {
                        expr: raw.to_string(),
                        segment: bad.to_string(),
                    });
                }
            }
        }

        if segs.is_empty() {
            return match anchor {
                Anchor::Absolute => Ok(PathExpr::ProgramRoot),
                Anchor::BranchRoot => Ok(PathExpr::Walk {
                    anchor,
                    segs: Vec::new(),
                }),
                Anchor::Relative => Err(ResolutionError::Empty),
            };
        }

        Ok(PathExpr::Walk { anchor, segs })
    }
}

/// True when `name` may appear as a state name or alias.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '@', '|', '.'])
        && !name.chars().any(char::is_whitespace)
}

/// Resolve `expr` against `base` within `program`.
///
/// `base` is the state the expression is read from: the current leaf for
/// live requests, or the state a directive/callback was declared on.
pub(crate) fn resolve(
    program: &Program,
    base: NodeId,
    expr: &PathExpr,
) -> Result<ResolvedTarget, ResolutionError> {
    match expr {
        PathExpr::Terminate => Ok(ResolvedTarget::Terminate),
        PathExpr::SelfState => Ok(ResolvedTarget::Node(base)),
        PathExpr::ProgramRoot => Ok(ResolvedTarget::Node(program.root())),
        PathExpr::Alias(name) => program
            .alias(name)
            .map(ResolvedTarget::Node)
            .ok_or_else(|| ResolutionError::UnknownAlias {
                alias: name.clone(),
            }),
        PathExpr::Walk { anchor, segs } => {
            let start = match anchor {
                Anchor::Absolute => program.root(),
                Anchor::BranchRoot => program.branch_root_of(base),
                Anchor::Relative => base,
            };
            walk(program, base, start, *anchor, segs).map(ResolvedTarget::Node)
        }
    }
}

fn walk(
    program: &Program,
    base: NodeId,
    start: NodeId,
    anchor: Anchor,
    segs: &[Seg],
) -> Result<NodeId, ResolutionError> {
    let mut cur = start;
    for (i, seg) in segs.iter().enumerate() {
        match seg {
            Seg::Up => {
                cur = program
                    .node(cur)
                    .parent
                    .ok_or(ResolutionError::AboveRoot)?;
            }
            Seg::Name(name) => {
                if i == 0 && anchor == Anchor::Relative {
                    // A leading name in a relative walk is looked up by
                    // nearest enclosing scope: the base state's subtree
                    // first, then each ancestor's subtree outward.
                    cur = scoped_find(program, base, name).ok_or_else(|| {
                        ResolutionError::Undefined {
                            name: name.clone(),
                            from: program.node(base).name.clone(),
                        }
                    })?;
                } else {
                    cur = program.node(cur).child(name).ok_or_else(|| {
                        ResolutionError::Undefined {
                            name: name.clone(),
                            from: program.node(cur).name.clone(),
                        }
                    })?;
                }
            }
        }
    }
    Ok(cur)
}

/// Nearest-scope search: try the subtree rooted at each ancestor-or-self of
/// `base`, innermost first, and return the first preorder match.
fn scoped_find(program: &Program, base: NodeId, name: &str) -> Option<NodeId> {
    let mut scope = Some(base);
    while let Some(s) = scope {
        if let Some(found) = preorder_find(program, s, name) {
            return Some(found);
        }
        scope = program.node(s).parent;
    }
    None
}

fn preorder_find(program: &Program, root: NodeId, name: &str) -> Option<NodeId> {
    if program.node(root).name == name {
        return Some(root);
    }
    for &child in &program.node(root).children {
        if let Some(found) = preorder_find(program, child, name) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tokens() {
        assert_eq!(PathExpr::parse("@null").unwrap(), PathExpr::Terminate);
        assert_eq!(PathExpr::parse("@self").unwrap(), PathExpr::SelfState);
        assert_eq!(PathExpr::parse("@program").unwrap(), PathExpr::ProgramRoot);
        assert_eq!(PathExpr::parse("//").unwrap(), PathExpr::ProgramRoot);
        assert_eq!(
            PathExpr::parse("@start").unwrap(),
            PathExpr::Alias("start".into())
        );
    }

    #[test]
    fn parses_walks() {
        match PathExpr::parse("//list/all/").unwrap() {
            PathExpr::Walk { anchor, segs } => {
                assert_eq!(anchor, Anchor::Absolute);
                assert_eq!(
                    segs,
                    vec![Seg::Name("list".into()), Seg::Name("all".into())]
                );
            }
            other => panic!("expected walk, got {other:?}"),
        }
        match PathExpr::parse("../update").unwrap() {
            PathExpr::Walk { anchor, segs } => {
                assert_eq!(anchor, Anchor::Relative);
                assert_eq!(segs, vec![Seg::Up, Seg::Name("update".into())]);
            }
            other => panic!("expected walk, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(
            PathExpr::parse(""),
            Err(ResolutionError::Empty)
        ));
        assert!(matches!(
            PathExpr::parse("   "),
            Err(ResolutionError::Empty)
        ));
        assert!(matches!(
            PathExpr::parse("@"),
            Err(ResolutionError::InvalidSegment { .. })
        ));
        assert!(matches!(
            PathExpr::parse("a/b@c"),
            Err(ResolutionError::InvalidSegment { .. })
        ));
        assert!(matches!(
            PathExpr::parse("a|b"),
            Err(ResolutionError::InvalidSegment { .. })
        ));
    }
}
