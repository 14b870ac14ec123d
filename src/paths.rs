use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Optional URI scheme accepted in front of a path.
pub const SCHEME: &str = "lakefs://";

// ---------------------------------------------------------------------------
// ResourcePath
// ---------------------------------------------------------------------------

/// A parsed `repository/ref/resource` address.
///
/// Parsing is purely syntactic: no network call is made, and the ref is kept
/// verbatim (including relative modifiers) so it can be resolved later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    pub repository: String,
    pub reference: String,
    pub resource: String,
}

impl ResourcePath {
    /// The parsed ref expression of this path.
    pub fn ref_expr(&self) -> Result<RefExpr> {
        self.reference.parse()
    }

    /// The normalized resource (no leading/trailing slashes).
    pub fn normalized_resource(&self) -> Result<String> {
        normalize_path(&self.resource)
    }

    /// `repository/ref`, the prefix every qualified name of this ref shares.
    pub fn ref_root(&self) -> String {
        format!("{}/{}", self.repository, self.reference)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.repository, self.reference, self.resource)
    }
}

impl FromStr for ResourcePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

/// Parse a `[lakefs://]repository/ref[/resource]` address.
///
/// * repository: lowercase alphanumerics and hyphens, 3–63 chars, no leading hyphen.
/// * ref: a word character followed by word characters, `-`, `.`, and the
///   relative modifiers `~N`, `^N` and a single `@` after the base name.
/// * resource: everything after the ref's slash (may be empty).
///
/// # Errors
/// Returns [`Error::InvalidPath`] naming the offending segment.
pub fn parse(path: &str) -> Result<ResourcePath> {
    let rest = path.strip_prefix(SCHEME).unwrap_or(path);

    let (repository, rest) = match rest.split_once('/') {
        Some(parts) => parts,
        None => {
            return Err(Error::invalid_path(format!(
                "not a valid lakeFS URI: {:?} (hint: invalid repository {:?})",
                path, rest
            )))
        }
    };
    if let Err(e) = validate_repository(repository) {
        return Err(Error::invalid_path(format!(
            "not a valid lakeFS URI: {:?} (hint: {})",
            path,
            strip_kind(&e)
        )));
    }

    let (reference, resource) = rest.split_once('/').unwrap_or((rest, ""));
    if let Err(e) = reference.parse::<RefExpr>() {
        return Err(Error::invalid_path(format!(
            "not a valid lakeFS URI: {:?} (hint: {})",
            path,
            strip_kind(&e)
        )));
    }

    Ok(ResourcePath {
        repository: repository.to_string(),
        reference: reference.to_string(),
        resource: resource.to_string(),
    })
}

fn strip_kind(err: &Error) -> String {
    match err {
        Error::InvalidPath(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Validate a repository name: `[a-z0-9][a-z0-9-]{2,62}`.
pub fn validate_repository(name: &str) -> Result<()> {
    let len = name.chars().count();
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(3..=63).contains(&len) || !valid_chars || name.starts_with('-') {
        return Err(Error::invalid_path(format!("invalid repository {:?}", name)));
    }
    Ok(())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// ---------------------------------------------------------------------------
// RefExpr
// ---------------------------------------------------------------------------

/// A relative modifier trailing a ref name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefModifier {
    /// `~N`: the Nth first-parent ancestor.
    Ancestor(usize),
    /// `^N`: the Nth parent of the commit.
    Parent(usize),
    /// `@`: the committed head of a branch, excluding staged changes.
    Committed,
}

/// A ref name plus any relative modifiers, e.g. `main@~2^2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefExpr {
    pub base: String,
    pub modifiers: Vec<RefModifier>,
}

impl RefExpr {
    /// A plain ref with no modifiers.
    pub fn plain(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            modifiers: Vec::new(),
        }
    }

    /// Whether this expression resolves to something other than `base` itself.
    pub fn is_relative(&self) -> bool {
        self.modifiers
            .iter()
            .any(|m| !matches!(m, RefModifier::Committed))
    }

    /// Whether reads through this expression must ignore staged changes.
    pub fn is_committed_only(&self) -> bool {
        self.is_relative() || self.modifiers.contains(&RefModifier::Committed)
    }
}

impl fmt::Display for RefExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        for m in &self.modifiers {
            match m {
                RefModifier::Ancestor(n) => write!(f, "~{}", n)?,
                RefModifier::Parent(n) => write!(f, "^{}", n)?,
                RefModifier::Committed => f.write_str("@")?,
            }
        }
        Ok(())
    }
}

impl FromStr for RefExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_path(format!("invalid ref expression {:?}", s));

        let mut chars = s.char_indices().peekable();
        match chars.peek() {
            Some((_, c)) if is_word_char(*c) => {}
            _ => return Err(invalid()),
        }

        let base_end = s
            .find(|c: char| c == '~' || c == '^' || c == '@')
            .unwrap_or(s.len());
        let base = &s[..base_end];
        if !base.chars().all(|c| is_word_char(c) || c == '-' || c == '.') {
            return Err(invalid());
        }

        let mut modifiers = Vec::new();
        let mut rest = &s[base_end..];
        while let Some(c) = rest.chars().next() {
            rest = &rest[c.len_utf8()..];
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let digits = &rest[..digits_end];
            match c {
                '@' => {
                    if !modifiers.is_empty() || !digits.is_empty() {
                        return Err(invalid());
                    }
                    modifiers.push(RefModifier::Committed);
                }
                '~' | '^' => {
                    let n = if digits.is_empty() {
                        1
                    } else {
                        digits.parse::<usize>().map_err(|_| invalid())?
                    };
                    modifiers.push(if c == '~' {
                        RefModifier::Ancestor(n)
                    } else {
                        RefModifier::Parent(n)
                    });
                }
                _ => return Err(invalid()),
            }
            rest = &rest[digits_end..];
        }

        Ok(RefExpr {
            base: base.to_string(),
            modifiers,
        })
    }
}

// ---------------------------------------------------------------------------
// Resource paths
// ---------------------------------------------------------------------------

/// Normalize a resource path: strip leading/trailing slashes, reject `..`
/// segments, collapse `.` segments and repeated slashes.
///
/// An empty input returns an empty string (the ref root).
///
/// # Errors
/// Returns [`Error::InvalidPath`] if the path contains `..` segments or
/// collapses to nothing but `.` markers.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(String::new());
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            return Err(Error::invalid_path(format!(
                "path segment '{}' is not allowed",
                seg,
            )));
        }
        segments.push(seg);
    }

    if segments.is_empty() {
        if path.bytes().all(|b| b == b'/') {
            return Ok(String::new());
        }
        return Err(Error::invalid_path("path must not be empty"));
    }

    Ok(segments.join("/"))
}

/// The parent directory of a normalized resource (`""` for top-level entries).
pub fn parent_dir(resource: &str) -> &str {
    match resource.rfind('/') {
        Some(idx) => &resource[..idx],
        None => "",
    }
}

/// Join a ref root and a resource into a fully qualified name.
pub fn join(repository: &str, reference: &str, resource: &str) -> String {
    if resource.is_empty() {
        format!("{}/{}", repository, reference)
    } else {
        format!("{}/{}/{}", repository, reference, resource)
    }
}

/// Validate a branch or tag name before it is sent to the store.
///
/// Rejects colons, whitespace, control characters, the relative-ref
/// characters `~ ^ @`, glob characters, `..`, a trailing `.`, and a `.lock`
/// suffix.
///
/// # Errors
/// Returns [`Error::InvalidPath`] if the name violates any rule.
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_path("ref name must not be empty"));
    }

    for ch in name.chars() {
        match ch {
            ':' | ' ' | '\t' | '\n' | '\r' | '\\' | '^' | '~' | '@' | '?' | '*' | '[' | '/' => {
                return Err(Error::invalid_path(format!(
                    "ref name contains invalid character: {:?}",
                    ch,
                )));
            }
            c if c.is_control() => {
                return Err(Error::invalid_path("ref name contains a control character"));
            }
            _ => {}
        }
    }

    if name.contains("..") {
        return Err(Error::invalid_path("ref name must not contain '..'"));
    }

    if name.ends_with('.') {
        return Err(Error::invalid_path("ref name must not end with '.'"));
    }

    if name.ends_with(".lock") {
        return Err(Error::invalid_path("ref name must not end with '.lock'"));
    }

    Ok(())
}
