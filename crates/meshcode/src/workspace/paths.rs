//! Path sanitization for everything that reaches the container.
//!
//! Client supplied paths are normalized into [`RelativePath`] values rooted at
//! the project directory and new entry names into [`EntryName`] values. Only
//! these types are accepted by the command builders, so a raw client string
//! can never end up in an executed command.

use serde::Serialize;

use super::error::{WorkspaceError, WorkspaceResult};

/// Longest accepted relative path, in bytes.
const MAX_PATH_LEN: usize = 4096;

/// Longest accepted single entry name, in bytes.
const MAX_NAME_LEN: usize = 255;

/// Remove ASCII control characters (0x00-0x1F and 0x7F).
pub fn strip_control_chars(input: &str) -> String {
    input.chars().filter(|c| !is_ascii_control(*c)).collect()
}

/// Remove control characters from file content read out of the container,
/// keeping tabs and line breaks.
pub fn strip_content_controls(input: &str) -> String {
    input
        .chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r') || !is_ascii_control(*c))
        .collect()
}

fn is_ascii_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}')
}

/// Quote a value for inclusion in a POSIX `sh -c` script.
///
/// The value is wrapped in single quotes and every embedded `'` becomes `'\''`.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// A normalized path relative to the project root.
///
/// Always rendered with a leading `/` (`/src/app.js`); the root itself is `/`.
/// Never contains empty, `.` or `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalize a client supplied path.
    ///
    /// Control characters are stripped, repeated separators collapse and `.`
    /// segments are dropped. A `..` segment removes the preceding segment; one
    /// that would climb above the root is rejected.
    pub fn parse(input: &str) -> WorkspaceResult<Self> {
        let cleaned = strip_control_chars(input);
        if cleaned.len() > MAX_PATH_LEN {
            return Err(WorkspaceError::invalid_path("path is too long"));
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in cleaned.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(WorkspaceError::invalid_path(format!(
                            "path escapes the project root: {}",
                            cleaned
                        )));
                    }
                }
                name => {
                    if name.len() > MAX_NAME_LEN {
                        return Err(WorkspaceError::invalid_path("path segment is too long"));
                    }
                    segments.push(name);
                }
            }
        }

        Ok(Self::from_segments(&segments))
    }

    fn from_segments(segments: &[&str]) -> Self {
        if segments.is_empty() {
            return Self::root();
        }
        let mut path = String::new();
        for segment in segments {
            path.push('/');
            path.push_str(segment);
        }
        Self(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Final segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Parent directory, `None` for the root.
    pub fn parent(&self) -> Option<RelativePath> {
        if self.is_root() {
            return None;
        }
        let segments: Vec<&str> = self.segments().collect();
        Some(Self::from_segments(&segments[..segments.len() - 1]))
    }

    pub fn join(&self, name: &EntryName) -> RelativePath {
        if self.is_root() {
            Self(format!("/{}", name.as_str()))
        } else {
            Self(format!("{}/{}", self.0, name.as_str()))
        }
    }

    /// Sibling path with the final segment replaced; `None` for the root.
    pub fn with_file_name(&self, name: &EntryName) -> Option<RelativePath> {
        self.parent().map(|parent| parent.join(name))
    }

    /// Segment-aware prefix test: `/src` contains `/src/a` but not `/srcx`.
    pub fn starts_with(&self, prefix: &RelativePath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
    }

    /// Replace the `from` prefix with `to`; `None` if `from` is not a prefix.
    pub fn rebase(&self, from: &RelativePath, to: &RelativePath) -> Option<RelativePath> {
        if !self.starts_with(from) {
            return None;
        }
        let rest = if from.is_root() {
            self.0.as_str()
        } else {
            &self.0[from.0.len()..]
        };
        if rest.is_empty() || rest == "/" {
            return Some(to.clone());
        }
        if to.is_root() {
            Some(Self(rest.to_string()))
        } else {
            Some(Self(format!("{}{}", to.0, rest)))
        }
    }

    /// Absolute path inside the container, e.g. `/project/src/app.js`.
    pub fn to_container_path(&self, root: &str) -> String {
        let root = root.trim_end_matches('/');
        if self.is_root() {
            if root.is_empty() {
                "/".to_string()
            } else {
                root.to_string()
            }
        } else {
            format!("{}{}", root, self.0)
        }
    }
}

impl std::fmt::Display for RelativePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated name for a new file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntryName(String);

impl EntryName {
    /// Validate a single path segment.
    ///
    /// Control characters are stripped; empty names, `.`, `..` and names
    /// containing a separator are rejected.
    pub fn parse(input: &str) -> WorkspaceResult<Self> {
        let cleaned = strip_control_chars(input);
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            return Err(WorkspaceError::invalid_path("name cannot be empty"));
        }
        if trimmed == "." || trimmed == ".." {
            return Err(WorkspaceError::invalid_path(format!(
                "'{}' is not a valid name",
                trimmed
            )));
        }
        if trimmed.contains('/') {
            return Err(WorkspaceError::invalid_path(format!(
                "name must not contain '/': {}",
                trimmed
            )));
        }
        if trimmed.len() > MAX_NAME_LEN {
            return Err(WorkspaceError::invalid_path("name is too long"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> String {
        RelativePath::parse(input).unwrap().to_string()
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("a\u{0}b\u{1f}c\u{7f}d\ne"), "abcde");
        assert_eq!(strip_control_chars("plain"), "plain");
    }

    #[test]
    fn test_strip_content_controls_keeps_line_breaks() {
        assert_eq!(
            strip_content_controls("\u{1}\u{0}\u{0}\u{0}line1\r\n\tline2\u{7f}"),
            "line1\r\n\tline2"
        );
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(parse("app.js"), "/app.js");
        assert_eq!(parse("/src//lib///mod.rs"), "/src/lib/mod.rs");
        assert_eq!(parse("./src/./a"), "/src/a");
        assert_eq!(parse("src/../lib"), "/lib");
        assert_eq!(parse(""), "/");
        assert_eq!(parse("/"), "/");
        assert_eq!(parse("src/\u{0}app\u{1b}.js"), "/src/app.js");
    }

    #[test]
    fn test_parse_rejects_escape() {
        for input in ["..", "../etc/passwd", "/a/../../b", "a/b/../../..", "\u{0}../x"] {
            let err = RelativePath::parse(input).unwrap_err();
            assert!(
                matches!(err, WorkspaceError::InvalidPath(_)),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_parsed_paths_stay_inside_root() {
        let inputs = [
            "a/b/c",
            "a/./b/../c",
            "////x",
            "a/..",
            "a/b/../../c/./d",
            "..a/b..",
            "a/...",
            "x/../../y",
            "/./../",
        ];
        for input in inputs {
            if let Ok(path) = RelativePath::parse(input) {
                assert!(path.as_str().starts_with('/'));
                assert!(path.segments().all(|s| s != ".." && s != "." && !s.is_empty()));
                assert!(path.to_container_path("/project").starts_with("/project"));
            }
        }
    }

    #[test]
    fn test_container_path() {
        let path = RelativePath::parse("src/app.js").unwrap();
        assert_eq!(path.to_container_path("/project"), "/project/src/app.js");
        assert_eq!(path.to_container_path("/project/"), "/project/src/app.js");
        assert_eq!(RelativePath::root().to_container_path("/project"), "/project");
    }

    #[test]
    fn test_parent_join_and_file_name() {
        let path = RelativePath::parse("/src/lib/mod.rs").unwrap();
        assert_eq!(path.file_name(), Some("mod.rs"));
        assert_eq!(path.parent().unwrap().as_str(), "/src/lib");
        assert_eq!(RelativePath::parse("/a").unwrap().parent().unwrap(), RelativePath::root());
        assert!(RelativePath::root().parent().is_none());

        let name = EntryName::parse("main.rs").unwrap();
        assert_eq!(RelativePath::root().join(&name).as_str(), "/main.rs");
        assert_eq!(
            path.with_file_name(&name).unwrap().as_str(),
            "/src/lib/main.rs"
        );
    }

    #[test]
    fn test_starts_with_is_segment_aware() {
        let src = RelativePath::parse("/src").unwrap();
        assert!(RelativePath::parse("/src/a.js").unwrap().starts_with(&src));
        assert!(src.starts_with(&src));
        assert!(!RelativePath::parse("/srcx/a.js").unwrap().starts_with(&src));
        assert!(src.starts_with(&RelativePath::root()));
    }

    #[test]
    fn test_rebase() {
        let from = RelativePath::parse("/src").unwrap();
        let to = RelativePath::parse("/lib").unwrap();
        let child = RelativePath::parse("/src/a/b.js").unwrap();
        assert_eq!(child.rebase(&from, &to).unwrap().as_str(), "/lib/a/b.js");
        assert_eq!(from.rebase(&from, &to).unwrap(), to);
        assert!(RelativePath::parse("/other").unwrap().rebase(&from, &to).is_none());
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(EntryName::parse("app.js").unwrap().as_str(), "app.js");
        assert_eq!(EntryName::parse(" spaced \u{7}").unwrap().as_str(), "spaced");
        assert!(EntryName::parse("").is_err());
        assert!(EntryName::parse(".").is_err());
        assert!(EntryName::parse("..").is_err());
        assert!(EntryName::parse("a/b").is_err());
        assert!(EntryName::parse("x'; rm -rf /").is_err());
        assert!(EntryName::parse(&"n".repeat(256)).is_err());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn test_shell_quote_round_trips_through_sh() {
        let samples = [
            "plain",
            "it's",
            "''''",
            "$HOME `id` $(whoami)",
            "line1\nline2\n",
            "back\\slash \"double\"",
            "x'; rm -rf /",
            "tab\tand unicode é",
        ];
        for sample in samples {
            let script = format!("printf '%s' {}", shell_quote(sample));
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&script)
                .output()
                .await
                .expect("run sh");
            assert!(output.status.success());
            assert_eq!(String::from_utf8(output.stdout).unwrap(), sample);
        }
    }
}
