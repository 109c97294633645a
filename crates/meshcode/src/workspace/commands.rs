//! Command lines for file operations inside a project container.
//!
//! Builders only accept sanitized [`RelativePath`] and [`EntryName`] values.
//! Commands are passed to the runtime as argv, so no shell is involved except
//! for the inline write, where every value is single-quoted.

use bytes::Bytes;

use super::paths::{EntryName, RelativePath, shell_quote};

/// Refuses to replace or nest into an existing target, then moves.
/// `$1` is the source and `$2` the target.
const RENAME_SCRIPT: &str = r#"if [ -e "$2" ] || [ -L "$2" ]; then echo "mv: '$2' already exists" >&2; exit 1; fi; exec mv -- "$1" "$2""#;

/// Largest `sh -c` script passed as a single argument. Linux caps one argv
/// string at 128 KiB (`MAX_ARG_STRLEN`); the rest is headroom for the path.
pub const MAX_INLINE_SCRIPT_BYTES: usize = 120 * 1024;

/// Builds argv vectors for one project root.
#[derive(Debug, Clone)]
pub struct FileCommands {
    root: String,
}

impl FileCommands {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        Self {
            root: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn container_path(&self, path: &RelativePath) -> String {
        path.to_container_path(&self.root)
    }

    /// Every entry below the root, one per line; directories end with `/`.
    pub fn list(&self) -> Vec<String> {
        argv(&[
            "find",
            &self.root,
            "-mindepth",
            "1",
            "(",
            "-type",
            "d",
            "-exec",
            "printf",
            "%s/\\n",
            "{}",
            "+",
            ")",
            "-o",
            "-print",
        ])
    }

    pub fn read(&self, path: &RelativePath) -> Vec<String> {
        argv(&["cat", "--", &self.container_path(path)])
    }

    /// Overwrite a file through a shell redirect.
    pub fn write_inline(&self, path: &RelativePath, content: &str) -> Vec<String> {
        let script = format!(
            "printf '%s' {} > {}",
            shell_quote(content),
            shell_quote(&self.container_path(path))
        );
        argv(&["sh", "-c", &script])
    }

    pub fn mkdir(&self, path: &RelativePath) -> Vec<String> {
        argv(&["mkdir", "-p", "--", &self.container_path(path)])
    }

    /// Move `from` to `to`, failing when `to` already exists.
    ///
    /// Plain `mv` would nest the source inside an existing directory or
    /// overwrite an existing file.
    pub fn rename(&self, from: &RelativePath, to: &RelativePath) -> Vec<String> {
        argv(&[
            "sh",
            "-c",
            RENAME_SCRIPT,
            "mv",
            &self.container_path(from),
            &self.container_path(to),
        ])
    }

    pub fn delete(&self, path: &RelativePath) -> Vec<String> {
        argv(&["rm", "-rf", "--", &self.container_path(path)])
    }
}

/// Whether `content` can go through [`FileCommands::write_inline`] with a
/// quoted form of at most `limit` bytes. NUL bytes cannot travel in argv.
pub fn fits_inline(content: &str, limit: usize) -> bool {
    !content.contains('\0') && shell_quote(content).len() <= limit
}

/// A tar archive holding a single regular file.
pub fn single_file_archive(name: &EntryName, content: &[u8]) -> std::io::Result<Bytes> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name.as_str(), content)?;
    Ok(Bytes::from(builder.into_inner()?))
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn rel(path: &str) -> RelativePath {
        RelativePath::parse(path).unwrap()
    }

    #[test]
    fn test_root_normalization() {
        assert_eq!(FileCommands::new("/project/").root(), "/project");
        assert_eq!(FileCommands::new("/").root(), "/");
    }

    #[test]
    fn test_argv_layout() {
        let cmds = FileCommands::new("/project");
        assert_eq!(cmds.read(&rel("/a b.js")), vec!["cat", "--", "/project/a b.js"]);
        assert_eq!(cmds.mkdir(&rel("/src")), vec!["mkdir", "-p", "--", "/project/src"]);
        let rename = cmds.rename(&rel("/src"), &rel("/lib"));
        assert_eq!(rename[..2], ["sh".to_string(), "-c".to_string()]);
        assert_eq!(rename[3..], ["mv", "/project/src", "/project/lib"]);
        assert_eq!(cmds.delete(&rel("/-rf")), vec!["rm", "-rf", "--", "/project/-rf"]);
        assert_eq!(cmds.list()[0..2], ["find".to_string(), "/project".to_string()]);
    }

    #[test]
    fn test_write_inline_quotes_everything() {
        let cmds = FileCommands::new("/project");
        let argv = cmds.write_inline(&rel("/it's.txt"), "a'b");
        assert_eq!(argv[0], "sh");
        assert_eq!(argv[1], "-c");
        assert_eq!(argv[2], "printf '%s' 'a'\\''b' > '/project/it'\\''s.txt'");
    }

    #[tokio::test]
    async fn test_write_inline_script_reproduces_content() {
        let dir = tempfile::tempdir().unwrap();
        let cmds = FileCommands::new(dir.path().to_string_lossy().to_string());
        let content = "line 1\n'quoted' $(rm -rf /) `id`\n";
        let argv = cmds.write_inline(&rel("/out.txt"), content);

        let status = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            content
        );
    }

    async fn run(argv: &[String]) -> std::process::Output {
        tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rename_moves_to_free_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/x.js"), "x").unwrap();
        let cmds = FileCommands::new(dir.path().to_string_lossy().to_string());

        let output = run(&cmds.rename(&rel("/a"), &rel("/b c"))).await;
        assert!(output.status.success());
        assert!(dir.path().join("b c/x.js").exists());
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_rename_onto_existing_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("a/x.js"), "x").unwrap();
        let cmds = FileCommands::new(dir.path().to_string_lossy().to_string());

        let output = run(&cmds.rename(&rel("/a"), &rel("/b"))).await;
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("already exists"));
        assert!(dir.path().join("a/x.js").exists());
        assert!(!dir.path().join("b/a").exists());
    }

    #[tokio::test]
    async fn test_rename_onto_existing_file_keeps_both() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "a").unwrap();
        std::fs::write(dir.path().join("b.js"), "b").unwrap();
        let cmds = FileCommands::new(dir.path().to_string_lossy().to_string());

        let output = run(&cmds.rename(&rel("/a.js"), &rel("/b.js"))).await;
        assert!(!output.status.success());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.js")).unwrap(), "a");
        assert_eq!(std::fs::read_to_string(dir.path().join("b.js")).unwrap(), "b");
    }

    #[test]
    fn test_fits_inline_measures_quoted_form() {
        assert!(fits_inline("abc", 5));
        // Each quote expands to four bytes once quoted.
        assert!(!fits_inline(&"'".repeat(40), 100));
        assert!(!fits_inline("a\0b", 1024));

        let quotes = "'".repeat(40_000);
        assert!(quotes.len() < 64 * 1024);
        assert!(!fits_inline(&quotes, MAX_INLINE_SCRIPT_BYTES));
    }

    #[test]
    fn test_single_file_archive() {
        let name = EntryName::parse("app.js").unwrap();
        let bytes = single_file_archive(&name, b"console.log(1)").unwrap();

        let mut archive = tar::Archive::new(bytes.as_ref());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_string_lossy(), "app.js");
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "console.log(1)");
        assert!(entries.next().is_none());
    }
}
