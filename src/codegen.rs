use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;

use crate::catalog::LiteralCatalog;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to write generated literals to {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").expect("static regex"))
}

fn leading_digit() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d)").expect("static regex"))
}

/// Turns a catalog name into a legal type identifier.
pub fn safe_type_name(name: &str) -> String {
    let replaced = illegal_chars().replace_all(name, "_");
    leading_digit().replace(&replaced, "_$1").into_owned()
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.escape_default()))
}

/// Renders one `export type Name = "a" | "b"` line per non-empty catalog.
pub fn render_literal_types(catalog: &LiteralCatalog, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "// Auto-generated on {}\n",
        generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    out.push_str("// Do not edit manually: these are derived from Jira data.\n");
    out.push('\n');

    for (name, values) in catalog.iter() {
        let union = values
            .iter()
            .map(|value| quote(value))
            .collect::<Vec<_>>()
            .join(" | ");
        out.push_str(&format!("export type {} = {}\n", safe_type_name(name), union));
    }

    out
}

/// Writes `contents` through a sibling temp file so readers never observe a
/// half-written file. Missing parent directories are created.
pub fn write_output(path: &Path, contents: &str) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "literals".to_string());
    let tmp_path = parent.join(format!(".{file_name}.tmp"));

    let written = write_synced(&tmp_path, contents).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(source) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(source));
    }
    tracing::info!(path = %path.display(), bytes = contents.len(), "wrote generated literals");
    Ok(())
}

fn write_synced(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 21, 8, 30, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn sanitizes_type_names() {
        assert_eq!(safe_type_name("StatusName"), "StatusName");
        assert_eq!(safe_type_name("Custom12001-Value"), "Custom12001_Value");
        assert_eq!(safe_type_name("9Lives"), "_9Lives");
        assert_eq!(safe_type_name("a.b c"), "a_b_c");
    }

    #[test]
    fn renders_sorted_unions_deterministically() {
        let mut catalog = LiteralCatalog::new();
        catalog.add("StatusName", "Open");
        catalog.add("StatusName", "Done");
        catalog.add("Label", "say \"hi\"");

        let rendered = render_literal_types(&catalog, fixed_time());

        let expected = "// Auto-generated on 2026-02-21T08:30:00.000Z\n\
// Do not edit manually: these are derived from Jira data.\n\
\n\
export type Label = \"say \\\"hi\\\"\"\n\
export type StatusName = \"Done\" | \"Open\"\n";
        assert_eq!(rendered, expected);
        assert_eq!(rendered, render_literal_types(&catalog, fixed_time()));
    }

    #[test]
    fn empty_catalog_renders_only_header() {
        let rendered = render_literal_types(&LiteralCatalog::new(), fixed_time());
        assert_eq!(rendered.lines().count(), 3);
        assert!(!rendered.contains("export type"));
    }

    #[test]
    fn writes_output_creating_parent_dirs_and_overwriting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("src").join("literals.generated.ts");

        write_output(&path, "first\n").expect("first write");
        write_output(&path, "second\n").expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second\n");
        assert!(!dir.path().join("src").join(".literals.generated.ts.tmp").exists());
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("literals.ts");
        fs::create_dir_all(target.join("occupied")).expect("blocking dir");

        let err = write_output(&target, "export type A = \"a\"\n").expect_err("rename onto dir");

        assert!(matches!(err, OutputError::Io { ref path, .. } if path == &target));
        assert!(!dir.path().join(".literals.ts.tmp").exists());
        assert!(target.join("occupied").is_dir());
    }
}
