//! Rename-format token substitution and the rename operation itself
//! (spec.md §6). The link/softlink variant is a supplement carried over
//! from the original implementation's `rename` command.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use time::format_description::FormatItem;
use time::OffsetDateTime;

use crate::error::PipelineError;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameMode {
    Move,
    HardLink,
    SoftLink,
}

#[derive(Debug, Clone)]
pub struct RenameConfig {
    pub format: String,
    pub mode: RenameMode,
    pub keep_structure: bool,
    pub delete_empty: bool,
    /// `time`-crate format description (e.g. `"[year]-[month]-[day]"`) used
    /// to render the `%aired%` token. `None` uses the same default this
    /// falls back to on an invalid format.
    pub aired_date_format: Option<String>,
}

static DEFAULT_AIRED_FORMAT: LazyLock<Vec<FormatItem<'static>>> = LazyLock::new(|| {
    time::format_description::parse("[year]-[month]-[day]").expect("default aired format is valid")
});

/// Renders the `aired` attribute (a unix timestamp) using `date_format`,
/// falling back to an ISO `year-month-day` rendering if it is absent,
/// invalid, or fails to apply. Non-numeric/unparsable input is left as-is.
pub fn format_aired(raw: &str, date_format: Option<&str>) -> String {
    let Ok(timestamp) = raw.parse::<i64>() else {
        return raw.to_string();
    };
    let Ok(dt) = OffsetDateTime::from_unix_timestamp(timestamp) else {
        return raw.to_string();
    };

    if let Some(fmt) = date_format {
        let formatted = time::format_description::parse(fmt).ok().and_then(|desc| dt.format(&desc).ok());
        if let Some(s) = formatted {
            return s;
        }
        log::warn!("invalid date format {fmt:?}, using default one instead");
    }
    dt.format(&DEFAULT_AIRED_FORMAT).unwrap_or_else(|_| raw.to_string())
}

/// Substitutes `%field%` tokens with the record's attribute values,
/// sanitising the result into a valid filename component.
pub fn format_name(fmt: &str, record: &Record) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let mut token = String::new();
            let mut closed = false;
            for c2 in chars.by_ref() {
                if c2 == '%' {
                    closed = true;
                    break;
                }
                token.push(c2);
            }
            if closed {
                let value = record.get(&token).unwrap_or_default();
                out.push_str(&sanitise(value));
            } else {
                out.push('%');
                out.push_str(&token);
            }
        } else {
            out.push(c);
        }
    }

    collapse_whitespace(&out)
}

fn sanitise(value: &str) -> String {
    let mut s = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '<' | '>' | '/' | '\\' | '*' | '|' => s.push(' '),
            '"' => s.push('\''),
            ':' | '?' => {}
            other => s.push(other),
        }
    }
    s
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Places `record.path` at `target` according to `mode`, creating parent
/// directories as needed.
pub fn place_file(source: &Path, target: &Path, mode: RenameMode) -> Result<(), PipelineError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if target.exists() {
        return Err(PipelineError::RenameTargetExists(target.display().to_string()));
    }
    match mode {
        RenameMode::Move => std::fs::rename(source, target)?,
        RenameMode::HardLink => std::fs::hard_link(source, target)?,
        RenameMode::SoftLink => symlink(source, target)?,
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(source, target)
}

#[cfg(not(any(unix, windows)))]
fn symlink(_source: &Path, _target: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

pub fn resolve_target(dir: &Path, formatted: &str, extension: Option<&str>) -> PathBuf {
    match extension {
        Some(ext) if !ext.is_empty() => dir.join(format!("{formatted}.{ext}")),
        _ => dir.join(formatted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(pairs: &[(&str, &str)]) -> Record {
        let mut r = Record::new("/tmp/x.mkv");
        for (k, v) in pairs {
            r.set(k, *v);
        }
        r
    }

    #[test]
    fn format_aired_uses_default_iso_format() {
        assert_eq!(format_aired("1041379200", None), "2003-01-01");
    }

    #[test]
    fn format_aired_applies_custom_format() {
        assert_eq!(format_aired("1041379200", Some("[year]/[month]")), "2003/01");
    }

    #[test]
    fn format_aired_falls_back_on_invalid_custom_format() {
        assert_eq!(format_aired("1041379200", Some("[bogus]")), "2003-01-01");
    }

    #[test]
    fn format_aired_leaves_non_numeric_input_unchanged() {
        assert_eq!(format_aired("none", Some("[year]")), "none");
    }

    #[test]
    fn substitutes_known_token() {
        let r = record_with(&[("filename", "My Show S01E01")]);
        assert_eq!(format_name("%filename%", &r), "My Show S01E01");
    }

    #[test]
    fn missing_token_becomes_empty() {
        let r = record_with(&[]);
        assert_eq!(format_name("[%group%] %filename%", &r), "[] ");
    }

    #[test]
    fn invalid_path_characters_become_spaces() {
        let r = record_with(&[("filename", "Ratio: A/B <test>")]);
        let out = format_name("%filename%", &r);
        assert!(!out.contains(':'));
        assert!(!out.contains('/'));
        assert!(!out.contains('<'));
    }

    #[test]
    fn double_quote_becomes_single_quote() {
        let r = record_with(&[("filename", "The \"Best\" Episode")]);
        assert_eq!(format_name("%filename%", &r), "The 'Best' Episode");
    }

    #[test]
    fn whitespace_runs_collapse() {
        let r = record_with(&[("filename", "A   B:  C")]);
        assert_eq!(format_name("%filename%", &r), "A B C");
    }

    #[test]
    fn place_file_move_relocates_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"hi").unwrap();
        let target = dir.path().join("sub/b.txt");
        place_file(&source, &target, RenameMode::Move).unwrap();
        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hi");
    }

    #[test]
    fn place_file_refuses_to_overwrite_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let target = dir.path().join("b.txt");
        std::fs::write(&source, b"hi").unwrap();
        std::fs::write(&target, b"already here").unwrap();
        let err = place_file(&source, &target, RenameMode::Move).unwrap_err();
        assert!(matches!(err, PipelineError::RenameTargetExists(_)));
    }
}
