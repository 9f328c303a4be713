//! Shell-style `KEY="value"` env file parsing and writing.
//!
//! Mirrors the escape alphabet of a POSIX `KEY="value"` file as read by a
//! shell `source`: only five escapes are recognized, applied in a fixed
//! order both ways so `parse(quote(x)) == x` round-trips exactly.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::error::{ConfigError, Result};

fn key_re() -> Regex {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex")
}

/// Parse a `KEY="value"` file into a mapping. Missing file is not an error —
/// it fails open to an empty map, matching a fresh installation with no
/// config written yet.
pub fn parse(path: &Path) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return result,
    };
    let key_re = key_re();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq) = line.find('=') else {
            continue;
        };
        if eq == 0 {
            continue;
        }
        let key = &line[..eq];
        if !key_re.is_match(key) {
            warn!(path = %path.display(), key, "skipping invalid key in env file");
            continue;
        }
        let mut val = line[eq + 1..].to_string();
        if val.len() >= 2 && val.starts_with('"') && val.ends_with('"') {
            val = unescape(&val[1..val.len() - 1]);
        }
        result.insert(key.to_string(), val);
    }
    result
}

/// Apply the fixed-order unescape: `\n`, `` \` ``, `\$`, `\"`, `\\`.
fn unescape(s: &str) -> String {
    s.replace("\\n", "\n")
        .replace("\\`", "`")
        .replace("\\$", "$")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

/// Apply the fixed-order escape, the exact inverse of [`unescape`]:
/// `\`, `"`, `$`, `` ` ``, newline — in that order.
pub fn quote(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`")
        .replace('\n', "\\n")
}

/// Write `fields` as `KEY="value"` lines, creating the directory with 0700
/// and the file under an 0077 umask so the resulting file is owner-only.
pub fn save_bot_env(bot_dir: &Path, fields: &BTreeMap<String, String>) -> Result<()> {
    fs::create_dir_all(bot_dir).map_err(|e| ConfigError::Write {
        path: bot_dir.display().to_string(),
        source: e,
    })?;
    set_dir_permissions(bot_dir, 0o700);

    let path = bot_dir.join("bot.env");
    write_with_umask(&path, |f| {
        for (key, val) in fields {
            writeln!(f, "{key}=\"{}\"", quote(val))?;
        }
        Ok(())
    })
}

/// Rewrite the installation-wide globals file: managed keys always written
/// (falling back to their default), any pre-existing key outside the
/// managed set preserved verbatim.
pub fn save_service_env(
    path: &Path,
    managed_keys: &[&str],
    defaults: &BTreeMap<&str, &str>,
    values: &BTreeMap<String, String>,
) -> Result<()> {
    let managed: std::collections::HashSet<&str> = managed_keys.iter().copied().collect();

    let mut extra_lines = Vec::new();
    if let Ok(content) = fs::read_to_string(path) {
        for line in content.lines() {
            let key = line.find('=').map(|eq| &line[..eq]).unwrap_or("");
            if !managed.contains(key) {
                extra_lines.push(line.to_string());
            }
        }
    }

    write_with_umask(path, |f| {
        for key in managed_keys {
            let val = values
                .get(*key)
                .map(|s| s.as_str())
                .or_else(|| defaults.get(key).copied())
                .unwrap_or("");
            writeln!(f, "{key}=\"{}\"", quote(val))?;
        }
        for line in &extra_lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    })
}

/// Targeted in-place edit of the `MODEL=` line in `bot_dir/bot.env`,
/// preserving every other line (comments, unrelated keys). Appends the line
/// if it wasn't present.
pub fn save_model(bot_dir: &Path, model: &str) -> Result<()> {
    if !matches!(model, "opus" | "sonnet" | "haiku") {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }

    fs::create_dir_all(bot_dir).map_err(|e| ConfigError::Write {
        path: bot_dir.display().to_string(),
        source: e,
    })?;
    set_dir_permissions(bot_dir, 0o700);

    let path = bot_dir.join("bot.env");
    let new_line = format!("MODEL=\"{}\"", quote(model));

    let mut lines: Vec<String> = Vec::new();
    let mut found = false;
    if let Ok(content) = fs::read_to_string(&path) {
        for line in content.lines() {
            if line.starts_with("MODEL=") {
                lines.push(new_line.clone());
                found = true;
            } else {
                lines.push(line.to_string());
            }
        }
    }
    if !found {
        lines.push(new_line);
    }

    write_with_umask(&path, |f| {
        for line in &lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    })
}

#[cfg(unix)]
fn set_dir_permissions(dir: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(dir) {
        let mut perms = meta.permissions();
        perms.set_mode(mode);
        let _ = fs::set_permissions(dir, perms);
    }
}

#[cfg(not(unix))]
fn set_dir_permissions(_dir: &Path, _mode: u32) {}

#[cfg(unix)]
fn write_with_umask(path: &Path, write_fn: impl FnOnce(&mut fs::File) -> std::io::Result<()>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        write_fn(&mut file)?;
        file.flush()?;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        Ok(())
    })();
    result.map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(not(unix))]
fn write_with_umask(path: &Path, write_fn: impl FnOnce(&mut fs::File) -> std::io::Result<()>) -> Result<()> {
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        write_fn(&mut file)?;
        file.flush()
    })();
    result.map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_all_escapes() {
        let original = "line1\nline2 `backtick` $dollar \"quote\" \\backslash";
        let quoted = quote(original);
        let unescaped = unescape(&quoted);
        assert_eq!(unescaped, original);
    }

    #[test]
    fn parse_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let map = parse(&dir.path().join("nope.env"));
        assert!(map.is_empty());
    }

    #[test]
    fn parse_skips_invalid_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("service.env");
        fs::write(&path, "1BAD=x\nGOOD_KEY=\"ok\"\n").unwrap();
        let map = parse(&path);
        assert_eq!(map.get("GOOD_KEY").map(|s| s.as_str()), Some("ok"));
        assert!(!map.contains_key("1BAD"));
    }

    #[test]
    fn parse_unquoted_value_kept_as_is() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("service.env");
        fs::write(&path, "PORT=8421\n").unwrap();
        let map = parse(&path);
        assert_eq!(map.get("PORT").map(|s| s.as_str()), Some("8421"));
    }

    #[test]
    fn parse_ignores_comments_and_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("service.env");
        fs::write(&path, "# a comment\n\nPORT=\"8421\"\n").unwrap();
        let map = parse(&path);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn save_model_rejects_unknown_value() {
        let dir = tempdir().unwrap();
        let err = save_model(dir.path(), "gpt4").unwrap_err();
        assert_eq!(err.code(), "INVALID_MODEL");
    }

    #[test]
    fn save_model_replaces_existing_line_in_place() {
        let dir = tempdir().unwrap();
        let bot_dir = dir.path().join("mybot");
        fs::create_dir_all(&bot_dir).unwrap();
        fs::write(bot_dir.join("bot.env"), "TELEGRAM_BOT_TOKEN=\"abc\"\nMODEL=\"haiku\"\n").unwrap();

        save_model(&bot_dir, "opus").unwrap();

        let content = fs::read_to_string(bot_dir.join("bot.env")).unwrap();
        assert!(content.contains("MODEL=\"opus\""));
        assert!(content.contains("TELEGRAM_BOT_TOKEN=\"abc\""));
    }

    #[test]
    fn save_model_appends_when_missing() {
        let dir = tempdir().unwrap();
        let bot_dir = dir.path().join("mybot");
        fs::create_dir_all(&bot_dir).unwrap();
        fs::write(bot_dir.join("bot.env"), "TELEGRAM_BOT_TOKEN=\"abc\"\n").unwrap();

        save_model(&bot_dir, "sonnet").unwrap();

        let content = fs::read_to_string(bot_dir.join("bot.env")).unwrap();
        assert!(content.contains("MODEL=\"sonnet\""));
    }

    #[test]
    fn save_service_env_preserves_unmanaged_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("service.env");
        fs::write(&path, "HASS_TOKEN=\"xyz\"\nPORT=\"1234\"\n").unwrap();

        let managed = ["PORT"];
        let mut defaults = BTreeMap::new();
        defaults.insert("PORT", "8421");
        let mut values = BTreeMap::new();
        values.insert("PORT".to_string(), "9000".to_string());

        save_service_env(&path, &managed, &defaults, &values).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("PORT=\"9000\""));
        assert!(content.contains("HASS_TOKEN=\"xyz\""));
    }
}
