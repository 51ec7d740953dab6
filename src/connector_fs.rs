use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::extract;
use crate::models::SourceItem;

/// Walk the configured root and turn matching files into source items.
///
/// Binary formats (PDF, Office) go through text extraction; files that fail
/// extraction or exceed `max_extract_bytes` are counted in the returned skip
/// total instead of aborting the scan.
pub fn scan_filesystem(config: &Config) -> Result<(Vec<SourceItem>, u64)> {
    let fs_config = config
        .connectors
        .filesystem
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Filesystem connector not configured"))?;

    let root = &fs_config.root;
    if !root.exists() {
        bail!(
            "Filesystem connector root does not exist: {}",
            root.display()
        );
    }

    let include_set = build_globset(&fs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(fs_config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut items = Vec::new();
    let mut skipped: u64 = 0;

    let walker = WalkDir::new(root).follow_links(fs_config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        match file_to_source_item(path, &rel_str, fs_config.max_extract_bytes) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => skipped += 1,
            Err(e) => return Err(e),
        }
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Ok((items, skipped))
}

/// `Ok(None)` means the file was intentionally skipped (too large, or
/// extraction failed).
fn file_to_source_item(
    path: &Path,
    relative_path: &str,
    max_extract_bytes: u64,
) -> Result<Option<SourceItem>> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let modified_secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let content_type = extract::content_type_for_path(path);

    let body = if extract::is_binary_format(content_type) {
        if metadata.len() > max_extract_bytes {
            tracing::warn!(
                path = %path.display(),
                size = metadata.len(),
                limit = max_extract_bytes,
                "skipping file over extraction size limit"
            );
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        match extract::extract_text(&bytes, content_type) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "extraction failed, skipping");
                return Ok(None);
            }
        }
    } else if content_type == extract::MIME_HTML {
        let raw = std::fs::read_to_string(path).unwrap_or_default();
        extract::strip_html(&raw)
    } else {
        std::fs::read_to_string(path).unwrap_or_default()
    };

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Some(SourceItem {
        source: "filesystem".to_string(),
        source_id: relative_path.to_string(),
        source_url: Some(format!("file://{}", path.display())),
        title: Some(title),
        author: None,
        created_at: Utc.timestamp_opt(modified_secs, 0).unwrap(),
        updated_at: Utc.timestamp_opt(modified_secs, 0).unwrap(),
        content_type: content_type.to_string(),
        body,
        metadata_json: "{}".to_string(),
    }))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_root(dir: &tempfile::TempDir, root: &Path) -> Config {
        let path = dir.path().join("harv.toml");
        let body = format!(
            r#"
[db]
path = "{}"

[chunking]
target_tokens = 200

[retrieval]

[server]
bind = "127.0.0.1:0"

[connectors.filesystem]
root = "{}"
include_globs = ["**/*.md"]
follow_symlinks = true
"#,
            dir.path().join("harv.sqlite").display(),
            root.display()
        );
        std::fs::write(&path, body).unwrap();
        crate::config::load_config(&path).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_skipped_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("docs");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("readme.md"), "# Readme\n\nSome text.\n").unwrap();
        std::os::unix::fs::symlink(root.join("missing.md"), root.join("broken.md")).unwrap();

        let config = config_with_root(&dir, &root);
        let (items, skipped) = scan_filesystem(&config).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "readme.md");
        assert!(skipped >= 1);
    }
}
