//! Conversions between paths on disk and paths written in tag files

use std::path::{Component, Path, PathBuf};

/// Lexically resolve `.` and `..` without touching the filesystem
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Cannot climb above the root, drop the component
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            component => normalized.push(component),
        }
    }
    normalized
}

/// `path` is below `root`, and not `root` itself
pub(crate) fn is_strictly_under(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

/// Path relative to the bag, with `/` separators, as written in manifests and `fetch.txt`
pub(crate) fn to_bag_relative(base_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base_dir).ok()?;
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Inverse of [`to_bag_relative()`]
pub(crate) fn from_bag_relative(base_dir: &Path, relative: &str) -> PathBuf {
    normalize(&base_dir.join(relative))
}

/// Percent-encode the characters that would break the line-oriented tag files
pub(crate) fn encode_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '\n' => encoded.push_str("%0A"),
            '\r' => encoded.push_str("%0D"),
            c => encoded.push(c),
        }
    }
    encoded
}

/// Inverse of [`encode_path()`], unknown escapes are kept as-is
pub(crate) fn decode_path(path: &str) -> String {
    let mut decoded = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(position) = rest.find('%') {
        decoded.push_str(&rest[..position]);
        let escape = rest.get(position..position + 3);
        match escape {
            Some("%25") => decoded.push('%'),
            Some("%0A") | Some("%0a") => decoded.push('\n'),
            Some("%0D") | Some("%0d") => decoded.push('\r'),
            _ => {
                decoded.push('%');
                rest = &rest[position + 1..];
                continue;
            }
        }
        rest = &rest[position + 3..];
    }
    decoded.push_str(rest);
    decoded
}

/// Delete the now-empty directories between `from` (included) and `root` (excluded)
pub(crate) async fn prune_empty_directories(from: &Path, root: &Path) -> std::io::Result<()> {
    let mut current = from.to_path_buf();
    while is_strictly_under(&current, root) {
        let mut entries = tokio::fs::read_dir(&current).await?;
        if entries.next_entry().await?.is_some() {
            break;
        }

        tokio::fs::remove_dir(&current).await?;
        tracing::debug!(directory = %current.display(), "removed empty directory");

        if !current.pop() {
            break;
        }
    }
    Ok(())
}

/// Every regular file below `directory`, sorted
pub(crate) async fn walk_files(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut backlog = vec![directory.to_path_buf()];

    while let Some(current) = backlog.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                backlog.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_lexically() {
        for (input, output) in [
            ("/bag/data/a/../b", "/bag/data/b"),
            ("/bag/data/./x", "/bag/data/x"),
            ("/bag/data/../../etc", "/etc"),
            ("/bag/data/sub/", "/bag/data/sub"),
        ] {
            assert_eq!(normalize(Path::new(input)), PathBuf::from(output));
        }
    }

    #[test]
    fn strictly_under() {
        let data = Path::new("/bag/data");
        assert!(is_strictly_under(Path::new("/bag/data/x"), data));
        assert!(!is_strictly_under(Path::new("/bag/data"), data));
        assert!(!is_strictly_under(Path::new("/bag/database"), data));
        assert!(!is_strictly_under(Path::new("/bag/bagit.txt"), data));
    }

    #[test]
    fn relative_paths() {
        let base = Path::new("/bag");
        assert_eq!(
            to_bag_relative(base, Path::new("/bag/data/sub/x.txt")),
            Some("data/sub/x.txt".to_string())
        );
        assert_eq!(to_bag_relative(base, Path::new("/elsewhere/x")), None);
        assert_eq!(
            from_bag_relative(base, "data/sub/x.txt"),
            PathBuf::from("/bag/data/sub/x.txt")
        );
    }

    #[test]
    fn percent_encoding() {
        for (raw, encoded) in [
            ("data/file.txt", "data/file.txt"),
            ("data/100%.txt", "data/100%25.txt"),
            ("data/line\nbreak\r.txt", "data/line%0Abreak%0D.txt"),
        ] {
            assert_eq!(encode_path(raw), encoded);
            assert_eq!(decode_path(encoded), raw);
        }

        assert_eq!(decode_path("data/50%off"), "data/50%off");
        assert_eq!(decode_path("data/%20"), "data/%20");
    }

    #[tokio::test]
    async fn prune_stops_at_root_and_non_empty() {
        let directory = tempfile::tempdir().unwrap();
        let data = directory.path().join("data");
        tokio::fs::create_dir_all(data.join("a/b/c")).await.unwrap();
        tokio::fs::write(data.join("a/keep.txt"), "keep").await.unwrap();

        prune_empty_directories(&data.join("a/b/c"), &data)
            .await
            .unwrap();
        assert!(!data.join("a/b").exists());
        assert!(data.join("a").is_dir());

        tokio::fs::remove_file(data.join("a/keep.txt")).await.unwrap();
        prune_empty_directories(&data.join("a"), &data).await.unwrap();
        assert!(!data.join("a").exists());
        assert!(data.is_dir());
    }

    #[tokio::test]
    async fn walk_is_recursive_and_sorted() {
        let directory = tempfile::tempdir().unwrap();
        let root = directory.path();
        tokio::fs::create_dir_all(root.join("z/y")).await.unwrap();
        tokio::fs::write(root.join("z/y/deep.txt"), "").await.unwrap();
        tokio::fs::write(root.join("a.txt"), "").await.unwrap();

        assert_eq!(
            walk_files(root).await.unwrap(),
            vec![root.join("a.txt"), root.join("z/y/deep.txt")]
        );
    }
}
