use std::path::Path;

pub fn normalize(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

const CASE_INSENSITIVE_FS: bool = cfg!(any(windows, target_os = "macos"));

/// Key under which different spellings of the same file collapse: slash direction and
/// trailing slashes are ignored, letter case only where the filesystem ignores it.
pub fn dedupe_key(path: &str) -> String {
    let normalized = normalize(path);
    if CASE_INSENSITIVE_FS {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

#[cfg(unix)]
fn file_identity(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let metadata = std::fs::metadata(path).ok()?;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn file_identity(path: &Path) -> Option<std::path::PathBuf> {
    std::fs::canonicalize(path).ok()
}

/// True only when both paths exist and name different files on disk. Paths that cannot be
/// resolved are not provably distinct.
pub fn are_distinct_files(a: &str, b: &str) -> bool {
    match (file_identity(Path::new(a)), file_identity(Path::new(b))) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

pub fn is_within_scope(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);

    if path == root {
        return true;
    }

    if root == "/" {
        return path.starts_with('/');
    }

    if cfg!(windows) {
        let path_lower = path.to_ascii_lowercase();
        let root_lower = root.to_ascii_lowercase();
        return path_lower.starts_with(&(root_lower + "/"));
    }

    path.starts_with(&(root + "/"))
}

pub fn is_under_any_root<P: AsRef<Path>>(path: &str, roots: &[P]) -> bool {
    roots
        .iter()
        .any(|root| is_within_scope(path, &root.as_ref().to_string_lossy()))
}

/// True when any component of `path` below `root` starts with a dot.
pub fn is_hidden_below(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}
