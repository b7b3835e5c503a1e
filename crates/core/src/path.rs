use thiserror::Error;

/// 路徑轉換錯誤。 / Errors raised while resolving sandbox paths.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("EINVAL: invalid file path, '{path}' is not under '{root}'")]
    OutsideRoot { path: String, root: String },
}

/// 去除結尾斜線；根目錄 `/` 保持不變。 / Strips trailing slashes, keeping the root `/` intact.
pub fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// 判斷 `path` 是否位於 `dir` 之下（不含 `dir` 本身）。 / Returns whether `path` lives strictly below `dir`.
pub fn is_strictly_under(dir: &str, path: &str) -> bool {
    let dir = normalize(dir);
    if dir == "/" {
        return path.len() > 1 && path.starts_with('/');
    }
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
}

/// 取得相對於工作目錄的路徑。 / Resolves the work-dir relative form of an absolute sandbox path.
pub fn relative_to<'a>(root: &str, path: &'a str) -> Result<&'a str, PathError> {
    let path = normalize(path);
    if !is_strictly_under(root, path) {
        return Err(PathError::OutsideRoot {
            path: path.to_string(),
            root: root.to_string(),
        });
    }
    let root = normalize(root);
    let offset = if root == "/" { 1 } else { root.len() + 1 };
    Ok(&path[offset..])
}

/// 將相對路徑接回工作目錄。 / Joins a relative path back onto the work dir.
pub fn join(root: &str, relative: &str) -> String {
    let root = normalize(root);
    let relative = relative.trim_start_matches('/');
    let relative = normalize(relative);
    if relative.is_empty() {
        root.to_string()
    } else if root == "/" {
        format!("/{relative}")
    } else {
        format!("{root}/{relative}")
    }
}

/// 父目錄路徑。 / Parent of an absolute path, `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    let path = normalize(path);
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(normalize("/home/workspace/src///"), "/home/workspace/src");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("///"), "/");
        assert_eq!(normalize("a/b"), "a/b");
    }

    #[test]
    fn strict_prefix_respects_directory_boundaries() {
        assert!(is_strictly_under("/w/src", "/w/src/index.ts"));
        assert!(!is_strictly_under("/w/src", "/w/src"));
        assert!(!is_strictly_under("/w/src", "/w/src2/index.ts"));
        assert!(is_strictly_under("/", "/w"));
    }

    #[test]
    fn relative_to_rejects_root_and_outside_paths() {
        assert_eq!(relative_to("/home/workspace", "/home/workspace/a/b.txt"), Ok("a/b.txt"));
        assert!(relative_to("/home/workspace", "/home/workspace").is_err());
        assert!(relative_to("/home/workspace", "/etc/passwd").is_err());
    }

    #[test]
    fn join_and_parent() {
        assert_eq!(join("/home/workspace", "src/main.rs"), "/home/workspace/src/main.rs");
        assert_eq!(join("/home/workspace/", ""), "/home/workspace");
        assert_eq!(parent("/home/workspace/src"), Some("/home/workspace"));
        assert_eq!(parent("/home"), Some("/"));
        assert_eq!(parent("/"), None);
    }
}
