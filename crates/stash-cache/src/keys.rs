//! Cache key generation utilities.

use std::path::{Component, Path};
use url::form_urlencoded::byte_serialize;

/// Resolve the object key for a mount of `repo` on `branch`.
///
/// Each segment is form-urlencoded so separators inside a repo or branch
/// name (`org/app`, `feature/x`) can never make two triples collide.
pub fn resolve(repo: &str, branch: &str, mount: &Path) -> String {
    format!(
        "{}/{}/{}",
        encode_segment(repo),
        encode_segment(branch),
        encode_segment(&normalize_mount(mount))
    )
}

/// Same as [`resolve`], with an optional prefix prepended verbatim.
pub fn resolve_with_prefix(prefix: Option<&str>, repo: &str, branch: &str, mount: &Path) -> String {
    let key = resolve(repo, branch, mount);
    match prefix {
        Some(p) if !p.is_empty() => format!("{}{}", p, key),
        _ => key,
    }
}

/// Lexically normalise a mount path: `./data`, `data/` and `data` agree.
///
/// `..` components are kept as-is; nothing touches the filesystem.
pub fn normalize_mount(mount: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;

    for component in mount.components() {
        match component {
            Component::RootDir => absolute = true,
            Component::Prefix(p) => parts.push(p.as_os_str().to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => parts.push("..".to_string()),
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

fn encode_segment(segment: &str) -> String {
    let encoded: String = byte_serialize(segment.as_bytes()).collect();
    // Some stores reject `.` and `..` path segments in object names.
    match encoded.as_str() {
        "." | ".." => encoded.replace('.', "%2E"),
        _ => encoded,
    }
}

/// Encode a key as a single, reversible file name.
pub fn key_to_file_name(key: &str) -> String {
    byte_serialize(key.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_stable() {
        let a = resolve("drone-s3-cache", "master", Path::new("./tmp/1"));
        let b = resolve("drone-s3-cache", "master", Path::new("./tmp/1"));
        assert_eq!(a, b);
        assert_eq!(a, "drone-s3-cache/master/tmp%2F1");
    }

    #[test]
    fn test_equivalent_mount_spellings_share_a_key() {
        let plain = resolve("repo", "main", Path::new("data"));
        assert_eq!(resolve("repo", "main", Path::new("./data")), plain);
        assert_eq!(resolve("repo", "main", Path::new("data/")), plain);
        assert_eq!(resolve("repo", "main", Path::new("./data/./")), plain);
    }

    #[test]
    fn test_distinct_mounts_do_not_collide() {
        let a = resolve("repo", "main", Path::new("node_modules"));
        let b = resolve("repo", "main", Path::new("vendor"));
        let nested = resolve("repo", "main", Path::new("app/node_modules"));
        let absolute = resolve("repo", "main", Path::new("/app/node_modules"));
        assert_ne!(a, b);
        assert_ne!(a, nested);
        assert_ne!(nested, absolute);
    }

    #[test]
    fn test_slashes_in_repo_and_branch_are_encoded() {
        let a = resolve("org/app", "x", Path::new("data"));
        let b = resolve("org", "app/x", Path::new("data"));
        assert_ne!(a, b);
        assert_eq!(a, "org%2Fapp/x/data");
        assert_eq!(b, "org/app%2Fx/data");
    }

    #[test]
    fn test_branch_changes_key() {
        let feature = resolve("repo", "feature-x", Path::new("data"));
        let master = resolve("repo", "master", Path::new("data"));
        assert_ne!(feature, master);
    }

    #[test]
    fn test_normalize_mount() {
        assert_eq!(normalize_mount(Path::new(".")), ".");
        assert_eq!(normalize_mount(Path::new("./")), ".");
        assert_eq!(normalize_mount(Path::new("../shared")), "../shared");
        assert_eq!(normalize_mount(Path::new("/cache//deps")), "/cache/deps");
    }

    #[test]
    fn test_prefix_is_prepended() {
        let key = resolve_with_prefix(Some("ci/"), "repo", "main", Path::new("data"));
        assert_eq!(key, "ci/repo/main/data");
        let key = resolve_with_prefix(Some(""), "repo", "main", Path::new("data"));
        assert_eq!(key, "repo/main/data");
    }

    #[test]
    fn test_dot_segments_are_escaped() {
        assert_eq!(resolve("repo", "main", Path::new(".")), "repo/main/%2E");
        assert_eq!(resolve("..", "main", Path::new("data")), "%2E%2E/main/data");
    }

    #[test]
    fn test_key_to_file_name_is_flat() {
        assert_eq!(key_to_file_name("org%2Fapp/main/data"), "org%252Fapp%2Fmain%2Fdata");
        assert_ne!(key_to_file_name("a_b/c/d"), key_to_file_name("a/b_c/d"));
    }
}
