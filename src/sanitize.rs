use std::path::{Component, Path, PathBuf};

pub(crate) const FALLBACK_COMPONENT: &str = "unnamed";
const MAX_COMPONENT_LEN: usize = 128;

/// Reduces an untrusted identifier to a single filename component.
///
/// Separators (`/` and `\`) split the identifier into segments; empty, `.` and
/// `..` segments are dropped and the rest are joined with `_`. Anything outside
/// `[A-Za-z0-9._-]` becomes `_`, leading dots are stripped and the result is
/// capped in length. Never fails: an identifier with nothing usable left maps to
/// [`FALLBACK_COMPONENT`].
pub(crate) fn sanitize_component(raw: &str) -> String {
    let joined = raw
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("_");

    let mut out = String::with_capacity(joined.len());
    for ch in joined.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    let trimmed: String = out
        .trim_start_matches('.')
        .chars()
        .take(MAX_COMPONENT_LEN)
        .collect();
    if trimmed.is_empty() || trimmed.chars().all(|ch| ch == '.' || ch == '_') {
        FALLBACK_COMPONENT.to_string()
    } else {
        trimmed
    }
}

/// Builds `<base>/<sanitized raw><suffix>`, guaranteed to be a direct child of `base`.
pub(crate) fn confined_path(base: &Path, raw: &str, suffix: &str) -> PathBuf {
    let candidate = base.join(format!("{}{}", sanitize_component(raw), suffix));
    if is_direct_child(base, &candidate) {
        candidate
    } else {
        base.join(format!("{}{}", FALLBACK_COMPONENT, suffix))
    }
}

/// True when `path` names an entry directly inside `base` (lexically, no `..`).
pub(crate) fn is_direct_child(base: &Path, path: &Path) -> bool {
    let Ok(rest) = path.strip_prefix(base) else {
        return false;
    };
    let mut components = rest.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_parent_segments_and_separators() {
        assert_eq!(sanitize_component("../../evil_file"), "evil_file");
        assert_eq!(sanitize_component("..\\..\\evil_file"), "evil_file");
        assert_eq!(sanitize_component("/etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_component("C:\\Windows\\x"), "C__Windows_x");
        assert_eq!(sanitize_component("nested/../id"), "nested_id");
    }

    #[test]
    fn keeps_plain_identifiers() {
        assert_eq!(sanitize_component("sync_addTask_1a2b"), "sync_addTask_1a2b");
        assert_eq!(sanitize_component("TAG-123.v2"), "TAG-123.v2");
    }

    #[test]
    fn replaces_unsafe_characters_and_hidden_prefixes() {
        assert_eq!(sanitize_component("a b:c*d"), "a_b_c_d");
        assert_eq!(sanitize_component(".hidden"), "hidden");
        assert_eq!(sanitize_component("...x"), "x");
    }

    #[test]
    fn falls_back_when_nothing_is_left() {
        assert_eq!(sanitize_component(""), FALLBACK_COMPONENT);
        assert_eq!(sanitize_component(".."), FALLBACK_COMPONENT);
        assert_eq!(sanitize_component("../.."), FALLBACK_COMPONENT);
        assert_eq!(sanitize_component("///"), FALLBACK_COMPONENT);
        assert_eq!(sanitize_component("\u{0}"), FALLBACK_COMPONENT);
    }

    #[test]
    fn caps_component_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_component(&long).len(), MAX_COMPONENT_LEN);
    }

    #[test]
    fn confined_path_never_leaves_base() {
        let base = Path::new("/srv/bridge/responses");
        for raw in [
            "../../evil_file",
            "..\\..\\evil_file",
            "/absolute/path",
            "\\\\server\\share",
            "..",
            "ok/../../..",
            "~/.ssh/id_rsa",
        ] {
            let path = confined_path(base, raw, "_response.json");
            assert_eq!(path.parent(), Some(base), "escaped for {raw:?}: {path:?}");
            assert!(is_direct_child(base, &path), "not a child for {raw:?}");
        }
    }

    #[test]
    fn is_direct_child_rejects_nested_and_outside_paths() {
        let base = Path::new("/srv/in");
        assert!(is_direct_child(base, Path::new("/srv/in/cmd.json")));
        assert!(!is_direct_child(base, Path::new("/srv/in/sub/cmd.json")));
        assert!(!is_direct_child(base, Path::new("/srv/cmd.json")));
        assert!(!is_direct_child(base, Path::new("/srv/in/../cmd.json")));
        assert!(!is_direct_child(base, Path::new("/srv/in")));
    }
}
