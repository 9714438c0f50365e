//! Path-shaped cache keys.
//!
//! Keys are `/`-separated segments, e.g. `"fish/child/child"`. Only
//! [`ScopedCache::remove_children`](super::ScopedCache::remove_children)
//! interprets the structure; every other operation treats keys as opaque.

/// Segment separator inside cache keys.
pub const KEY_SEPARATOR: char = '/';

/// Returns true if `key` equals `prefix` or is nested below it.
///
/// `"fish"` covers `"fish"` and `"fish/child"` but not `"fishy"`.
/// Trailing separators on the prefix are ignored, so an empty prefix
/// (or `"/"`) covers every key.
pub fn is_same_or_child(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches(KEY_SEPARATOR);
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(KEY_SEPARATOR),
        None => false,
    }
}

/// Join a parent key and a child segment with exactly one separator.
pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches(KEY_SEPARATOR);
    let child = child.trim_start_matches(KEY_SEPARATOR);
    if parent.is_empty() {
        return child.to_string();
    }
    format!("{}{}{}", parent, KEY_SEPARATOR, child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_are_matched() {
        assert!(is_same_or_child("fish", "fish"));
        assert!(is_same_or_child("fish/child", "fish"));
        assert!(is_same_or_child("fish/child/child", "fish"));
        assert!(is_same_or_child("fish/child", "fish/"));
    }

    #[test]
    fn test_siblings_are_not_matched() {
        assert!(!is_same_or_child("fishy", "fish"));
        assert!(!is_same_or_child("other", "fish"));
        assert!(!is_same_or_child("fis", "fish"));
        assert!(!is_same_or_child("a/fish", "fish"));
    }

    #[test]
    fn test_root_prefix_matches_everything() {
        assert!(is_same_or_child("anything/at/all", ""));
        assert!(is_same_or_child("x", "/"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("fish", "child"), "fish/child");
        assert_eq!(join("fish/", "/child"), "fish/child");
        assert_eq!(join("", "child"), "child");
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_joined_key_is_child_of_parent(
                parent in "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
                child in "[a-z]{1,8}",
            ) {
                let key = join(&parent, &child);
                prop_assert!(is_same_or_child(&key, &parent));
                prop_assert!(!is_same_or_child(&parent, &key));
            }

            #[test]
            fn prop_suffix_without_separator_is_not_child(
                prefix in "[a-z]{1,8}",
                tail in "[a-z0-9]{1,4}",
            ) {
                let key = format!("{}{}", prefix, tail);
                prop_assert!(!is_same_or_child(&key, &prefix));
            }
        }
    }
}
