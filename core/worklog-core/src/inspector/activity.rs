//! Activity tags derived from commit subjects.
//!
//! The tag strings appear in persisted artifacts and are matched by readers;
//! they must not change.

pub const SECURITY: &str = "セキュリティ強化";
pub const CLEANUP: &str = "ファイル整理";
pub const FEATURE: &str = "新機能追加";
pub const BUGFIX: &str = "バグ修正";
pub const UPDATE: &str = "アップデート";
pub const EDITING: &str = "ファイル変更中";
pub const ROUTINE: &str = "通常作業";

struct Rule {
    keyword: &'static str,
    emoji: &'static str,
    tag: &'static str,
}

// Order is the order tags appear in a snapshot.
const RULES: &[Rule] = &[
    Rule { keyword: "security", emoji: "🔒", tag: SECURITY },
    Rule { keyword: "clean", emoji: "🧹", tag: CLEANUP },
    Rule { keyword: "add", emoji: "✨", tag: FEATURE },
    Rule { keyword: "fix", emoji: "🐛", tag: BUGFIX },
    // Matches both the bare arrow and the emoji-presentation form.
    Rule { keyword: "update", emoji: "⬆", tag: UPDATE },
];

/// Tags for the newest subject, in table order.
///
/// With no keyword hit, a dirty working copy yields [`EDITING`] and anything
/// else [`ROUTINE`]. The result is never empty.
pub fn derive_activities(recent_subjects: &[String], dirty: bool) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    if let Some(latest) = recent_subjects.first() {
        let latest = latest.to_lowercase();
        tags.extend(
            RULES
                .iter()
                .filter(|rule| latest.contains(rule.keyword) || latest.contains(rule.emoji))
                .map(|rule| rule.tag.to_string()),
        );
    }

    if tags.is_empty() {
        tags.push(if dirty { EDITING } else { ROUTINE }.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fix_subject_maps_to_bugfix() {
        assert_eq!(derive_activities(&subjects(&["fix: bad index"]), false), vec![BUGFIX]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(derive_activities(&subjects(&["SECURITY patch"]), false), vec![SECURITY]);
    }

    #[test]
    fn emoji_matches() {
        assert_eq!(derive_activities(&subjects(&["🧹 tidy"]), false), vec![CLEANUP]);
        assert_eq!(derive_activities(&subjects(&["✨ shiny"]), false), vec![FEATURE]);
        assert_eq!(derive_activities(&subjects(&["🐛 squash"]), false), vec![BUGFIX]);
        assert_eq!(derive_activities(&subjects(&["🔒 lock down"]), false), vec![SECURITY]);
        assert_eq!(derive_activities(&subjects(&["⬆️ deps"]), false), vec![UPDATE]);
    }

    #[test]
    fn multiple_keywords_yield_tags_in_table_order() {
        let tags = derive_activities(&subjects(&["Fix and update the cleaner"]), true);
        assert_eq!(tags, vec![CLEANUP, BUGFIX, UPDATE]);
    }

    #[test]
    fn only_the_newest_subject_is_considered() {
        let tags = derive_activities(&subjects(&["docs", "fix: older"]), false);
        assert_eq!(tags, vec![ROUTINE]);
    }

    #[test]
    fn dirty_without_match_is_editing_not_routine() {
        let tags = derive_activities(&subjects(&["docs: tweak wording"]), true);
        assert_eq!(tags, vec![EDITING]);
    }

    #[test]
    fn dirty_with_match_keeps_only_keyword_tags() {
        let tags = derive_activities(&subjects(&["fix: bad index"]), true);
        assert_eq!(tags, vec![BUGFIX]);
    }

    #[test]
    fn nothing_known_is_routine() {
        assert_eq!(derive_activities(&[], false), vec![ROUTINE]);
    }
}
