//! Edits to the blocked/allowed lists and the selected calendar.
//!
//! These back the CLI's `block`, `unblock`, `allow`, `disallow`,
//! `add-common` and `set-calendar` commands.  Entries are stored as the user
//! typed them after trimming and lowercasing; the pattern compiler does the
//! real parsing at rule-build time, so `*`, `*.example.com` and
//! `example.com/path` are all kept verbatim.

use super::state::Settings;

/// Sites added by `add-common`.
pub const COMMON_DISTRACTING_SITES: [&str; 24] = [
    "youtube.com",
    "reddit.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "tiktok.com",
    "netflix.com",
    "twitch.tv",
    "discord.com",
    "9gag.com",
    "imgur.com",
    "buzzfeed.com",
    "tumblr.com",
    "pinterest.com",
    "snapchat.com",
    "linkedin.com",
    "hulu.com",
    "disneyplus.com",
    "primevideo.com",
    "hbomax.com",
    "crunchyroll.com",
    "espn.com",
    "twitch.com",
];

/// Which list an edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainList {
    Blocked,
    Allowed,
}

/// What an edit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditReport {
    /// Entries added or removed.
    pub changed: Vec<String>,
    /// Inputs that were empty, invalid for the list, or already in the
    /// requested state.
    pub skipped: Vec<String>,
}

/// Trims and lowercases a user-typed entry; `None` when nothing is left.
pub fn normalize_input(raw: &str) -> Option<String> {
    let entry = raw.trim().to_lowercase();
    (!entry.is_empty()).then_some(entry)
}

fn list_mut(settings: &mut Settings, list: DomainList) -> &mut Vec<String> {
    match list {
        DomainList::Blocked => &mut settings.blocked_domains,
        DomainList::Allowed => &mut settings.allowed_domains,
    }
}

/// Appends each new entry to `list`, keeping existing order.
///
/// `*` is accepted for the blocked list only.
pub fn add_domains<S: AsRef<str>>(
    settings: &mut Settings,
    list: DomainList,
    inputs: &[S],
) -> EditReport {
    let mut report = EditReport::default();
    let target = list_mut(settings, list);
    for raw in inputs {
        let entry = match normalize_input(raw.as_ref()) {
            Some(e) if !(e == "*" && list == DomainList::Allowed) => e,
            _ => {
                report.skipped.push(raw.as_ref().to_string());
                continue;
            }
        };
        if target.contains(&entry) {
            report.skipped.push(entry);
        } else {
            target.push(entry.clone());
            report.changed.push(entry);
        }
    }
    report
}

/// Removes every occurrence of each entry from `list`.
pub fn remove_domains<S: AsRef<str>>(
    settings: &mut Settings,
    list: DomainList,
    inputs: &[S],
) -> EditReport {
    let mut report = EditReport::default();
    let target = list_mut(settings, list);
    for raw in inputs {
        let Some(entry) = normalize_input(raw.as_ref()) else {
            report.skipped.push(raw.as_ref().to_string());
            continue;
        };
        let before = target.len();
        target.retain(|d| d.trim().to_lowercase() != entry);
        if target.len() < before {
            report.changed.push(entry);
        } else {
            report.skipped.push(entry);
        }
    }
    report
}

/// Adds [`COMMON_DISTRACTING_SITES`] to the blocked list.
pub fn add_common(settings: &mut Settings) -> EditReport {
    add_domains(settings, DomainList::Blocked, &COMMON_DISTRACTING_SITES)
}

/// Selects `calendar_id`, or clears the selection when it is blank.
///
/// Returns the previous selection.
pub fn set_calendar(settings: &mut Settings, calendar_id: &str) -> Option<String> {
    let id = calendar_id.trim();
    let next = (!id.is_empty()).then(|| id.to_string());
    std::mem::replace(&mut settings.selected_calendar_id, next)
}

/// Returns `true` if the fields that drive reconciliation differ.
pub fn relevant_change(old: &Settings, new: &Settings) -> bool {
    old.blocked_domains != new.blocked_domains
        || old.allowed_domains != new.allowed_domains
        || old.selected_calendar_id != new.selected_calendar_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Settings {
        Settings {
            blocked_domains: Vec::new(),
            ..Settings::default()
        }
    }

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(normalize_input("  YouTube.COM "), Some("youtube.com".to_string()));
        assert_eq!(normalize_input("   "), None);
    }

    #[test]
    fn test_add_skips_duplicates_and_blanks() {
        // Arrange
        let mut settings = empty();

        // Act
        let report = add_domains(
            &mut settings,
            DomainList::Blocked,
            &["Reddit.com", "reddit.com", " ", "*", "*.tiktok.com"],
        );

        // Assert
        assert_eq!(settings.blocked_domains, vec!["reddit.com", "*", "*.tiktok.com"]);
        assert_eq!(report.changed.len(), 3);
        assert_eq!(report.skipped, vec!["reddit.com", " "]);
    }

    #[test]
    fn test_match_all_is_not_allowed_in_allow_list() {
        let mut settings = empty();
        let report = add_domains(&mut settings, DomainList::Allowed, &["*", "docs.google.com"]);
        assert_eq!(settings.allowed_domains, vec!["docs.google.com"]);
        assert_eq!(report.skipped, vec!["*"]);
    }

    #[test]
    fn test_remove_matches_case_insensitively() {
        let mut settings = Settings::default();
        let report = remove_domains(&mut settings, DomainList::Blocked, &["YOUTUBE.com", "nope.com"]);
        assert_eq!(settings.blocked_domains, vec!["reddit.com", "x.com"]);
        assert_eq!(report.changed, vec!["youtube.com"]);
        assert_eq!(report.skipped, vec!["nope.com"]);
    }

    #[test]
    fn test_add_common_only_adds_missing_sites() {
        let mut settings = Settings::default();
        let report = add_common(&mut settings);
        assert_eq!(report.changed.len(), COMMON_DISTRACTING_SITES.len() - 3);
        assert_eq!(settings.blocked_domains.len(), COMMON_DISTRACTING_SITES.len());
        assert!(add_common(&mut settings).changed.is_empty());
    }

    #[test]
    fn test_set_calendar_blank_clears_selection() {
        let mut settings = empty();
        assert_eq!(set_calendar(&mut settings, " classes "), None);
        assert_eq!(settings.selected_calendar_id.as_deref(), Some("classes"));
        assert_eq!(set_calendar(&mut settings, ""), Some("classes".to_string()));
        assert_eq!(settings.selected_calendar_id, None);
    }

    #[test]
    fn test_relevant_change_detects_list_and_calendar_edits() {
        let old = Settings::default();
        let mut new = old.clone();
        assert!(!relevant_change(&old, &new));
        add_domains(&mut new, DomainList::Allowed, &["docs.google.com"]);
        assert!(relevant_change(&old, &new));

        let mut new = old.clone();
        set_calendar(&mut new, "classes");
        assert!(relevant_change(&old, &new));
    }
}
