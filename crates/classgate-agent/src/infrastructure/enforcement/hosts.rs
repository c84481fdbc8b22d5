//! Hosts-file enforcement.
//!
//! Blocked hosts are pointed at `0.0.0.0` inside a managed section:
//!
//! ```text
//! 127.0.0.1 localhost
//!
//! # BEGIN classgate (managed)
//! 0.0.0.0 youtube.com
//! 0.0.0.0 www.youtube.com
//! # END classgate (managed)
//! ```
//!
//! Lines outside the markers are never touched.  A hosts file can only block
//! whole host names, so rules with a path, the match-all rule, and hosts
//! with a port are left to the other sinks.  An allow rule covers its host
//! and every subdomain of it, the way `||host` matches in the rule set, so no
//! covered name is written, including generated `www.` variants.
//!
//! The file is replaced atomically (through any symlink, keeping its
//! permissions).  Resolvers may keep serving cached answers after a change,
//! so the sink can run configured cache-flush commands once the file has
//! changed.  They are best-effort: a failing command is logged and ignored.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use classgate_core::{CompiledRule, RuleAction};
use tracing::{debug, info, warn};

use crate::application::reconcile::{ApplyError, RuleSink};
use crate::infrastructure::storage::write_atomic;

pub const BEGIN_MARKER: &str = "# BEGIN classgate (managed)";
pub const END_MARKER: &str = "# END classgate (managed)";

const SINKHOLE: &str = "0.0.0.0";

/// Host named by an anchored, path-free filter such as `||example.com^`.
fn bare_host(rule: &CompiledRule) -> Option<&str> {
    let host = rule.url_filter.strip_prefix("||")?.strip_suffix('^')?;
    let plain = !host.is_empty() && !host.contains([':', '[', '/']);
    plain.then_some(host)
}

/// Host an allow rule opens up, with any path or port dropped.
///
/// `||youtube.com/feed/` still yields `youtube.com`: the hosts file cannot
/// open one path, so the whole host stays reachable there.
fn allowed_host(rule: &CompiledRule) -> Option<&str> {
    let rest = rule.url_filter.strip_prefix("||")?;
    let end = rest.find(['/', '^']).unwrap_or(rest.len());
    let host = &rest[..end];
    if host.is_empty() || host.starts_with('[') {
        return None;
    }
    Some(host.split(':').next().unwrap_or(host))
}

fn is_covered(name: &str, allowed: &[&str]) -> bool {
    allowed.iter().any(|a| {
        name == *a
            || name
                .strip_suffix(*a)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Host names to sinkhole for `rules`, in rule order without duplicates.
pub fn hosts_entries(rules: &[CompiledRule]) -> Vec<String> {
    let allowed: Vec<&str> = rules
        .iter()
        .filter(|r| r.action == RuleAction::Allow)
        .filter_map(allowed_host)
        .collect();

    let mut seen = HashSet::new();
    let mut hosts = Vec::new();
    let blocked = rules
        .iter()
        .filter(|r| r.action == RuleAction::Block)
        .filter_map(bare_host);
    for host in blocked {
        let www = (host.parse::<IpAddr>().is_err() && !host.starts_with("www."))
            .then(|| format!("www.{host}"));
        for name in std::iter::once(host.to_string()).chain(www) {
            if is_covered(&name, &allowed) {
                debug!("{name} left out of hosts; an allow rule covers it");
                continue;
            }
            if seen.insert(name.clone()) {
                hosts.push(name);
            }
        }
    }
    hosts
}

fn strip_managed(existing: &str) -> String {
    let mut out = String::with_capacity(existing.len());
    let mut inside = false;
    for line in existing.lines() {
        match line.trim() {
            BEGIN_MARKER => inside = true,
            END_MARKER if inside => inside = false,
            _ if inside => {}
            _ => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    let kept = out.trim_end_matches('\n');
    if kept.is_empty() {
        String::new()
    } else {
        format!("{kept}\n")
    }
}

/// Returns `existing` with its managed section replaced by one for `hosts`.
///
/// With no hosts the managed section is removed entirely.
pub fn render_hosts(existing: &str, hosts: &[String]) -> String {
    let mut out = strip_managed(existing);
    if hosts.is_empty() {
        return out;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    for host in hosts {
        out.push_str(&format!("{SINKHOLE} {host}\n"));
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

/// [`RuleSink`] that maintains a managed section of a hosts file.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
    flush_commands: Vec<Vec<String>>,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_commands: Vec::new(),
        }
    }

    /// Commands (program then arguments) run after each change to the file.
    pub fn with_flush_commands(mut self, commands: Vec<Vec<String>>) -> Self {
        self.flush_commands = commands;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: std::io::Error) -> ApplyError {
        ApplyError::Io(format!("{}: {e}", self.path.display()))
    }

    /// The file actually written: `/etc/hosts` is a symlink on some systems,
    /// and renaming over the link would replace it with a plain file.
    async fn target(&self) -> Result<PathBuf, ApplyError> {
        match tokio::fs::canonicalize(&self.path).await {
            Ok(resolved) => Ok(resolved),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(self.path.clone()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn flush_dns_cache(&self) {
        for command in &self.flush_commands {
            let Some((program, args)) = command.split_first() else {
                continue;
            };
            match tokio::process::Command::new(program).args(args).output().await {
                Ok(output) if output.status.success() => debug!("ran {program}"),
                Ok(output) => warn!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!("could not run {program}: {e}"),
            }
        }
    }
}

#[async_trait]
impl RuleSink for HostsFile {
    async fn apply_rules(&self, rules: &[CompiledRule]) -> Result<(), ApplyError> {
        let target = self.target().await?;
        let (existing, permissions) = match tokio::fs::read_to_string(&target).await {
            Ok(content) => {
                let meta = tokio::fs::metadata(&target)
                    .await
                    .map_err(|e| self.io_error(e))?;
                (content, Some(meta.permissions()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (String::new(), None),
            Err(e) => return Err(self.io_error(e)),
        };

        let hosts = hosts_entries(rules);
        let updated = render_hosts(&existing, &hosts);
        if updated == existing {
            debug!("{} already up to date", self.path.display());
            return Ok(());
        }

        write_atomic(&target, updated.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        if let Some(permissions) = permissions {
            tokio::fs::set_permissions(&target, permissions)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        info!("{} hosts blocked in {}", hosts.len(), self.path.display());
        self.flush_dns_cache().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classgate_core::build_blocking_rules;
    use uuid::Uuid;

    const NONE: &[&str] = &[];

    #[test]
    fn test_entries_add_www_variant() {
        let rules = build_blocking_rules(&["youtube.com", "www.reddit.com"], NONE);
        assert_eq!(
            hosts_entries(&rules),
            vec!["youtube.com", "www.youtube.com", "www.reddit.com"]
        );
    }

    #[test]
    fn test_entries_skip_paths_ports_and_match_all() {
        let rules = build_blocking_rules(&["reddit.com/r/all", "localhost:3000", "*"], NONE);
        assert!(hosts_entries(&rules).is_empty());

        let rules = build_blocking_rules(&["reddit.com/r/all", "localhost:3000"], NONE);
        assert!(hosts_entries(&rules).is_empty());
    }

    #[test]
    fn test_entries_ip_literal_gets_no_www_variant() {
        let rules = build_blocking_rules(&["10.0.0.8"], NONE);
        assert_eq!(hosts_entries(&rules), vec!["10.0.0.8"]);
    }

    #[test]
    fn test_entries_drop_exactly_allowed_hosts() {
        let rules = build_blocking_rules(&["youtube.com", "x.com"], &["x.com"]);
        assert_eq!(hosts_entries(&rules), vec!["youtube.com", "www.youtube.com"]);
    }

    #[test]
    fn test_entries_drop_allowed_www_variant() {
        let rules = build_blocking_rules(&["youtube.com"], &["www.youtube.com"]);
        assert_eq!(hosts_entries(&rules), vec!["youtube.com"]);
    }

    #[test]
    fn test_entries_drop_subdomains_of_allowed_host() {
        // Arrange: the allow rule ||reddit.com^ also matches m.reddit.com
        let rules = build_blocking_rules(&["m.reddit.com", "youtube.com"], &["reddit.com"]);

        // Act
        let entries = hosts_entries(&rules);

        // Assert
        assert_eq!(entries, vec!["youtube.com", "www.youtube.com"]);
    }

    #[test]
    fn test_entries_suffix_match_respects_label_boundary() {
        // notreddit.com is not a subdomain of reddit.com
        let rules = build_blocking_rules(&["notreddit.com"], &["reddit.com"]);
        assert_eq!(hosts_entries(&rules), vec!["notreddit.com", "www.notreddit.com"]);
    }

    #[test]
    fn test_entries_path_allow_keeps_host_reachable() {
        let rules = build_blocking_rules(&["youtube.com"], &["youtube.com/feed/subscriptions"]);
        assert!(hosts_entries(&rules).is_empty());
    }

    #[test]
    fn test_render_preserves_unmanaged_lines() {
        // Arrange
        let existing = "127.0.0.1 localhost\n::1 localhost\n";

        // Act
        let rendered = render_hosts(existing, &["a.com".to_string()]);

        // Assert
        assert_eq!(
            rendered,
            "127.0.0.1 localhost\n::1 localhost\n\n\
             # BEGIN classgate (managed)\n0.0.0.0 a.com\n# END classgate (managed)\n"
        );
    }

    #[test]
    fn test_render_replaces_previous_section_and_is_stable() {
        let first = render_hosts("127.0.0.1 localhost\n", &["a.com".to_string()]);
        let second = render_hosts(&first, &["b.com".to_string()]);

        assert!(!second.contains("a.com"));
        assert!(second.contains("0.0.0.0 b.com"));
        assert_eq!(render_hosts(&second, &["b.com".to_string()]), second);
    }

    #[test]
    fn test_render_with_no_hosts_removes_section() {
        let blocked = render_hosts("127.0.0.1 localhost\n", &["a.com".to_string()]);
        assert_eq!(render_hosts(&blocked, &[]), "127.0.0.1 localhost\n");
    }

    #[tokio::test]
    async fn test_hosts_file_unchanged_content_is_not_rewritten() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost\n").unwrap();
        let sink = HostsFile::new(&path);
        let rules = build_blocking_rules(&["youtube.com"], NONE);

        // Act
        sink.apply_rules(&rules).await.unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        sink.apply_rules(&rules).await.unwrap();

        // Assert
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("127.0.0.1 localhost\n"));
        assert!(content.contains("0.0.0.0 www.youtube.com"));
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);

        // Act: entering class clears the section
        sink.apply_rules(&[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "127.0.0.1 localhost\n");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hosts_file_written_through_symlink_keeps_link() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let real = dir.join("hosts.real");
        let link = dir.join("hosts");
        std::fs::write(&real, "127.0.0.1 localhost\n").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let sink = HostsFile::new(&link);

        // Act
        sink.apply_rules(&build_blocking_rules(&["youtube.com"], NONE))
            .await
            .unwrap();

        // Assert
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert!(std::fs::read_to_string(&real).unwrap().contains("0.0.0.0 youtube.com"));
        assert!(!dir.join("hosts.real.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_flush_commands_run_only_when_file_changes() {
        // Arrange: the "flush" appends a line to a log file
        let dir = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let log = dir.join("flushes");
        let flush = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo flushed >> '{}'", log.display()),
        ];
        let failing = vec!["/nonexistent/flush-tool".to_string()];
        let sink = HostsFile::new(dir.join("hosts")).with_flush_commands(vec![failing, flush]);
        let rules = build_blocking_rules(&["youtube.com"], NONE);

        // Act
        sink.apply_rules(&rules).await.unwrap();
        sink.apply_rules(&rules).await.unwrap();

        // Assert: one change, one flush; the missing tool did not fail the apply
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "flushed\n");

        std::fs::remove_dir_all(&dir).ok();
    }
}
