//! classgate-agent library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the agent do? (for beginners)
//!
//! The agent is the long-running process that keeps the blocking state in
//! step with the class calendar:
//!
//! 1. It reads the user's settings (blocked/allowed destinations and the
//!    selected calendar) from a TOML file.
//! 2. It refreshes the calendar's events and turns them into class windows.
//! 3. It decides whether "now" is inside a class window and applies either an
//!    empty rule set (everything reachable) or the compiled block rules.
//! 4. It arms a timer for the exact moment the decision will next change, so
//!    the switch happens on time without constant polling.

/// Application layer: the reconciliation use case and its collaborator ports.
pub mod application;

/// Infrastructure layer: file-backed stores, calendar feeds, enforcement, timers.
pub mod infrastructure;
