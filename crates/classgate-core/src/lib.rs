//! # classgate-core
//!
//! Policy engine for Classgate containing the domain pattern compiler, the
//! calendar-event-to-window transformer, and the window query functions.
//!
//! This crate is used by the agent application and by anything else that needs
//! to reproduce a blocking decision.  It has zero dependencies on OS APIs,
//! network sockets, or storage.
//!
//! # Architecture overview (for beginners)
//!
//! Classgate blocks distracting websites *outside* of scheduled classes and
//! lifts the block while a class is running.  The decision is driven by two
//! inputs:
//!
//! - A list of blocked (and explicitly allowed) destinations typed in by the
//!   user, such as `youtube.com`, `*.reddit.com` or `google.com/maps`.
//! - A calendar whose timed events describe when classes take place.
//!
//! This crate turns those inputs into something a filtering host can enforce:
//!
//! - **`domain::pattern`** – Parses raw user entries into structured
//!   [`ParsedEntry`] values and renders the `||domain^` style URL filters.
//!
//! - **`domain::rules`** – Compiles parsed entries into prioritised
//!   [`CompiledRule`]s.  Allow rules always outrank block rules.
//!
//! - **`domain::event`** – The calendar event shape as exported by the
//!   calendar provider ([`RawEvent`]).
//!
//! - **`domain::window`** – Converts raw events into a canonical set of
//!   [`TimeWindow`]s and answers "are we in class?" and "when is the next
//!   transition?".

pub mod domain;

// Re-export the most-used types at the crate root so callers can write
// `classgate_core::TimeWindow` instead of `classgate_core::domain::window::TimeWindow`.
pub use domain::event::{EventTime, RawEvent};
pub use domain::pattern::{build_url_filter, parse_entries, parse_entry, ParsedEntry};
pub use domain::rules::{
    build_blocking_rules, has_wildcard_block, CompiledRule, ResourceType, RuleAction,
    ALLOW_PRIORITY, ALLOW_RULE_ID_BASE, BLOCK_PRIORITY, BLOCK_RULE_ID_BASE, MATCH_ALL_FILTER,
};
pub use domain::window::{
    canonicalize, compute_class_windows_from_events, is_in_class_at, next_boundary_after,
    validate_canonical, TimeWindow, WindowError,
};
