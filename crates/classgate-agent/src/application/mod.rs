//! Application layer use cases for the agent.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules in `classgate-core`) and the infrastructure
//! (files, clocks, timers).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain functions to fulfil a user goal (e.g., "unblock
//!   sites for exactly as long as a class is running").
//! - **Depend on abstractions** (traits) rather than concrete implementations,
//!   so the infrastructure can be swapped without changing this code.
//! - **Contain no OS calls, no network I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`state`**         – Settings and runtime-state records plus the store
//!   ports that persist them.
//! - **`edit_settings`** – List and calendar edits behind the CLI commands.
//! - **`sync_calendar`** – The event-source port and the two-attempt
//!   re-authentication state machine around it.
//! - **`timers`**        – Named timers with an at-most-one-per-name registry.
//! - **`reconcile`**     – The reconciliation controller: sync, decide,
//!   apply, schedule.

pub mod edit_settings;
pub mod reconcile;
pub mod state;
pub mod sync_calendar;
pub mod timers;
