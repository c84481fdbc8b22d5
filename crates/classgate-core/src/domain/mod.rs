//! Domain entities for Classgate.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from OS APIs, network libraries, file systems, or UI
//!   frameworks.
//! - Can be compiled and tested on any platform without any external setup.
//!
//! For Classgate the business rules are: how a user-typed destination becomes
//! a filter rule, and how a calendar becomes a set of "class windows" during
//! which blocking is suspended.  The agent's application layer depends on
//! these rules, but they never depend on it.

/// Calendar event shape consumed by the window transformer.
pub mod event;

/// Parsing of raw destination entries.
pub mod pattern;

/// Compilation of parsed entries into prioritised filter rules.
pub mod rules;

/// Class windows: transformer and point-in-time queries.
pub mod window;
