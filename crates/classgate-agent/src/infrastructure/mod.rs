//! Infrastructure layer for the agent.
//!
//! Contains the OS-facing adapters behind the application ports: the TOML
//! config and settings file, the JSON runtime-state file, the on-disk
//! calendar feed, the rule sinks, and tokio-backed timers.  `control` carries
//! one-shot CLI requests to a running daemon.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `classgate_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod calendar;
pub mod control;
pub mod enforcement;
pub mod storage;
pub mod timer;
