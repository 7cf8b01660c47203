//! `sqld`: a MySQL-wire-compatible relational front end over the `kv`
//! store's snapshot-isolated transactions, driven through `sql`'s
//! parse/analyze/optimize/execute pipeline. This crate supplies the parts
//! the pipeline itself doesn't: a per-connection session and transaction
//! coordinator, a connection registry `KILL` can reach, configuration and
//! logging in the reference CLI's own style, and the REPL/batch front ends
//! that drive it all.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod registry;
pub mod result;
pub mod rusty;
pub mod session;
pub mod trace;
