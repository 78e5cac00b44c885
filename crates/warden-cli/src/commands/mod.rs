//! Subcommand implementations for the `warden` binary.

pub mod check;
pub mod dead_letters;
pub mod serve;
