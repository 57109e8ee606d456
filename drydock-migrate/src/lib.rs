//! drydock migration CLI library
//!
//! Argument definitions and command handlers; `main.rs` wires them to the process.

pub mod cli;
pub mod commands;
