//! code-runner library
//!
//! This crate provides the execution engine behind the code-runner daemon:
//! - Language registry mapping identifiers to build/run recipes
//! - Per-request workspaces with guaranteed teardown
//! - Deadline-bound process runner with process-group kill
//! - MCP server exposing `execute` and `list_languages`

pub mod config;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod registry;
pub mod runner;
pub mod workspace;
