//! # Focus Coach
//!
//! A local, tool-augmented focus coach: a chat model proposes tool calls,
//! an orchestration loop runs them, and one of the tools searches a
//! knowledge base that a directory watcher keeps indexed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Watcher   │──▶│   Ingest     │──▶│  SQLite   │
//! │ (notify)   │   │ dedup+chunk  │   │FTS5+vector│
//! └────────────┘   └──────────────┘   └─────┬─────┘
//!                                           │ search_focus_strategy
//! ┌────────────┐   ┌──────────────┐   ┌─────┴─────┐
//! │   Model    │◀─▶│ CoachSession │◀─▶│   Tools   │
//! │ (OpenAI-   │   │ (agent loop) │   │ local/HTTP│
//! │ compatible)│   └──────────────┘   └───────────┘
//! └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! coach init                         # create database
//! coach watch                        # index ./documents as files appear
//! coach search "starting a task"     # query the knowledge base
//! coach embed                        # backfill missing vectors
//! coach chat                         # talk to the coach
//! coach serve                        # host the tools over REST + MCP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite chunk store |
//! | [`ingest`] | Dedup, chunk and persist one file |
//! | [`watch`] | Directory watcher feeding the pipeline |
//! | [`embedding`] | Ollama / OpenAI embedding providers |
//! | [`retrieval`] | Keyword or hybrid top-k search formatted for the model |
//! | [`traits`] | `Tool` trait and registry |
//! | [`builtin_tools`] | The five coach tools |
//! | [`transport`] | Local and HTTP tool transports |
//! | [`llm`] | OpenAI-compatible chat client |
//! | [`agent`] | Orchestration loop |
//! | [`server`] | REST tool host |
//! | [`mcp`] | MCP bridge |

pub mod agent;
pub mod builtin_tools;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod migrate;
pub mod retrieval;
pub mod server;
pub mod sqlite_store;
pub mod traits;
pub mod transport;
pub mod watch;
