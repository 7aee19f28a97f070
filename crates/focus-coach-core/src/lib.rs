//! # Focus Coach Core
//!
//! Shared, I/O-free logic for focus-coach: the conversation data model,
//! the text sanitizer, the transcript, the tool registry adapter, the line
//! chunker, the chunk store abstraction and its vector helpers.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem code. Everything
//! that talks to the outside world lives in the `focus-coach` crate and
//! plugs into the traits defined here.

pub mod chunk;
pub mod models;
pub mod sanitize;
pub mod store;
pub mod tools;
pub mod transcript;
pub mod vector;
