//! Pipeline stages for Markdown-to-document rendering.
//!
//! Each submodule implements exactly one transformation step and returns a
//! new sequence rather than mutating its input.
//!
//! ## Data Flow
//!
//! ```text
//! sanitize ──▶ parse ──▶ table ──▶ diagram ──▶ build ──▶ paginate
//! (cleanup)  (events)  (normalise) (mmdc)    (Document)  (Pages)
//! ```
//!
//! 1. [`sanitize`]: strip control/invisible characters, normalise line
//!    endings, make the filename safe
//! 2. [`parse`]   : Markdown events → raw blocks; tables stay as source lines
//! 3. [`table`]   : raw table lines → [`crate::model::Table`], separator row
//!    consumed for alignment
//! 4. [`diagram`] : diagram source → image via the bounded diagram tool, or
//!    a placeholder; the only stage that spawns processes
//! 5. [`build`]   : blocks + metadata → [`crate::model::Document`]
//! 6. [`paginate`]: two-pass layout into [`crate::model::Page`]s; runs in
//!    `spawn_blocking` because it is CPU-bound

pub mod build;
pub mod diagram;
pub mod paginate;
pub mod parse;
pub mod sanitize;
pub mod table;
