//! # pdf-notes
//!
//! Watches a PDF viewer for page turns, keeps a local reading history, and
//! stores AI-generated notes for the pages you read.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  events  ┌──────────┐  tick  ┌────────────────┐
//! │ Lifecycle │────────▶│  Poller  │──────▶│ ChangeDetector │
//! │  Watcher  │  start/  └──────────┘       └───────┬────────┘
//! └───────────┘  stop                               │ page changed
//!       ▲                                           ▼
//! ┌─────┴─────┐  titles, path, text   ┌──────────────────────────┐
//! │HostBridge │◀─────────────────────│ RecordAndSummarize       │
//! │(osascript)│                       │ view count + note task   │
//! └───────────┘                       └──────┬─────────────┬─────┘
//!                                            ▼             ▼
//!                                     ┌───────────┐  ┌────────────┐
//!                                     │  SQLite   │  │Note service│
//!                                     │  store    │  │   (HTTP)   │
//!                                     └───────────┘  └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pdfnotes init            # create the database
//! pdfnotes watch           # follow the viewer until Ctrl-C
//! pdfnotes stats           # counts of documents, pages, views, notes
//! pdfnotes notes ~/papers/attention.pdf 3
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Row types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`store`] | Metadata store operations |
//! | [`extract`] | Page text extraction and sanitizing |
//! | [`bridge`] | Host automation bridge |
//! | [`poller`] | Page-change detection |
//! | [`handler`] | View recording and note requests |
//! | [`notes`] | Note service client |
//! | [`watcher`] | Viewer lifecycle watching |
//! | [`watch`] | The `watch` command |

pub mod bridge;
pub mod config;
pub mod db;
pub mod directives;
pub mod extract;
pub mod handler;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod notes;
pub mod poller;
pub mod show;
pub mod stats;
pub mod store;
pub mod watch;
pub mod watcher;
