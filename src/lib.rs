//! # Herbal Clinic
//!
//! A constitution-aware herbal consultation assistant.
//!
//! A user logs in with a free-text id, optionally records their constitution,
//! and describes symptoms. Each symptom is embedded, matched against a herb
//! knowledge index, turned into a prescription prompt, answered by a hosted
//! language model, and logged to an append-only record store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌────────┐   ┌────────────┐
//! │ symptom  │──▶│ embedding │──▶│  index   │──▶│ prompt │──▶│ generation │
//! └──────────┘   └───────────┘   └──────────┘   └────────┘   └─────┬──────┘
//!                                                                  │
//!       ┌──────────┐   ┌──────────┐                        ┌───────▼──────┐
//!       │   CLI    │   │   HTTP   │◀──── chat engine ─────▶│ record store │
//!       │  (herb)  │   │   API    │                        └──────────────┘
//!       └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_API_KEY=... PINECONE_API_KEY=...
//! herb init                         # create the local record tables
//! herb chat --user kim              # interactive consultation
//! herb ask --user kim "I feel bloated after meals"
//! herb search "insomnia"            # inspect retrieved herbs only
//! herb serve                        # JSON API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`secrets`] | API key loading (secrets file, then environment) |
//! | [`models`] | Core data types |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index clients |
//! | [`prompt`] | Prescription prompt assembly |
//! | [`generation`] | Generation provider abstraction |
//! | [`records`] | User and diagnosis record stores |
//! | [`chat`] | Consultation orchestration |
//! | [`repl`] | Terminal consultation loop |
//! | [`server`] | HTTP consultation API |

pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod google_auth;
pub mod http;
pub mod index;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod records;
pub mod repl;
pub mod secrets;
pub mod server;
