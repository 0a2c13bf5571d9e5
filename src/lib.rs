//! MagicMirror - voice assistant backend
//!
//! A browser streams microphone audio in, gets transcripts back, chats with a
//! persona-driven language model and hears the replies in a cloned voice.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Main app (port 5000)                  │
//! │  accounts │ /api/recognize │ /api/chat │ speakers     │
//! └──────┬──────────────┬────────────┬──────────┬────────┘
//!        │              │            │          │ HTTP
//!    SQLite        Transcriber   ChatBackend    ▼
//!                                      ┌────────────────────┐
//!                                      │ TTS service (5001) │
//!                                      │  SynthesisEngine   │
//!                                      └─────────┬──────────┘
//!                                                │
//!                                          VoiceModel server
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod error;
pub mod security;
pub mod stt;
pub mod tts;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
