#![deny(missing_docs)]
//! KTP/NPWP intake bot library.
//!
//! Telegram conversation flow, AI vision extraction and Google Sheets/Drive
//! archiving for Indonesian identity documents.

/// Telegram handlers, keyboards and message texts.
pub mod bot;
/// Configuration management.
pub mod config;
/// Extracted document model and sheet row layout.
pub mod document;
/// Google OAuth, Sheets and Drive clients.
pub mod google;
/// AI vision providers and extraction client.
pub mod llm;
/// In-memory per-user conversation sessions.
pub mod session;
/// Utility functions.
pub mod utils;
/// Field validators for KTP/NPWP data.
pub mod validators;
