//! Terminal client for a disposable-mailbox service.
//!
//! The core keeps one active address, mirrors its inbox by polling the
//! gateway, and applies read/delete actions optimistically with rollback.
//! `MailClient` is the entry point; `ui` draws it with ratatui.

pub mod app;
pub mod client;
pub mod clipboard;
pub mod config;
pub mod debug;
pub mod demo;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod mailbox;
pub mod message;
pub mod notice;
pub mod registry;
pub mod sync;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;
