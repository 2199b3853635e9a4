//! Inbox Triage: unread mail in, phone notifications out.

pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod notify;
pub mod triage;
