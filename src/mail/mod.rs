//! Mail ingestion: retrieval, decoding, and record building.

pub mod decode;
pub mod imap;
pub mod record;

pub use imap::{ImapConfig, ImapMailbox, MailSource};
pub use record::{NormalizedMessage, RawMessage, build};
