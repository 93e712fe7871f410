//! # chatline-protocol
//!
//! Wire protocol definitions for the chatline live-update service.
//!
//! The protocol is line oriented: one UTF-8 command per line, terminated by
//! `\n`. Newlines inside a payload travel as the two characters `\` `n`.
//!
//! ## Commands
//!
//! - `USERNAME` / `PUBKEY` / `SIGN <nonce>` / `CHANNEL` - handshake prompts
//! - `ACK` - handshake complete (server) or delivery acknowledged (client)
//! - `MSG` / `ONLINE` / `OFFLINE` - pushes carrying a JSON payload
//! - `DISCONNECT` - best-effort notice before teardown
//!
//! ## Example
//!
//! ```rust
//! use chatline_protocol::{escape, unescape, ServerLine};
//!
//! let line = ServerLine::Sign("4f1c".to_string());
//! assert_eq!(line.to_string(), "SIGN 4f1c");
//! assert_eq!(ServerLine::parse("SIGN 4f1c").unwrap(), line);
//!
//! assert_eq!(unescape(&escape("a\nb")), "a\nb");
//! ```

pub mod codec;
pub mod frames;

pub use codec::{escape, unescape, LineCodec, LineCodecError, DEFAULT_MAX_LINE_LENGTH};
pub use frames::{ServerLine, ACK};
