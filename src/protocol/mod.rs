//! Protocol types shared with the wire transport.

pub mod messages;

pub use messages::{DataChunk, ParsedChunks, RequestData};
