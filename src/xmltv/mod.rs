//! XMLTV reading and writing
//!
//! The parser keeps every element it does not interpret as owned quick-xml
//! events, so a parse/write cycle preserves the guide's content and order.

pub mod parser;
pub mod writer;

pub use parser::parse_document;
pub use writer::{ProcessingMetadata, write_document};
