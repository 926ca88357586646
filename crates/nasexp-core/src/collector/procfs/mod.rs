//! Parsers for Linux `/proc` files.

pub mod parser;

pub use parser::ParseError;
