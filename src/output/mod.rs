//! Output formatting module
//!
//! Renders job outcomes for humans and machines.

mod formatter;

pub use formatter::{Formatter, FormatterSet, OutputFormat};
