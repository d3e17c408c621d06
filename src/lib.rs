//! Turns a free text description of a work day into delimited rows ready to be pasted into a
//! time tracking system. Slash commands are expanded locally, a language model does the
//! interpretation, and the result is shaped by the user's own column layout.
//!

pub mod cli;
pub mod fs;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod utils;
