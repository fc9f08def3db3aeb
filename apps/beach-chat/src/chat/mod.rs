//! Line-oriented terminal front end for a chat session.

pub mod app;
pub mod cli;
pub mod command;
pub mod error;
