//! voice-chat-rs: voice-driven chat with a hosted language model.
//!
//! Speak or type a message, get the reply read aloud and typed out.

pub mod chat;
pub mod config;
pub mod controller;
pub mod error;
pub mod message;
pub mod recognition;
pub mod renderer;
pub mod synthesis;
pub mod tui;

pub use error::{Error, Result};
