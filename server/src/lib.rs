pub mod chatbot;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod provider;
pub mod recorder;
pub mod store;
pub mod types;
pub mod webhook;
