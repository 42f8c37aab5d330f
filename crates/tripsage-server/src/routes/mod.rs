//! Request handlers

pub mod agents;
pub mod chat;
pub mod demo;
pub mod hooks;
pub mod jobs;
pub mod keys;
pub mod ops;
