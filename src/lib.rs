//! Bring a hosted JavaScript repository up inside a sandbox runtime and
//! report where its dev server listens.

pub mod config;
pub mod configure;
pub mod editor;
pub mod github;
pub mod launcher;
pub mod log;
pub mod materialize;
pub mod orchestrator;
pub mod sandbox;
pub mod server;
