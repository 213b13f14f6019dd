//! Configuration management for media-audit
//!
//! - **settings**: feed and storage settings loaded from `config.toml`, with
//!   environment overrides applied on top

pub mod settings;

pub use settings::Settings;
