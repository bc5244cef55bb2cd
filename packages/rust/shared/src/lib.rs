//! Shared types, error model, and configuration for ContactLink.
//!
//! This crate is the foundation depended on by all other ContactLink crates.
//! It provides:
//! - [`ContactLinkError`] — the unified error type
//! - Domain types ([`Contact`], [`ContactDraft`], [`LinkPrecedence`], [`ContactId`])
//! - Wire types ([`IdentifyRequest`], [`IdentifyResponse`], [`IdentityView`])
//! - Configuration ([`AppConfig`], [`EngineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, EngineConfig, EngineSection, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{ContactLinkError, ErrorKind, Result};
pub use types::{
    Contact, ContactDraft, ContactId, ErrorResponse, IdentifyRequest, IdentifyResponse,
    IdentityView, LinkPrecedence, MISSING_IDENTIFIER,
};
