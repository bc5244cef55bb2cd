//! Identity consolidation core for ContactLink.
//!
//! [`Engine::resolve`] matches a request's email/phone against stored
//! contacts, merges competing primaries (oldest wins), links new information
//! as a secondary contact, and returns the canonical [`IdentityView`].
//!
//! [`IdentityView`]: contactlink_shared::IdentityView

pub mod engine;
pub mod locks;
pub mod view;

pub use engine::Engine;
pub use locks::{IdentifierGuard, IdentifierLocks};
