//! Language-model endpoints for Pursuit.
//!
//! [`build_from_config`] registers one OpenAI-compatible endpoint per
//! configured provider; [`ProviderRouter::chain`] hands the stages a single
//! [`pursuit_core::Provider`] that walks them in fallback order.

pub mod fallback;
pub mod openai_compat;
pub mod router;

pub use fallback::FallbackProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
