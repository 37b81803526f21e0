//! # spamsub-renderer
//!
//! Tera-based rendering of the spammer artifact and the text that
//! accompanies each publication (commit message, pull-request title and body).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use spamsub_core::Address;
//! use spamsub_renderer::{Document, PublicationContext, Renderer};
//!
//! fn preview(addresses: &[Address]) {
//!     if let Ok(renderer) = Renderer::new() {
//!         let ctx = PublicationContext::new(addresses, &[], Utc::now());
//!         if let Ok(text) = renderer.render(Document::Artifact, &ctx) {
//!             print!("{text}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::PublicationContext;
pub use engine::{Document, Renderer, TemplateEngine};
pub use error::RenderError;
