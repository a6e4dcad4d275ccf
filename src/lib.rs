//! Ad Studio: composes multimodal prompts and drives Gemini image, video and
//! speech generation for product advertising.

pub mod config;
pub mod credentials;
pub mod enhance;
pub mod error;
pub mod gemini;
pub mod jobs;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod presets;
pub mod prompt;
pub mod routes;
pub mod speech;

pub use error::{StudioError, StudioResult};
