//! # Feedcaster Providers
//!
//! Text generation behind the [`TextGenerator`](feedcaster_core::traits::TextGenerator)
//! trait, and the Content Transformer that turns Candidates into Drafts.

pub mod openai_compatible;
pub mod transformer;

pub use openai_compatible::OpenAiCompatibleGenerator;
pub use transformer::ContentTransformer;
