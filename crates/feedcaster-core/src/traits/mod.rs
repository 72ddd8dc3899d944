//! Capability traits the pipeline is written against.
//!
//! Every external system (feeds, generation service, browser automation,
//! credential storage) sits behind one of these so the scheduler can be
//! exercised with in-process fakes.

pub mod credentials;
pub mod driver;
pub mod feed;
pub mod generator;

pub use credentials::CredentialSource;
pub use driver::BrowserDriver;
pub use feed::FeedSource;
pub use generator::{GenerateParams, TextGenerator};
