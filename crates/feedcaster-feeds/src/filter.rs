//! Candidate screening before any generation work is spent on an item.

use feedcaster_core::config::FilterConfig;
use feedcaster_core::error::{FeedcasterError, Result};
use feedcaster_core::types::Candidate;
use regex::Regex;

/// Why a candidate was screened out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screened {
    TooShort { words: usize, min: usize },
    Spam { pattern: String },
}

impl std::fmt::Display for Screened {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Screened::TooShort { words, min } => write!(f, "too short ({words} words < {min})"),
            Screened::Spam { pattern } => write!(f, "promotional content (/{pattern}/)"),
        }
    }
}

/// Minimum length plus spam patterns. The default lets everything through.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    min_word_count: usize,
    spam: Vec<Regex>,
}

impl CandidateFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let spam = config
            .spam_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}")).map_err(|e| {
                    FeedcasterError::Config(format!("Invalid spam pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            min_word_count: config.min_word_count,
            spam,
        })
    }

    /// `Some(reason)` when the candidate should not be transformed.
    pub fn screen(&self, candidate: &Candidate) -> Option<Screened> {
        let payload = &candidate.raw_payload;
        let words = payload.body.split_whitespace().count();
        if words < self.min_word_count {
            return Some(Screened::TooShort {
                words,
                min: self.min_word_count,
            });
        }

        let text = format!("{} {}", payload.title, payload.body);
        self.spam
            .iter()
            .find(|re| re.is_match(&text))
            .map(|re| Screened::Spam {
                pattern: re.as_str().trim_start_matches("(?i)").to_string(),
            })
    }
}
