//! Mention text clean-up: undo link shortening, then strip everything that is
//! not part of the synthesis definition.

use crate::mention::UrlEntity;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\S+").unwrap());

/// Put back the literal text the platform replaced with short links.
///
/// SuperCollider calls like `SinOsc.ar` look like domains and get shortened.
/// Each entity replaces every occurrence of its short link, in the order given,
/// including occurrences produced by an earlier replacement.
pub fn reconstruct(raw_text: &str, urls: &[UrlEntity]) -> String {
    urls.iter()
        .fold(raw_text.to_string(), |text, entity| text.replace(&entity.url, &entity.display_url))
}

/// Remove `@<own_mention_token>` (any case) and hashtags, then trim.
pub fn filter(text: &str, own_mention_token: &str) -> String {
    Sanitizer::new(own_mention_token).filter(text)
}

/// [`filter`] with the mention pattern compiled once.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    mention: Regex,
}

impl Sanitizer {
    pub fn new(own_mention_token: &str) -> Self {
        let pattern = format!("(?i){}", regex::escape(&format!("@{own_mention_token}")));
        Self {
            mention: Regex::new(&pattern).expect("escaped literal is a valid pattern"),
        }
    }

    pub fn filter(&self, text: &str) -> String {
        let text = self.mention.replace_all(text, "");
        let text = RE_HASHTAG.replace_all(&text, "");
        text.trim().to_string()
    }

    /// Reconstruct then filter: the definition to render.
    pub fn definition(&self, raw_text: &str, urls: &[UrlEntity]) -> String {
        self.filter(&reconstruct(raw_text, urls))
    }
}
