//! `KeywordsMiddleware` - Prefix Index for Full-Search Properties
//!
//! Backends without native text search answer `keywords` filters with an
//! array-membership test against this index.

use std::collections::BTreeSet;

use async_trait::async_trait;
use polystore_core::{Record, KEYWORDS_PREFIX_CHARS_MIN, KEYWORDS_WORD_CHARS_MAX};

use super::{Action, ActionParams, Middleware};
use crate::error::BackendResult;

/// Materialises the `keywords` index on create and update.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordsMiddleware;

impl KeywordsMiddleware {
    /// Create the middleware.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for KeywordsMiddleware {
    fn name(&self) -> &'static str {
        "keywords"
    }

    async fn execute(
        &self,
        record: &mut Record,
        action: Action,
        _params: &ActionParams,
    ) -> BackendResult<()> {
        if !matches!(action, Action::Create | Action::Update) {
            return Ok(());
        }

        let texts: Vec<String> = record
            .schema()
            .full_search_properties()
            .filter_map(|p| record.val(p.name()).to_text())
            .collect();
        let keywords = extract_keywords(texts.iter().map(String::as_str));

        tracing::trace!(count = keywords.len(), "keywords extracted");
        record.set_keywords(keywords);
        Ok(())
    }
}

/// Lower-cased words plus every prefix of at least
/// `KEYWORDS_PREFIX_CHARS_MIN` characters, deduplicated and sorted.
///
/// Words longer than `KEYWORDS_WORD_CHARS_MAX` characters are skipped.
pub fn extract_keywords<'a>(texts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut keywords = BTreeSet::new();

    for text in texts {
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let chars: Vec<char> = word.chars().collect();
            if chars.len() > KEYWORDS_WORD_CHARS_MAX {
                continue;
            }
            for end in KEYWORDS_PREFIX_CHARS_MIN..chars.len() {
                keywords.insert(chars[..end].iter().collect::<String>());
            }
            keywords.insert(word);
        }
    }

    keywords.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::ModelSchema;

    #[test]
    fn test_extract_prefixes() {
        let keywords = extract_keywords(["John Doe"]);
        assert_eq!(keywords, vec!["do", "doe", "jo", "joh", "john"]);
    }

    #[test]
    fn test_short_words_kept_whole() {
        let keywords = extract_keywords(["a b-c", "Ab"]);
        assert_eq!(keywords, vec!["a", "ab", "b", "c"]);
    }

    #[test]
    fn test_overlong_words_skipped() {
        let long = "x".repeat(KEYWORDS_WORD_CHARS_MAX + 1);
        assert!(extract_keywords([long.as_str()]).is_empty());
    }

    #[tokio::test]
    async fn test_only_full_search_properties_indexed() {
        let schema = ModelSchema::builder("User")
            .with_base_properties()
            .string("lastname")
            .build()
            .unwrap();
        let mut record = Record::new(schema);
        record.set("name", "Jane").unwrap();
        record.set("lastname", "Doe").unwrap();

        KeywordsMiddleware::new()
            .execute(&mut record, Action::Create, &ActionParams::default())
            .await
            .unwrap();

        assert_eq!(
            record.keywords().unwrap(),
            &["ja".to_string(), "jan".to_string(), "jane".to_string()]
        );
    }

    #[tokio::test]
    async fn test_read_and_delete_leave_index_untouched() {
        let schema = ModelSchema::builder("User").with_base_properties().build().unwrap();
        let mut record = Record::new(schema);
        KeywordsMiddleware::new()
            .execute(&mut record, Action::Delete, &ActionParams::default())
            .await
            .unwrap();
        assert!(record.keywords().is_none());
    }
}
