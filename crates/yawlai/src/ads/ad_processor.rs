//! Rewrites keyword mentions in assistant messages into hyperlinks.
//!
//! Keywords are applied one after another in cache order. Every
//! case-insensitive whole-word occurrence becomes an anchor around the
//! original text. Text already inside an `<a>` element is left alone, so an
//! earlier keyword's anchor is never wrapped again by a later keyword.
//! Processing fails open: on any error the caller gets the input back.

use std::sync::Arc;

use futures::future::join_all;
use lazy_static::lazy_static;
use regex::{Captures, Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::ads::keyword_cache::KeywordCache;
use crate::store::ActiveKeyword;

lazy_static! {
    static ref ANCHOR_REGEX: Regex = Regex::new(r"(?is)<a\b[^>]*>.*?</a\s*>").unwrap();
}

/// Who the message is being rendered for.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: Option<String>,
}

impl SessionContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self { session_id: Some(session_id.into()) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedMessage {
    pub content: String,
    /// Keywords linked at least once, in application order.
    pub matched: Vec<ActiveKeyword>,
}

impl ProcessedMessage {
    fn unchanged(content: &str) -> Self {
        Self { content: content.to_string(), matched: Vec::new() }
    }
}

pub struct AdProcessor {
    cache: Arc<KeywordCache>,
}

impl AdProcessor {
    pub fn new(cache: Arc<KeywordCache>) -> Self {
        Self { cache }
    }

    pub async fn process_message_with_ads(
        &self,
        content: &str,
        ctx: Option<&SessionContext>,
    ) -> String {
        self.process_with_matches(content, ctx).await.content
    }

    pub async fn process_with_matches(
        &self,
        content: &str,
        ctx: Option<&SessionContext>,
    ) -> ProcessedMessage {
        if content.is_empty() {
            return ProcessedMessage::unchanged(content);
        }
        let keywords = self.cache.get_active_keywords().await;
        if keywords.is_empty() {
            return ProcessedMessage::unchanged(content);
        }

        match inject_links(content, &keywords) {
            Ok((html, matched)) => {
                if !matched.is_empty() {
                    debug!(
                        session_id = ctx.and_then(|c| c.session_id.as_deref()).unwrap_or("-"),
                        "Linked {} keyword(s) in message",
                        matched.len()
                    );
                }
                ProcessedMessage { content: html, matched }
            }
            Err(e) => {
                warn!("Ad processing failed, returning original content: {}", e);
                ProcessedMessage::unchanged(content)
            }
        }
    }

    /// Process several messages concurrently; output order matches input order.
    pub async fn process_messages(
        &self,
        contents: &[String],
        ctx: Option<&SessionContext>,
    ) -> Vec<ProcessedMessage> {
        join_all(contents.iter().map(|c| self.process_with_matches(c, ctx))).await
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive literal pattern for `keyword`. Word boundaries are only
/// required on edges where the keyword itself starts or ends with a word
/// character, so `C++` and `.NET` still match.
pub fn build_keyword_pattern(keyword: &str) -> anyhow::Result<Regex> {
    let keyword = keyword.trim();
    let (first, last) = match (keyword.chars().next(), keyword.chars().last()) {
        (Some(first), Some(last)) => (first, last),
        _ => anyhow::bail!("empty keyword"),
    };
    let pattern = format!(
        "{}{}{}",
        if is_word_char(first) { r"\b" } else { "" },
        regex::escape(keyword),
        if is_word_char(last) { r"\b" } else { "" },
    );
    Ok(RegexBuilder::new(&pattern).case_insensitive(true).build()?)
}

fn anchor_tag(keyword: &ActiveKeyword, text: &str) -> String {
    format!(
        r#"<a href="{}" target="_blank" rel="noopener noreferrer" class="ad-keyword" data-keyword-id="{}">{}</a>"#,
        keyword.target_url, keyword.id, text
    )
}

/// Apply every keyword to `content`. Returns the rewritten text and the
/// keywords that matched at least once.
pub fn inject_links(
    content: &str,
    keywords: &[ActiveKeyword],
) -> anyhow::Result<(String, Vec<ActiveKeyword>)> {
    let mut html = content.to_string();
    let mut matched = Vec::new();

    for keyword in keywords {
        if keyword.keyword.trim().is_empty() {
            continue;
        }
        let pattern = build_keyword_pattern(&keyword.keyword)?;
        if !pattern.is_match(&html) {
            continue;
        }
        let (rewritten, count) = replace_outside_anchors(&html, &pattern, keyword);
        if count > 0 {
            html = rewritten;
            matched.push(keyword.clone());
        }
    }

    Ok((html, matched))
}

fn replace_outside_anchors(html: &str, pattern: &Regex, keyword: &ActiveKeyword) -> (String, usize) {
    let mut out = String::with_capacity(html.len());
    let mut count = 0;
    let mut last = 0;

    let mut replace_segment = |segment: &str, out: &mut String| {
        let replaced = pattern.replace_all(segment, |caps: &Captures| {
            count += 1;
            anchor_tag(keyword, &caps[0])
        });
        out.push_str(&replaced);
    };

    for anchor in ANCHOR_REGEX.find_iter(html) {
        replace_segment(&html[last..anchor.start()], &mut out);
        out.push_str(anchor.as_str());
        last = anchor.end();
    }
    replace_segment(&html[last..], &mut out);

    (out, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::keyword_cache::tests::StaticSource;
    use proptest::prelude::*;

    fn keyword(id: i64, text: &str, url: &str) -> ActiveKeyword {
        ActiveKeyword { id, keyword: text.to_string(), target_url: url.to_string() }
    }

    fn processor(pairs: &[(&str, &str)]) -> AdProcessor {
        AdProcessor::new(Arc::new(KeywordCache::new(Arc::new(StaticSource::new(pairs)))))
    }

    #[tokio::test]
    async fn test_links_single_keyword() {
        let ads = processor(&[("Nike", "https://nike.com")]);
        let out = ads.process_message_with_ads("I love Nike shoes", None).await;

        assert_eq!(
            out,
            "I love <a href=\"https://nike.com\" target=\"_blank\" rel=\"noopener noreferrer\" \
             class=\"ad-keyword\" data-keyword-id=\"1\">Nike</a> shoes"
        );
        assert_eq!(out.matches("<a ").count(), 1);
    }

    #[tokio::test]
    async fn test_every_occurrence_keeps_original_case() {
        let ads = processor(&[("nike", "https://nike.com")]);
        let processed = ads
            .process_with_matches("Nike, NIKE and nike.", Some(&SessionContext::for_session("s1")))
            .await;

        assert_eq!(processed.content.matches("href=\"https://nike.com\"").count(), 3);
        assert!(processed.content.contains(">Nike</a>"));
        assert!(processed.content.contains(">NIKE</a>"));
        assert!(processed.content.contains(">nike</a>."));
        assert_eq!(processed.matched.len(), 1);
    }

    #[tokio::test]
    async fn test_whole_words_only() {
        let ads = processor(&[("Nike", "https://nike.com")]);
        let text = "Nikes and UnNike are not the brand";
        assert_eq!(ads.process_message_with_ads(text, None).await, text);
    }

    #[tokio::test]
    async fn test_empty_cache_is_identity() {
        let ads = processor(&[]);
        let text = "I love Nike shoes";
        assert_eq!(ads.process_message_with_ads(text, None).await, text);
    }

    #[tokio::test]
    async fn test_failing_source_is_identity() {
        let cache = KeywordCache::new(Arc::new(StaticSource::failing()));
        let ads = AdProcessor::new(Arc::new(cache));
        let text = "I love Nike shoes";
        assert_eq!(ads.process_message_with_ads(text, None).await, text);
    }

    #[test]
    fn test_keyword_text_is_escaped() {
        let keywords = vec![
            keyword(1, "C++", "https://isocpp.org"),
            keyword(2, "a.b", "https://ab.example"),
        ];
        let (html, matched) = inject_links("I write C++ and axb daily", &keywords).unwrap();

        assert!(html.contains(">C++</a> and axb"));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, 1);
    }

    // Keywords apply in cache order and never re-wrap text inside an anchor,
    // including the anchor's own href.
    #[test]
    fn test_no_double_wrapping_across_keywords() {
        let keywords = vec![
            keyword(1, "Nike Air", "https://nike.com/air"),
            keyword(2, "Nike", "https://nike.com"),
            keyword(3, "com", "https://example.com"),
        ];
        let (html, matched) = inject_links("Nike Air beats any Nike", &keywords).unwrap();

        assert_eq!(html.matches("<a ").count(), 2);
        assert!(html.contains("data-keyword-id=\"1\">Nike Air</a> beats"));
        assert!(html.ends_with("data-keyword-id=\"2\">Nike</a>"));
        assert_eq!(matched.iter().map(|k| k.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_existing_anchor_is_untouched() {
        let keywords = vec![keyword(1, "Nike", "https://nike.com")];
        let text = r#"See <a href="https://shop.example/nike">Nike store</a> or Nike"#;
        let (html, _) = inject_links(text, &keywords).unwrap();

        assert!(html.starts_with(r#"See <a href="https://shop.example/nike">Nike store</a> or <a "#));
        assert_eq!(html.matches("<a ").count(), 2);
    }

    #[test]
    fn test_blank_keyword_is_skipped() {
        let keywords = vec![keyword(1, "  ", "https://x.example")];
        let (html, matched) = inject_links("anything", &keywords).unwrap();
        assert_eq!(html, "anything");
        assert!(matched.is_empty());
    }

    #[tokio::test]
    async fn test_process_messages_preserves_order() {
        let ads = processor(&[("Tesla", "https://tesla.com")]);
        let inputs = vec![
            "no brands here".to_string(),
            "drive a Tesla".to_string(),
            String::new(),
        ];
        let out = ads.process_messages(&inputs, None).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].content, "no brands here");
        assert!(out[1].content.contains(">Tesla</a>"));
        assert_eq!(out[2].content, "");
    }

    proptest! {
        #[test]
        fn prop_no_keywords_is_identity(text in ".*") {
            let (html, matched) = inject_links(&text, &[]).unwrap();
            prop_assert_eq!(html, text);
            prop_assert!(matched.is_empty());
        }

        #[test]
        fn prop_one_anchor_per_occurrence(words in proptest::collection::vec("(nike|shoe|run|fast)", 0..20)) {
            let text = words.join(" ");
            let expected = words.iter().filter(|w| w.as_str() == "nike").count();
            let keywords = vec![keyword(7, "Nike", "https://nike.com")];
            let (html, _) = inject_links(&text, &keywords).unwrap();
            prop_assert_eq!(html.matches("href=\"https://nike.com\"").count(), expected);
        }

        #[test]
        fn prop_unmatched_text_passes_through(text in "[0-9 .,]*") {
            let ads = processor(&[("Nike", "https://nike.com"), ("C++", "https://isocpp.org")]);
            let out = tokio_test::block_on(ads.process_message_with_ads(&text, None));
            prop_assert_eq!(out, text);
        }
    }
}
