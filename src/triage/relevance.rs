//! Embedding relevance matcher.
//!
//! Splits an email into sentences, embeds them alongside a fixed keyword
//! list, and reports every keyword whose best-matching sentence is more
//! similar than the threshold. The best sentence is kept as evidence.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{ConfigError, LlmError};
use crate::llm::embedding::{Embedder, similarity_matrix};
use crate::mail::NormalizedMessage;
use crate::triage::types::{Category, Classifier, Relevance, Verdict};

const CATEGORIES: &[Category] = &[Category::Matched, Category::Unmatched];

/// Matches emails against keywords by embedding similarity.
pub struct KeywordMatcher {
    embedder: Arc<dyn Embedder>,
    keywords: Vec<String>,
    threshold: f32,
    keyword_vectors: OnceCell<Vec<Vec<f32>>>,
}

impl KeywordMatcher {
    /// Keywords are matched in the order given. A keyword matches only when
    /// its similarity is strictly greater than `threshold`.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        keywords: Vec<String>,
        threshold: f32,
    ) -> Result<Self, ConfigError> {
        if keywords.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_KEYWORDS".into(),
                message: "at least one keyword is required".into(),
            });
        }
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_THRESHOLD".into(),
                message: format!("{threshold} is outside [-1, 1]"),
            });
        }

        Ok(Self {
            embedder,
            keywords,
            threshold,
            keyword_vectors: OnceCell::new(),
        })
    }

    /// Check one email against the keyword list.
    pub async fn check(&self, subject: &str, body: &str) -> Result<Relevance, LlmError> {
        let sentences = split_sentences(subject, body);
        if sentences.is_empty() {
            return Ok(Relevance::default());
        }

        let keyword_vectors = self.keyword_vectors().await?;
        let sentence_vectors = self.embed_exact(&sentences).await?;

        let matrix = similarity_matrix(&sentence_vectors, keyword_vectors);
        let relevance = match_keywords(&matrix, &self.keywords, &sentences, self.threshold);

        debug!(
            sentences = sentences.len(),
            matched = relevance.matched_keywords.len(),
            "Keyword relevance checked"
        );
        Ok(relevance)
    }

    /// Keyword embeddings, computed on first use.
    async fn keyword_vectors(&self) -> Result<&Vec<Vec<f32>>, LlmError> {
        self.keyword_vectors
            .get_or_try_init(|| self.embed_exact(&self.keywords))
            .await
    }

    async fn embed_exact(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(LlmError::InvalidResponse {
                provider: self.embedder.model_name().to_string(),
                reason: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    vectors.len()
                ),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Classifier for KeywordMatcher {
    fn name(&self) -> &'static str {
        "keywords"
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn classify(&self, message: &NormalizedMessage) -> Result<Verdict, LlmError> {
        self.check(&message.subject, &message.body)
            .await
            .map(Verdict::Relevance)
    }
}

/// `subject + ". " + body`, split on `.`, trimmed, empties dropped.
pub fn split_sentences(subject: &str, body: &str) -> Vec<String> {
    format!("{subject}. {body}")
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Select matched keywords from a `matrix[sentence][keyword]` of similarities.
///
/// For each keyword the first sentence with the highest similarity is the
/// evidence; the keyword matches when that similarity exceeds `threshold`.
fn match_keywords(
    matrix: &[Vec<f32>],
    keywords: &[String],
    sentences: &[String],
    threshold: f32,
) -> Relevance {
    let mut relevance = Relevance::default();

    for (k, keyword) in keywords.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        for (s, row) in matrix.iter().enumerate() {
            let Some(&sim) = row.get(k) else { continue };
            if best.is_none_or(|(_, b)| sim > b) {
                best = Some((s, sim));
            }
        }

        if let Some((s, sim)) = best
            && sim > threshold
        {
            relevance.matched_keywords.push(keyword.clone());
            relevance.relevant_sentences.push(sentences[s].clone());
        }
    }

    relevance
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embedder backed by a lookup table. Unknown text embeds to the zero vector.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
        texts_embedded: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, [f32; 2])]) -> Arc<Self> {
            Arc::new(Self {
                table: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
                texts_embedded: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        fn model_name(&self) -> &str {
            "table"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| self.table.get(t).cloned().unwrap_or_else(|| vec![0.0, 0.0]))
                .collect())
        }
    }

    /// Embedder that drops the last vector.
    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(vec![vec![1.0, 0.0]; texts.len().saturating_sub(1)])
        }
    }

    fn keywords(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    fn strings(list: &[&str]) -> Vec<String> {
        keywords(list)
    }

    // ── Construction ────────────────────────────────────────────────

    #[test]
    fn empty_keywords_rejected() {
        let result = KeywordMatcher::new(TableEmbedder::new(&[]), vec![], 0.7);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "TRIAGE_KEYWORDS"
        ));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        for threshold in [1.5, -1.01, f32::NAN] {
            let result =
                KeywordMatcher::new(TableEmbedder::new(&[]), keywords(&["a"]), threshold);
            assert!(result.is_err(), "threshold {threshold} accepted");
        }
    }

    // ── Sentence splitting ──────────────────────────────────────────

    #[test]
    fn split_joins_subject_and_body() {
        assert_eq!(
            split_sentences(
                "Interview request for role",
                "We would like to schedule your interview."
            ),
            strings(&[
                "Interview request for role",
                "We would like to schedule your interview"
            ])
        );
    }

    #[test]
    fn split_drops_empty_fragments() {
        assert_eq!(
            split_sentences("", " ... Hello.  world . "),
            strings(&["Hello", "world"])
        );
        assert!(split_sentences("", "").is_empty());
        assert!(split_sentences("  ", " . ").is_empty());
    }

    // ── Matching ────────────────────────────────────────────────────

    #[test]
    fn similarity_equal_to_threshold_does_not_match() {
        let matrix = vec![vec![0.7]];
        let relevance = match_keywords(&matrix, &keywords(&["k"]), &strings(&["s"]), 0.7);
        assert!(!relevance.is_relevant());
    }

    #[test]
    fn ties_go_to_first_sentence() {
        let matrix = vec![vec![0.9], vec![0.9], vec![0.2]];
        let relevance = match_keywords(
            &matrix,
            &keywords(&["k"]),
            &strings(&["first", "second", "third"]),
            0.5,
        );
        assert_eq!(relevance.relevant_sentences, strings(&["first"]));
    }

    #[test]
    fn keyword_order_preserved_and_paired() {
        // rows = sentences, cols = keywords
        let matrix = vec![
            vec![0.1, 0.95, 0.3],
            vec![0.8, 0.2, 0.6],
        ];
        let relevance = match_keywords(
            &matrix,
            &keywords(&["alpha", "beta", "gamma"]),
            &strings(&["s0", "s1"]),
            0.7,
        );
        assert_eq!(relevance.matched_keywords, keywords(&["alpha", "beta"]));
        assert_eq!(relevance.relevant_sentences, strings(&["s1", "s0"]));
    }

    #[test]
    fn same_sentence_may_back_several_keywords() {
        let matrix = vec![vec![0.9, 0.85]];
        let relevance = match_keywords(
            &matrix,
            &keywords(&["a", "b"]),
            &strings(&["only"]),
            0.7,
        );
        assert_eq!(relevance.relevant_sentences, strings(&["only", "only"]));
    }

    // ── End to end with a fake embedder ─────────────────────────────

    fn interview_embedder() -> Arc<TableEmbedder> {
        TableEmbedder::new(&[
            ("interview request", [1.0, 0.0]),
            ("Interview request for role", [0.6, 0.8]),
            ("We would like to schedule your interview", [0.9, 0.1]),
        ])
    }

    #[tokio::test]
    async fn interview_email_matches_with_body_evidence() {
        let matcher =
            KeywordMatcher::new(interview_embedder(), keywords(&["interview request"]), 0.7)
                .unwrap();

        let relevance = matcher
            .check(
                "Interview request for role",
                "We would like to schedule your interview.",
            )
            .await
            .unwrap();

        assert!(relevance.is_relevant());
        assert_eq!(relevance.matched_keywords, keywords(&["interview request"]));
        assert_eq!(
            relevance.relevant_sentences,
            strings(&["We would like to schedule your interview"])
        );
    }

    #[tokio::test]
    async fn check_is_idempotent_and_caches_keywords() {
        let embedder = interview_embedder();
        let matcher =
            KeywordMatcher::new(embedder.clone(), keywords(&["interview request"]), 0.7).unwrap();

        let first = matcher
            .check("Interview request for role", "We would like to schedule your interview.")
            .await
            .unwrap();
        let second = matcher
            .check("Interview request for role", "We would like to schedule your interview.")
            .await
            .unwrap();

        assert_eq!(first, second);
        // one keyword batch + two sentence batches
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), 1 + 2 + 2);
    }

    #[tokio::test]
    async fn empty_corpus_skips_embedding() {
        let embedder = interview_embedder();
        let matcher =
            KeywordMatcher::new(embedder.clone(), keywords(&["interview request"]), 0.7).unwrap();

        let relevance = matcher.check("", "").await.unwrap();

        assert!(!relevance.is_relevant());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unrelated_email_is_unmatched() {
        let matcher =
            KeywordMatcher::new(interview_embedder(), keywords(&["interview request"]), 0.7)
                .unwrap();
        let message = NormalizedMessage::new("3", "Lunch", "Pizza on Friday.");

        let verdict = matcher.classify(&message).await.unwrap();
        assert_eq!(verdict.category(), Category::Unmatched);
    }

    #[tokio::test]
    async fn embedding_count_mismatch_is_error() {
        let matcher =
            KeywordMatcher::new(Arc::new(ShortEmbedder), keywords(&["a", "b"]), 0.7).unwrap();
        let err = matcher.check("Subject", "Body.").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }
}
