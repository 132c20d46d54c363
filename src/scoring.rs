//! BM25 scoring
//!
//! `score(d, t) = idf(t) * (tf * (k1+1)) / (tf + k1 * (1 - b + b * |d|/avgDL))`
//! with `idf(t) = ln((N - df + 0.5) / (df + 0.5) + 1)`.
//!
//! df is clamped to [0, N]; non-positive N or avgDL fall back to 1 so the
//! formula never produces NaN.

use crate::config::{BM25_B, BM25_K1};

pub struct Bm25Scorer {
    total_docs: u32,
    avg_doc_length: f64,
    k1: f64,
    b: f64,
}

impl Bm25Scorer {
    pub fn new(total_docs: u32, avg_doc_length: f64) -> Self {
        Self::with_params(total_docs, avg_doc_length, BM25_K1, BM25_B)
    }

    pub fn with_params(total_docs: u32, avg_doc_length: f64, k1: f64, b: f64) -> Self {
        Self {
            total_docs: total_docs.max(1),
            avg_doc_length: if avg_doc_length <= 0.0 {
                1.0
            } else {
                avg_doc_length
            },
            k1,
            b,
        }
    }

    pub fn idf(&self, doc_frequency: u32) -> f64 {
        let n = self.total_docs as f64;
        let df = doc_frequency.min(self.total_docs) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    pub fn score(&self, term_frequency: u32, doc_frequency: u32, doc_length: u32) -> f64 {
        if term_frequency == 0 {
            return 0.0;
        }
        let idf = self.idf(doc_frequency);
        let tf = term_frequency as f64;
        let norm = 1.0 - self.b + self.b * (doc_length as f64 / self.avg_doc_length);
        idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_positive() {
        let scorer = Bm25Scorer::new(1000, 100.0);
        assert!(scorer.score(5, 10, 100) > 0.0);
    }

    #[test]
    fn test_tf_monotone() {
        let scorer = Bm25Scorer::new(1000, 100.0);
        assert!(scorer.score(5, 10, 100) > scorer.score(1, 10, 100));
    }

    #[test]
    fn test_rare_terms_score_higher() {
        let scorer = Bm25Scorer::new(1000, 100.0);
        assert!(scorer.score(5, 10, 100) > scorer.score(5, 100, 100));
    }

    #[test]
    fn test_degenerate_stats_stay_finite() {
        let scorer = Bm25Scorer::new(0, 0.0);
        let score = scorer.score(3, 7, 0);
        assert!(score.is_finite());

        // df above N is clamped rather than producing a negative idf argument
        let scorer = Bm25Scorer::new(2, 10.0);
        assert!(scorer.idf(50) > 0.0);
    }

    #[test]
    fn test_zero_tf_scores_zero() {
        let scorer = Bm25Scorer::new(10, 10.0);
        assert_eq!(scorer.score(0, 5, 10), 0.0);
    }
}
