//! Relevance statistics
//!
//! Scores follow a TF-IDF scheme:
//! `score = Σ tf_weight(tf) * idf(N, df)` where N counts live documents in
//! the searched generation and df is the term's document frequency in the
//! segment being scored.

/// Inverse document frequency: `ln(1 + (N - df + 0.5) / (df + 0.5))`.
///
/// `N - df` is clamped at zero, since df counts deleted documents that
/// N leaves out.
pub fn idf(num_docs: u64, doc_freq: u64) -> f32 {
    let n = num_docs as f64;
    let df = doc_freq as f64;
    let ratio = (n - df + 0.5).max(0.0) / (df + 0.5);
    (1.0 + ratio).ln() as f32
}

/// Saturating term-frequency weight `tf / (tf + k)`
pub fn tf_weight(term_freq: u32, k: f32) -> f32 {
    if term_freq == 0 {
        return 0.0;
    }
    let tf = term_freq as f32;
    tf / (tf + k)
}
