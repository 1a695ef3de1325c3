use crate::records::Record;

// ── Pure-Rust error metrics (take slices) ──────────────────────────────

/// Root-mean-squared error of `predicted` against the records' scores.
/// Zero for an empty set.
pub fn rmse(records: &[Record], predicted: &[f64]) -> f64 {
    debug_assert_eq!(records.len(), predicted.len());
    if records.is_empty() {
        return 0.0;
    }
    let sse: f64 = records
        .iter()
        .zip(predicted)
        .map(|(r, p)| {
            let e = r.score as f64 - p;
            e * e
        })
        .sum();
    (sse / records.len() as f64).sqrt()
}
