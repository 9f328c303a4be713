//! ACT-R-weighted retrieval math: base-level activation, sigmoid
//! normalization, reinforcement decay, and cosine similarity. Pure
//! functions, independent of SQLite, so the closed-form cases are easy to
//! pin down in tests.

pub const DECAY_PARAM: f64 = 0.5;
pub const W_SIM: f64 = 0.7;
pub const W_ACT: f64 = 0.3;
pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.92;
pub const CONTRADICTION_CANDIDATE_THRESHOLD: f64 = 0.85;
pub const PRE_FILTER_PER_TYPE: usize = 20;
pub const REINFORCEMENT_GRACE_DAYS: i64 = 30;
pub const CONFIDENCE_FLOOR: f64 = 0.1;
pub const ACCESS_CAP_PER_MEMORY: usize = 200;

/// ACT-R base-level activation `B = ln(Σ t_j^(-d))` over access ages in
/// seconds (already floored at 1.0 by the caller). An empty access history
/// has no activation: `-inf`, which [`normalize_activation`] maps to 0.
pub fn base_level_activation(access_ages_secs: &[f64]) -> f64 {
    if access_ages_secs.is_empty() {
        return f64::NEG_INFINITY;
    }
    let total: f64 = access_ages_secs
        .iter()
        .map(|&t| t.max(1.0).powf(-DECAY_PARAM))
        .sum();
    if total > 0.0 {
        total.ln()
    } else {
        f64::NEG_INFINITY
    }
}

/// Map activation's `(-inf, +inf)` range to `(0, 1)` with a sigmoid.
pub fn normalize_activation(activation: f64) -> f64 {
    if activation == f64::NEG_INFINITY {
        0.0
    } else {
        1.0 / (1.0 + (-activation).exp())
    }
}

/// Confidence decays only past the grace period, then by `0.95^((days -
/// grace) / 30)`, floored at [`CONFIDENCE_FLOOR`].
pub fn reinforcement_decay(confidence: f64, days_since_last_access: i64) -> f64 {
    if days_since_last_access < REINFORCEMENT_GRACE_DAYS {
        return confidence;
    }
    let exponent = (days_since_last_access - REINFORCEMENT_GRACE_DAYS) as f64 / 30.0;
    (confidence * 0.95f64.powf(exponent)).max(CONFIDENCE_FLOOR)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum();
    let norm_a: f64 = a.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Combined retrieval score: similarity-weighted plus activation-weighted.
pub fn retrieval_score(similarity: f64, normalized_activation: f64) -> f64 {
    W_SIM * similarity + W_ACT * normalized_activation
}

pub fn embedding_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for &f in vec {
        blob.extend_from_slice(&f.to_le_bytes());
    }
    blob
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_access_history_has_no_activation() {
        assert_eq!(base_level_activation(&[]), f64::NEG_INFINITY);
        assert_eq!(normalize_activation(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn single_recent_access_yields_high_activation() {
        // t = 1.0s => t^-0.5 = 1.0 => ln(1.0) = 0.0 => sigmoid(0) = 0.5
        let b = base_level_activation(&[1.0]);
        assert!((b - 0.0).abs() < 1e-9);
        assert!((normalize_activation(b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn more_accesses_increase_activation() {
        let few = base_level_activation(&[3600.0]);
        let many = base_level_activation(&[3600.0, 3600.0, 3600.0]);
        assert!(many > few);
    }

    #[test]
    fn reinforcement_decay_noop_within_grace_period() {
        assert_eq!(reinforcement_decay(0.9, 10), 0.9);
        assert_eq!(reinforcement_decay(0.9, 29), 0.9);
    }

    #[test]
    fn reinforcement_decay_applies_past_grace_period() {
        let decayed = reinforcement_decay(0.9, 60);
        assert!(decayed < 0.9);
        assert!(decayed >= CONFIDENCE_FLOOR);
    }

    #[test]
    fn reinforcement_decay_floors_at_confidence_floor() {
        let decayed = reinforcement_decay(0.9, 365 * 5);
        assert_eq!(decayed, CONFIDENCE_FLOOR);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn embedding_blob_round_trips() {
        let original = vec![1.5f32, -2.25, 0.0, 100.125];
        let blob = embedding_to_blob(&original);
        let restored = blob_to_embedding(&blob);
        assert_eq!(original, restored);
    }

    #[test]
    fn retrieval_score_weights_are_fixed() {
        assert_eq!(retrieval_score(1.0, 0.0), W_SIM);
        assert_eq!(retrieval_score(0.0, 1.0), W_ACT);
    }
}
