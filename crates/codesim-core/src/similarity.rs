//! Cosine similarity over sparse trigram vectors.
//!
//! Pure and deterministic; safe to call from any number of threads.

use crate::models::TrigramVector;

/// Cosine of the angle between two count vectors, in `[0.0, 1.0]`.
///
/// Returns `0.0` when either vector is empty or has a zero norm. Dot product
/// and squared norms accumulate in `u128`, so large counts cannot overflow.
pub fn cosine(a: &TrigramVector, b: &TrigramVector) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut dot: u128 = 0;
    let mut norm_a: u128 = 0;
    for (trigram, count) in a.iter() {
        let count = count as u128;
        norm_a += count * count;
        dot += count * b.get(trigram) as u128;
    }
    let norm_b: u128 = b.iter().map(|(_, c)| (c as u128) * (c as u128)).sum();

    if norm_a == 0 || norm_b == 0 {
        return 0.0;
    }

    let sim = dot as f64 / ((norm_a as f64).sqrt() * (norm_b as f64).sqrt());
    sim.clamp(0.0, 1.0)
}

/// [`cosine`] for vectors that may be absent; absent means `0.0`.
pub fn cosine_opt(a: Option<&TrigramVector>, b: Option<&TrigramVector>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => cosine(a, b),
        _ => 0.0,
    }
}

/// Convert a cosine in `[0, 1]` to a percentage rounded to two decimals.
pub fn to_percentage(cosine: f64) -> f64 {
    (cosine * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigram::vectorize;

    fn vec_of(pairs: &[(&str, u32)]) -> TrigramVector {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_identical_is_one() {
        let v = vectorize("class test", 100);
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-12);
        assert_eq!(to_percentage(cosine(&v, &v)), 100.0);
    }

    #[test]
    fn test_disjoint_is_zero() {
        let a = vec_of(&[("abc", 2)]);
        let b = vec_of(&[("xyz", 5)]);
        assert_eq!(cosine(&a, &b), 0.0);
    }

    #[test]
    fn test_empty_and_absent() {
        let v = vec_of(&[("abc", 1)]);
        let empty = TrigramVector::new();
        assert_eq!(cosine(&empty, &v), 0.0);
        assert_eq!(cosine(&v, &empty), 0.0);
        assert_eq!(cosine_opt(None, Some(&v)), 0.0);
        assert_eq!(cosine_opt(Some(&v), None), 0.0);
        assert_eq!(cosine_opt(None, None), 0.0);
    }

    #[test]
    fn test_zero_counts_do_not_divide_by_zero() {
        let zeros = vec_of(&[("abc", 0), ("bcd", 0)]);
        let v = vec_of(&[("abc", 3)]);
        assert_eq!(cosine(&zeros, &v), 0.0);
        assert_eq!(cosine(&v, &zeros), 0.0);
    }

    #[test]
    fn test_symmetric_and_bounded() {
        let samples = [
            vectorize("class test method", 100),
            vectorize("class test", 100),
            vectorize("def helper x x", 100),
            vectorize("aaaaaaaaab", 100),
        ];
        for a in &samples {
            for b in &samples {
                let ab = cosine(a, b);
                let ba = cosine(b, a);
                assert!((ab - ba).abs() < 1e-12, "asymmetric: {} vs {}", ab, ba);
                assert!((0.0..=1.0).contains(&ab), "out of range: {}", ab);
            }
        }
    }

    #[test]
    fn test_known_value() {
        // a = (1, 1), b = (1, 0) over {abc, bcd} → 1/√2
        let a = vec_of(&[("abc", 1), ("bcd", 1)]);
        let b = vec_of(&[("abc", 1)]);
        assert!((cosine(&a, &b) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert_eq!(to_percentage(cosine(&a, &b)), 70.71);
    }

    #[test]
    fn test_large_counts_do_not_overflow() {
        let a = vec_of(&[("abc", u32::MAX), ("bcd", u32::MAX)]);
        let sim = cosine(&a, &a);
        assert!((sim - 1.0).abs() < 1e-9);
    }
}
