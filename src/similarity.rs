//! Vector primitives for affinity scoring
//!
//! Embeddings handled by the caches are L2-normalized, so a plain dot product
//! is the cosine similarity. The dot product is unrolled by four, which the
//! compiler vectorizes on every target we care about.

/// Dot product with a 4-way unrolled inner loop
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let len = a.len().min(b.len());
    let unroll_len = len & !3;
    let mut sum = 0.0;

    let mut i = 0;
    while i < unroll_len {
        sum += a[i] * b[i] + a[i + 1] * b[i + 1] + a[i + 2] * b[i + 2] + a[i + 3] * b[i + 3];
        i += 4;
    }

    for j in unroll_len..len {
        sum += a[j] * b[j];
    }

    sum
}

/// Euclidean norm
#[inline]
pub fn l2_norm(a: &[f32]) -> f32 {
    dot_product(a, a).sqrt()
}

/// Normalize a vector in place. Zero vectors are left untouched.
#[inline]
pub fn normalize_inplace(a: &mut [f32]) {
    let norm = l2_norm(a);
    if norm > 1e-10 {
        let inv_norm = 1.0 / norm;
        for x in a.iter_mut() {
            *x *= inv_norm;
        }
    }
}

/// Returns true if ||a|| is within epsilon of 1.0
#[inline]
pub fn is_normalized(a: &[f32], epsilon: f32) -> bool {
    (dot_product(a, a) - 1.0).abs() < epsilon
}


#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_dot_product_correctness() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let b = vec![9.0, 8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0];

        let expected: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot_product(&a, &b) - expected).abs() < EPSILON);
    }

    #[test]
    fn test_normalize_inplace() {
        let mut v = vec![3.0, 4.0];
        normalize_inplace(&mut v);
        assert!((v[0] - 0.6).abs() < EPSILON);
        assert!((v[1] - 0.8).abs() < EPSILON);
        assert!(is_normalized(&v, 1e-4));

        let mut zero = vec![0.0; 4];
        normalize_inplace(&mut zero);
        assert!(zero.iter().all(|&x| x == 0.0));
    }

}
