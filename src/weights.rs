//! Element-wise helpers for multi-dimensional weight vectors.

pub(crate) fn add_assign(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

pub(crate) fn sub_assign(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d -= s;
    }
}

/// `a + b <= limit` in every dimension.
pub(crate) fn fits_with(a: &[f32], b: &[f32], limit: &[f32]) -> bool {
    a.iter().zip(b).zip(limit).all(|((a, b), l)| a + b <= *l)
}

/// `a - b >= limit` in every dimension.
pub(crate) fn stays_above(a: &[f32], b: &[f32], limit: &[f32]) -> bool {
    a.iter().zip(b).zip(limit).all(|((a, b), l)| a - b >= *l)
}

pub(crate) fn le(a: &[f32], b: &[f32]) -> bool {
    a.iter().zip(b).all(|(a, b)| a <= b)
}

pub(crate) fn ge(a: &[f32], b: &[f32]) -> bool {
    a.iter().zip(b).all(|(a, b)| a >= b)
}

/// Dot product with missing factors treated as 1.
pub(crate) fn weighted_sum(w: &[f32], factors: &[f32]) -> f32 {
    w.iter()
        .enumerate()
        .map(|(i, x)| x * factors.get(i).copied().unwrap_or(1.0))
        .sum()
}

pub(crate) fn sum(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(a, b)| a + b).collect()
}
