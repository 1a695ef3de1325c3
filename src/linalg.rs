//! Small dense vector kernels used on the SGD hot path.

// ── 8-wide unrolled dot product ───────────────────────────────────────────
#[inline(always)]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut ca = a.chunks_exact(8);
    let mut cb = b.chunks_exact(8);
    let (mut s0, mut s1, mut s2, mut s3) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    let (mut s4, mut s5, mut s6, mut s7) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (x, y) in (&mut ca).zip(&mut cb) {
        s0 += x[0] * y[0];
        s1 += x[1] * y[1];
        s2 += x[2] * y[2];
        s3 += x[3] * y[3];
        s4 += x[4] * y[4];
        s5 += x[5] * y[5];
        s6 += x[6] * y[6];
        s7 += x[7] * y[7];
    }
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        s0 += x * y;
    }
    (s0 + s1 + s2 + s3) + (s4 + s5 + s6 + s7)
}

/// `dst[f] += scale * src[f]`, the only accumulate used by the updater.
#[inline(always)]
pub fn add_scaled(dst: &mut [f64], src: &[f64], scale: f64) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, &s) in dst.iter_mut().zip(src) {
        *d += scale * s;
    }
}

/// `out = base + scale * drift`; the time-dependent user vector.
#[inline(always)]
pub fn compose(out: &mut [f64], base: &[f64], drift: &[f64], scale: f64) {
    debug_assert_eq!(out.len(), base.len());
    debug_assert_eq!(out.len(), drift.len());
    for ((o, &b), &d) in out.iter_mut().zip(base).zip(drift) {
        *o = b + scale * d;
    }
}

pub fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}
