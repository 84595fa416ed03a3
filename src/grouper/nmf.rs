//! 非负矩阵分解（Frobenius范数下的乘法更新规则）。
//!
//! 分组对分解精度的要求不高，几百轮乘法更新足够收敛；
//! 随机初始化使用固定种子，保证同一输入的分解结果可复现。

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EPS: f32 = 1e-9;

/// 把非负矩阵`v`（n×m）分解为`w`（n×k）与`h`（k×m），使`v ≈ w·h`
pub fn factorize(
    v: &Array2<f32>,
    k: usize,
    iterations: usize,
    seed: u64,
) -> (Array2<f32>, Array2<f32>) {
    let (n, m) = v.dim();
    let mut rng = StdRng::seed_from_u64(seed);

    // 均匀噪声乘sqrt(mean(v)/k)，使w·h的初始量级与v相当
    let magnitude = (v.mean().unwrap_or(0.0).max(0.0) / k as f32).sqrt().max(EPS);
    let mut w = Array2::from_shape_fn((n, k), |_| rng.r#gen::<f32>() * magnitude);
    let mut h = Array2::from_shape_fn((k, m), |_| rng.r#gen::<f32>() * magnitude);

    for _ in 0..iterations {
        // H ← H ⊙ (WᵀV) ⊘ (WᵀWH)
        let numer = w.t().dot(v);
        let denom = w.t().dot(&w).dot(&h) + EPS;
        h = h * (numer / denom);

        // W ← W ⊙ (VHᵀ) ⊘ (WHHᵀ)
        let numer = v.dot(&h.t());
        let denom = w.dot(&h).dot(&h.t()) + EPS;
        w = w * (numer / denom);
    }

    (w, h)
}
