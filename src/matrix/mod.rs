//! 稠密矩阵运算（行优先存储）
//!
//! 设计矩阵为 n × p，法方程矩阵为 p × p。

use crate::error::{GFormulaError, Result};
use crate::types::{EPSILON, SINGULAR_TOLERANCE};

/// Cholesky 分解 - 将正定矩阵 A 分解为 L * L^T
///
/// 主元相对于原对角元过小时视为奇异矩阵（共线列），返回 `ModelFit` 错误，
/// 不做数值修复。
pub fn cholesky_decompose(a: &[f64], d: usize) -> Result<Vec<f64>> {
    let mut l = vec![0.0; d * d];

    for i in 0..d {
        for j in 0..=i {
            let mut sum = a[i * d + j];

            for k in 0..j {
                sum -= l[i * d + k] * l[j * d + k];
            }

            if i == j {
                let scale = a[i * d + i].abs().max(1.0);
                if !sum.is_finite() || sum <= SINGULAR_TOLERANCE * scale {
                    return Err(GFormulaError::ModelFit(format!(
                        "singular design matrix (pivot {i} = {sum:.3e}); check for collinear or constant terms"
                    )));
                }
                l[i * d + i] = sum.sqrt();
            } else {
                l[i * d + j] = sum / l[j * d + j];
            }
        }
    }

    Ok(l)
}

/// 使用 Cholesky 分解求解线性系统 A * x = b
/// 其中 A = L * L^T
pub fn solve_cholesky(l: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    // 1. 前向替换: L * y = b
    let y = solve_triangular_lower(l, b, d);

    // 2. 后向替换: L^T * x = y
    solve_triangular_upper_transpose(l, &y, d)
}

/// 求解下三角系统 L * x = b (前向替换)
pub fn solve_triangular_lower(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];

    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * x[j];
        }

        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }

    x
}

/// 求解上三角系统 L^T * x = b (后向替换)
fn solve_triangular_upper_transpose(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];

    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            // L^T[i,j] = L[j,i]
            sum -= l[j * n + i] * x[j];
        }

        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }

    x
}

/// 由 Cholesky 因子求逆矩阵 A^{-1}（逐列求解 A * x = e_i）
pub fn invert_from_cholesky(l: &[f64], d: usize) -> Vec<f64> {
    let mut inv = vec![0.0; d * d];
    let mut e = vec![0.0; d];

    for col in 0..d {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        let x = solve_cholesky(l, &e, d);
        for row in 0..d {
            inv[row * d + col] = x[row];
        }
    }

    inv
}

/// 加权法方程: 返回 (X^T W X, X^T W z)
///
/// `x` 为 n × p 行优先设计矩阵。
pub fn weighted_normal_equations(x: &[f64], w: &[f64], z: &[f64], p: usize) -> (Vec<f64>, Vec<f64>) {
    let mut xtwx = vec![0.0; p * p];
    let mut xtwz = vec![0.0; p];

    for (i, (&wi, &zi)) in w.iter().zip(z.iter()).enumerate() {
        if wi == 0.0 {
            continue;
        }
        let row = &x[i * p..(i + 1) * p];
        for a in 0..p {
            let wa = wi * row[a];
            xtwz[a] += wa * zi;
            // 只填下三角，最后对称复制
            for b in 0..=a {
                xtwx[a * p + b] += wa * row[b];
            }
        }
    }

    for a in 0..p {
        for b in (a + 1)..p {
            xtwx[a * p + b] = xtwx[b * p + a];
        }
    }

    (xtwx, xtwz)
}

/// 矩阵向量乘法: n × p 矩阵乘以 p 维向量
pub fn mat_vec_mul(a: &[f64], x: &[f64], p: usize) -> Vec<f64> {
    a.chunks_exact(p).map(|row| dot_product(row, x)).collect()
}

/// 向量点积
pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}
