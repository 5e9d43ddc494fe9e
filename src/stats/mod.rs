//! Descriptive statistics helpers shared by the estimator, diagnostics and bootstrap.

use crate::types::{HistogramBin, EPSILON};

/// 均值
pub fn mean(arr: &[f64]) -> f64 {
    if arr.is_empty() {
        return 0.0;
    }
    arr.iter().sum::<f64>() / arr.len() as f64
}

/// 加权均值（权重和为 0 时返回 NaN）
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let (num, den) = values
        .iter()
        .zip(weights.iter())
        .fold((0.0, 0.0), |(num, den), (&v, &w)| (num + w * v, den + w));
    if den.abs() < EPSILON {
        f64::NAN
    } else {
        num / den
    }
}

/// 方差（样本方差，使用 n-1）
pub fn variance(arr: &[f64]) -> f64 {
    if arr.len() < 2 {
        return 0.0;
    }
    let m = mean(arr);
    let sum_sq: f64 = arr.iter().map(|x| (x - m).powi(2)).sum();
    sum_sq / (arr.len() - 1) as f64
}

/// 分位数（线性插值，q ∈ [0, 1]）
pub fn quantile(arr: &[f64], q: f64) -> f64 {
    if arr.is_empty() {
        return f64::NAN;
    }
    let mut sorted = arr.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// 中位数
pub fn median(arr: &[f64]) -> f64 {
    quantile(arr, 0.5)
}

/// 标准正态CDF（Abramowitz-Stegun 近似）
pub fn normal_cdf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs() / std::f64::consts::SQRT_2;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0
        - (a1 * t + a2 * t.powi(2) + a3 * t.powi(3) + a4 * t.powi(4) + a5 * t.powi(5))
            * (-x * x).exp();

    0.5 * (1.0 + sign * y)
}

/// 双侧 p 值
pub fn two_sided_p_value(z: f64) -> f64 {
    if !z.is_finite() {
        return 0.0;
    }
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

/// 计算AUC（ROC曲线下面积，并列分数按 0.5 计）
pub fn compute_auc(scores: &[f64], labels: &[u8]) -> f64 {
    if scores.len() != labels.len() || scores.is_empty() {
        return 0.5;
    }

    let n_pos = labels.iter().filter(|&&l| l == 1).count();
    let n_neg = labels.len() - n_pos;

    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut pairs: Vec<(f64, u8)> = scores
        .iter()
        .zip(labels.iter())
        .map(|(&s, &l)| (s, l))
        .collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    // 按升序分组累计：每个负样本贡献低于它的正样本个数
    let mut auc = 0.0;
    let mut neg_below = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        let mut pos_tied = 0.0;
        let mut neg_tied = 0.0;
        while j < pairs.len() && pairs[j].0 == pairs[i].0 {
            if pairs[j].1 == 1 {
                pos_tied += 1.0;
            } else {
                neg_tied += 1.0;
            }
            j += 1;
        }
        auc += pos_tied * (neg_below + 0.5 * neg_tied);
        neg_below += neg_tied;
        i = j;
    }

    auc / (n_pos as f64 * n_neg as f64)
}

/// 等宽直方图
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if (max - min).abs() < EPSILON {
        1.0
    } else {
        (max - min) / bins as f64
    };

    let mut counts = vec![0usize; bins];
    for &v in values {
        let bin = (((v - min) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count,
        })
        .collect()
}
