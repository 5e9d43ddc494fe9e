//! Data Sanitization
//!
//! Numeric validation of observation columns.
//!
//! Missing cells are encoded as `NaN`; infinities are never valid data.

/// 单元格是否缺失
#[inline]
pub fn is_missing(x: f64) -> bool {
    x.is_nan()
}

/// 缺失单元格数
pub fn count_missing(arr: &[f64]) -> usize {
    arr.iter().filter(|&&x| is_missing(x)).count()
}

/// 检查是否包含无穷值（缺失值不算）
pub fn has_infinite_values(arr: &[f64]) -> bool {
    arr.iter().any(|&x| x.is_infinite())
}

/// 完整观测的 0/1 列
pub fn is_binary_column(arr: &[f64]) -> bool {
    arr.iter().all(|&x| x == 0.0 || x == 1.0)
}

/// 忽略缺失值后仍为 0/1 列
pub fn is_binary_ignoring_missing(arr: &[f64]) -> bool {
    arr.iter().all(|&x| is_missing(x) || x == 0.0 || x == 1.0)
}

/// 第一个非法权重的位置（缺失、无穷或负数）
pub fn first_invalid_weight(arr: &[f64]) -> Option<usize> {
    arr.iter()
        .position(|&w| w.is_nan() || w.is_infinite() || w < 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_missing() {
        assert_eq!(count_missing(&[1.0, f64::NAN, 2.0, f64::NAN]), 2);
        assert_eq!(count_missing(&[]), 0);
    }

    #[test]
    fn test_has_infinite_values_ignores_missing() {
        assert!(!has_infinite_values(&[f64::NAN, 1.0]));
        assert!(has_infinite_values(&[f64::INFINITY, 1.0]));
    }

    #[test]
    fn test_is_binary_column() {
        assert!(is_binary_column(&[0.0, 1.0, 1.0]));
        assert!(!is_binary_column(&[0.0, 2.0]));
        assert!(!is_binary_column(&[0.0, f64::NAN]));
    }

    #[test]
    fn test_is_binary_ignoring_missing() {
        assert!(is_binary_ignoring_missing(&[0.0, f64::NAN, 1.0]));
        assert!(!is_binary_ignoring_missing(&[0.5]));
    }

    #[test]
    fn test_first_invalid_weight() {
        assert_eq!(first_invalid_weight(&[1.0, 0.0, 2.5]), None);
        assert_eq!(first_invalid_weight(&[1.0, -0.1]), Some(1));
        assert_eq!(first_invalid_weight(&[f64::NAN]), Some(0));
    }
}
