//! 缓动函数

/// Smoothstep：`t² (3 - 2t)`
///
/// 输入先被限制到 `[0, 1]`。端点处导数为 0，起停无冲击。
#[inline]
pub fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_smoothstep_endpoints() {
        assert_eq!(smoothstep(0.0), 0.0);
        assert_eq!(smoothstep(0.5), 0.5);
        assert_eq!(smoothstep(1.0), 1.0);
        assert_eq!(smoothstep(-1.0), 0.0);
        assert_eq!(smoothstep(2.0), 1.0);
    }

    #[test]
    fn test_smoothstep_flat_at_endpoints() {
        let h = 1e-4;
        let start_slope = (smoothstep(h) - smoothstep(0.0)) / h;
        let end_slope = (smoothstep(1.0) - smoothstep(1.0 - h)) / h;
        assert!(start_slope.abs() < 1e-3);
        assert!(end_slope.abs() < 1e-3);

        // 中点斜率为 1.5
        let mid_slope = (smoothstep(0.5 + h) - smoothstep(0.5 - h)) / (2.0 * h);
        assert!((mid_slope - 1.5).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn test_smoothstep_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(smoothstep(lo) <= smoothstep(hi));
        }

        #[test]
        fn test_smoothstep_symmetric(t in 0.0f64..=1.0) {
            prop_assert!((smoothstep(t) + smoothstep(1.0 - t) - 1.0).abs() < 1e-12);
        }
    }
}
