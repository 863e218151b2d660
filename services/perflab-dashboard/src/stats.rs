//! Steady-state statistics over replicated experiment children.

use perflab_core::SteadyStateStats;

/// Two-sided 95% Student-t quantiles (`t_{0.975, df}`) for df 1..=30;
/// larger samples fall back to the normal quantile.
const T_TABLE_975: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];

const NORMAL_975: f64 = 1.96;

/// `t_{0.975, df}` for the 95% confidence interval.
#[must_use]
pub fn t_quantile_975(df: usize) -> f64 {
    match df {
        0 => f64::NAN,
        1..=30 => T_TABLE_975[df - 1],
        _ => NORMAL_975,
    }
}

/// Mean, sample standard deviation (n-1 denominator) and 95% CI over the
/// per-child samples of one QPS point. `None` for an empty sample set;
/// a single sample reports itself with a degenerate interval.
#[must_use]
pub fn steady_state(samples: &[f64]) -> Option<SteadyStateStats> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if n == 1 {
        return Some(SteadyStateStats {
            mean,
            std_dev: 0.0,
            conf_lower: mean,
            conf_upper: mean,
            min,
            max,
            sample_size: 1,
            confidence_level: 0.95,
        });
    }

    let variance = samples
        .iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / (n - 1) as f64;
    let std_dev = variance.sqrt();
    let half_width = t_quantile_975(n - 1) * std_dev / (n as f64).sqrt();

    Some(SteadyStateStats {
        mean,
        std_dev,
        conf_lower: mean - half_width,
        conf_upper: mean + half_width,
        min,
        max,
        sample_size: n,
        confidence_level: 0.95,
    })
}
