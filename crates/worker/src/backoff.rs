use std::time::Duration;

/// 浮点误差容忍度，距离整数小于该值时视为整数
const INTEGER_EPSILON: f64 = 1e-6;

/// 重试等待时间曲线
///
/// `retries >= 2` 时为 `f(x) = a + b^x`，满足 `f(0) = delay`、
/// `f(retries - 1) = max_delay`；否则为常量 `delay`。
/// 输入按整秒计算，输出向下取整到秒。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffCurve {
    Constant(Duration),
    Exponential { a: f64, b: f64 },
}

impl BackoffCurve {
    pub fn new(retries: u16, delay: Duration, max_delay: Duration) -> Self {
        if retries <= 1 {
            return BackoffCurve::Constant(delay);
        }

        let delay = delay.as_secs() as f64;
        let max_delay = max_delay.as_secs() as f64;

        let a = delay - 1.0;
        let b = (max_delay - delay + 1.0).powf(1.0 / f64::from(retries - 1));

        BackoffCurve::Exponential { a, b }
    }

    /// 第 `tries` 次失败后的等待时间（`tries` 从0开始）
    pub fn next_delay(&self, tries: u16) -> Duration {
        match *self {
            BackoffCurve::Constant(delay) => delay,
            BackoffCurve::Exponential { a, b } => {
                let value = a + b.powi(i32::from(tries));
                Duration::from_secs(whole_seconds(value))
            }
        }
    }
}

fn whole_seconds(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return if value == f64::INFINITY { u64::MAX } else { 0 };
    }

    let rounded = value.round();
    let seconds = if (value - rounded).abs() < INTEGER_EPSILON {
        rounded
    } else {
        value.floor()
    };
    seconds as u64
}
