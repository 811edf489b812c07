//! Logarithmic Market Scoring Rule cost function and premium computation
//! (spec.md §4.5) — a Rust port of the "Go market engine's cost function"
//! the original pricing service documents itself as porting.

/// Numerically stable log-sum-exp with max-shift.
fn log_sum_exp(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() && max_val < 0.0 {
        return f64::NEG_INFINITY;
    }
    max_val + xs.iter().map(|x| (x - max_val).exp()).sum::<f64>().ln()
}

/// `C(q) = b * ln(exp(q_yes/b) + exp(q_no/b))`.
pub fn cost(q_yes: f64, q_no: f64, b: f64) -> f64 {
    b * log_sum_exp(&[q_yes / b, q_no / b])
}

/// Instantaneous YES price (softmax of the two quantities).
pub fn price(q_yes: f64, q_no: f64, b: f64) -> f64 {
    let y = q_yes / b;
    let n = q_no / b;
    let max_val = y.max(n);
    let exp_y = (y - max_val).exp();
    let exp_n = (n - max_val).exp();
    exp_y / (exp_y + exp_n)
}

/// Cost of buying `delta_yes` shares of YES.
pub fn trade_cost(q_yes: f64, q_no: f64, delta_yes: f64, b: f64) -> f64 {
    cost(q_yes + delta_yes, q_no, b) - cost(q_yes, q_no, b)
}

/// Derives `(q_yes, q_no)` such that the instantaneous price equals `p`,
/// with `q_no` held at zero. `p` is clipped to `[0.001, 0.999]` before the
/// logit to avoid infinities.
pub fn quantities_from_probability(p: f64, b: f64) -> (f64, f64) {
    let clipped = p.clamp(0.001, 0.999);
    let q_yes = b * (clipped / (1.0 - clipped)).ln();
    (q_yes, 0.0)
}

/// `round(trade_cost(q_yes, 0, 1, b) * notional * (1 + loading_factor), 2)`,
/// floored at `0.01` (spec.md §4.5).
pub fn premium(p: f64, notional: f64, b: f64, loading_factor: f64) -> f64 {
    let (q_yes, q_no) = quantities_from_probability(p, b);
    let fill_cost = trade_cost(q_yes, q_no, 1.0, b);
    let raw_premium = fill_cost * notional * (1.0 + loading_factor);
    let rounded = (raw_premium * 100.0).round() / 100.0;
    rounded.max(0.01)
}
