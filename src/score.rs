//! Conviction scorer — pure function, no hidden state.

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Score one order-flow record on a 0–100 scale, rounded to 1 decimal.
///
/// Additive model:
/// 1. premium tier (whales get a log-scaled bonus on top of the tier base)
/// 2. volume vs open interest (vol > OI means new positions are opening)
/// 3. execution style (SWEEP beats BLOCK; first match wins)
/// 4. urgency (big premium on short DTE) / LEAPS penalty
/// 5. penalties for wide spreads and deep-OTM lottery tickets
pub fn conviction_score(
    premium: f64,
    volume: i64,
    oi: i64,
    spread_pct: f64,
    otm_pct: f64,
    dte: i64,
    code: &str,
) -> f64 {
    let mut score = 0.0f64;

    // 1. Premium weighting
    if premium >= 1_000_000.0 {
        score += 45.0 + clamp((premium / 1_000_000.0).max(1.0).log10() * 15.0, 0.0, 15.0);
    } else if premium >= 100_000.0 {
        score += 25.0 + clamp((premium / 100_000.0).max(1.0).log10() * 15.0, 0.0, 20.0);
    } else {
        score += clamp(premium.max(1.0).log10() * 5.0, 0.0, 25.0);
    }

    // 2. Volume vs open interest
    if oi > 0 {
        let vol_oi_ratio = volume as f64 / oi as f64;
        if vol_oi_ratio > 2.0 {
            score += 20.0;
        } else if vol_oi_ratio > 1.0 {
            score += 10.0;
        } else {
            score += clamp(vol_oi_ratio * 10.0, 0.0, 10.0);
        }
    } else if volume > 500 {
        // No OI but high volume: fresh strike/expiry
        score += 15.0;
    }

    // 3. Execution style
    let code_upper = code.to_uppercase();
    if code_upper.contains("SWEEP") {
        score += 15.0;
    } else if code_upper.contains("BLOCK") {
        score += 10.0;
    }

    // 4. Urgency
    if dte <= 14 && premium >= 100_000.0 {
        score += 10.0;
    } else if dte > 60 {
        score -= 5.0; // LEAPS are less urgent
    }

    // 5. Penalties
    let spread_penalty = clamp(spread_pct * 1.5, 0.0, 15.0);
    let otm_penalty = clamp(otm_pct.max(0.0) * 0.2, 0.0, 10.0);
    score = score - spread_penalty - otm_penalty;

    (clamp(score, 0.0, 100.0) * 10.0).round() / 10.0
}
