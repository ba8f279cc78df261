//! Traffic-Control Applier (§4.7) — translates `intf-constraints` into
//! `tc qdisc` invocations on the node-side interface.
//!
//! Grounded in `netns-testbench::qdisc`'s `ip netns exec <ns> tc qdisc
//! replace ...` shell-out pattern, generalised to the declarative
//! rate/netem stacking §4.7 requires.

use tokio::process::Command;
use tracing::debug;

use crate::error::MunetError;
use crate::model::constraints::IntfConstraints;
use crate::numfmt::parse_number64;

/// Apply `constraints` to `iface` inside network namespace `ns_name`.
///
/// - Only `rate.rate` set: a `tbf` qdisc as root.
/// - delay/jitter/loss set, no rate: a `netem` qdisc as root.
/// - Both: `tbf` as root (handle `1:`), `netem` as its child (parent `1:1`),
///   so delay/loss act on already-shaped traffic.
pub async fn apply_constraints(
    ns_name: &str,
    iface: &str,
    constraints: &IntfConstraints,
) -> Result<(), MunetError> {
    if constraints.is_empty() {
        return Ok(());
    }

    let has_rate = constraints.rate.is_some();
    let has_netem = constraints.has_netem_fields() || constraints.jitter.is_some();

    if has_rate && has_netem {
        apply_tbf(ns_name, iface, "root handle 1:", constraints).await?;
        apply_netem(ns_name, iface, "parent 1:1", constraints).await?;
    } else if has_rate {
        apply_tbf(ns_name, iface, "root", constraints).await?;
    } else if has_netem {
        apply_netem(ns_name, iface, "root", constraints).await?;
    }
    Ok(())
}

async fn apply_tbf(
    ns_name: &str,
    iface: &str,
    placement: &str,
    constraints: &IntfConstraints,
) -> Result<(), MunetError> {
    let rate = constraints
        .rate
        .as_ref()
        .expect("apply_tbf only called when rate is set");

    // `parse_number64` normalises every `number64` value to bytes, so
    // `rate_bytes_per_sec` is already in the unit `tc`'s own `bps` suffix
    // expects — no further bit/byte conversion needed here.
    let rate_bytes_per_sec = parse_number64(&rate.rate)?;
    let burst_bytes = match &rate.burst {
        Some(b) => parse_number64(b)?,
        // A small default burst: 10ms worth of traffic at the configured
        // rate, floored at one MTU-ish 1500 bytes.
        None => std::cmp::max(rate_bytes_per_sec / 100, 1500),
    };
    let limit_bytes = match &rate.limit {
        Some(l) => parse_number64(l)?,
        None => burst_bytes * 10,
    };

    let mut args: Vec<String> = tc_prefix(ns_name, iface);
    args.extend(placement.split_whitespace().map(str::to_string));
    args.push("tbf".to_string());
    args.push("rate".to_string());
    args.push(format!("{rate_bytes_per_sec}bps"));
    args.push("burst".to_string());
    args.push(format!("{burst_bytes}b"));
    args.push("limit".to_string());
    args.push(format!("{limit_bytes}b"));

    run_tc(&args).await
}

async fn apply_netem(
    ns_name: &str,
    iface: &str,
    placement: &str,
    constraints: &IntfConstraints,
) -> Result<(), MunetError> {
    let mut args: Vec<String> = tc_prefix(ns_name, iface);
    args.extend(placement.split_whitespace().map(str::to_string));
    args.push("netem".to_string());

    if let Some(delay) = &constraints.delay {
        args.push("delay".to_string());
        args.push(delay.clone());
        if let Some(jitter) = &constraints.jitter {
            args.push(jitter.clone());
            if let Some(corr) = constraints.jitter_correlation {
                args.push(format!("{corr}%"));
            }
        }
    }
    if let Some(loss) = constraints.loss {
        args.push("loss".to_string());
        args.push(format!("{loss}%"));
        if let Some(corr) = constraints.loss_correlation {
            args.push(format!("{corr}%"));
        }
    }

    run_tc(&args).await
}

fn tc_prefix(ns_name: &str, iface: &str) -> Vec<String> {
    vec![
        "netns".to_string(),
        "exec".to_string(),
        ns_name.to_string(),
        "tc".to_string(),
        "qdisc".to_string(),
        "replace".to_string(),
        "dev".to_string(),
        iface.to_string(),
    ]
}

async fn run_tc(args: &[String]) -> Result<(), MunetError> {
    debug!(args = ?args, "applying tc qdisc");
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(MunetError::Io)?;
    if !output.status.success() {
        return Err(MunetError::Internal(format!(
            "tc qdisc replace failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Remove all qdiscs from `iface` inside `ns_name`, best-effort.
pub async fn clear_constraints(ns_name: &str, iface: &str) -> Result<(), MunetError> {
    let args = vec![
        "netns".to_string(),
        "exec".to_string(),
        ns_name.to_string(),
        "tc".to_string(),
        "qdisc".to_string(),
        "del".to_string(),
        "dev".to_string(),
        iface.to_string(),
        "root".to_string(),
    ];
    let _ = Command::new("ip").args(&args).output().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::constraints::RateConstraint;

    #[test]
    fn empty_constraints_have_no_effect() {
        assert!(IntfConstraints::default().is_empty());
    }

    #[test]
    fn rate_only_is_not_netem() {
        let c = IntfConstraints {
            rate: Some(RateConstraint {
                rate: "10M".into(),
                limit: None,
                burst: None,
            }),
            ..Default::default()
        };
        assert!(!c.is_empty());
        assert!(!c.has_netem_fields());
    }
}
