//! Traffic control arguments for link impairment
//!
//! A rate ceiling becomes a TBF root qdisc with netem attached as its
//! child; without a rate, netem is the root qdisc. Delay and loss are
//! netem parameters.

use topology::ImpairmentProfile;

/// TBF bucket size
const TBF_BURST_BYTES: u32 = 32 * 1024;
/// Maximum time a packet may sit in the TBF queue
const TBF_LATENCY_MS: u32 = 50;

/// `tc` argument lists (without the `tc` program itself) that apply
/// `profile` to `iface`. Empty for an ideal profile.
pub fn impairment_commands(iface: &str, profile: &ImpairmentProfile) -> Vec<Vec<String>> {
    if profile.is_empty() {
        return Vec::new();
    }

    let mut commands = Vec::new();
    let rate_limited = profile.bandwidth_mbps().is_some();

    if let Some(mbps) = profile.bandwidth_mbps() {
        let rate_kbit = ((mbps * 1000.0).round() as u64).max(1);
        commands.push(words(&[
            "qdisc",
            "replace",
            "dev",
            iface,
            "root",
            "handle",
            "1:",
            "tbf",
            "rate",
            &format!("{}kbit", rate_kbit),
            "burst",
            &format!("{}b", TBF_BURST_BYTES),
            "latency",
            &format!("{}ms", TBF_LATENCY_MS),
        ]));
    }

    let has_netem = profile.delay().is_some() || profile.loss_percent().is_some();
    if has_netem {
        let mut netem = words(&["qdisc", "replace", "dev", iface]);
        if rate_limited {
            netem.extend(words(&["parent", "1:1", "handle", "10:"]));
        } else {
            netem.extend(words(&["root", "handle", "10:"]));
        }
        netem.push("netem".to_string());

        if let Some(delay) = profile.delay() {
            netem.push("delay".to_string());
            netem.push(format!("{}us", delay.as_micros()));
        }
        if let Some(loss) = profile.loss_percent() {
            netem.push("loss".to_string());
            netem.push(format!("{}%", loss));
        }
        commands.push(netem);
    }

    commands
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
