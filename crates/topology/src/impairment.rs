//! Link impairment profiles
//!
//! An [`ImpairmentProfile`] describes how a link degrades traffic: a
//! bandwidth ceiling, a one-way delay and a random loss probability. Every
//! field is optional; a profile with nothing set means "ideal link" and is
//! never attached to a [`LinkSpec`](crate::LinkSpec).

use crate::ValidationError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Bandwidth/delay/loss applied symmetrically to both directions of a link
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ImpairmentProfile {
    /// Rate ceiling in Mbit/s
    #[serde(skip_serializing_if = "Option::is_none")]
    bandwidth_mbps: Option<f64>,
    /// One-way delay
    #[serde(
        rename = "delay_ms",
        serialize_with = "serialize_delay_ms",
        skip_serializing_if = "Option::is_none"
    )]
    delay: Option<Duration>,
    /// Random loss percentage (0-100)
    #[serde(skip_serializing_if = "Option::is_none")]
    loss_percent: Option<f64>,
}

impl ImpairmentProfile {
    /// Create a validated profile
    pub fn new(
        bandwidth_mbps: Option<f64>,
        delay: Option<Duration>,
        loss_percent: Option<f64>,
    ) -> Result<Self, ValidationError> {
        if let Some(bw) = bandwidth_mbps {
            if !bw.is_finite() || bw <= 0.0 {
                return Err(ValidationError::InvalidBandwidth(bw));
            }
        }
        if let Some(loss) = loss_percent {
            if !loss.is_finite() || !(0.0..=100.0).contains(&loss) {
                return Err(ValidationError::LossOutOfRange(loss));
            }
        }

        Ok(Self {
            bandwidth_mbps,
            delay,
            loss_percent,
        })
    }

    pub fn builder() -> ImpairmentBuilder {
        ImpairmentBuilder::default()
    }

    /// The delivery-path conditions of the failover scenario: 10 Mbit/s,
    /// 5 ms and 5 % loss on each subscriber path.
    pub fn degraded_delivery() -> Self {
        Self {
            bandwidth_mbps: Some(10.0),
            delay: Some(Duration::from_millis(5)),
            loss_percent: Some(5.0),
        }
    }

    /// True when no field is set, i.e. the profile describes an ideal link
    pub fn is_empty(&self) -> bool {
        self.bandwidth_mbps.is_none() && self.delay.is_none() && self.loss_percent.is_none()
    }

    pub fn bandwidth_mbps(&self) -> Option<f64> {
        self.bandwidth_mbps
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn loss_percent(&self) -> Option<f64> {
        self.loss_percent
    }
}

impl fmt::Display for ImpairmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "ideal");
        }

        let mut parts = Vec::new();
        if let Some(bw) = self.bandwidth_mbps {
            parts.push(format!("{}Mbit", bw));
        }
        if let Some(delay) = self.delay {
            parts.push(format!("{}ms", delay.as_millis()));
        }
        if let Some(loss) = self.loss_percent {
            parts.push(format!("{}% loss", loss));
        }
        write!(f, "{}", parts.join(" "))
    }
}

fn serialize_delay_ms<S: Serializer>(delay: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match delay {
        Some(d) => s.serialize_u64(d.as_millis() as u64),
        None => s.serialize_none(),
    }
}

/// Builder accepting loosely typed input (e.g. from CLI flags or a config file)
#[derive(Clone, Debug, Default)]
pub struct ImpairmentBuilder {
    bandwidth_mbps: Option<f64>,
    delay_ms: Option<i64>,
    delay: Option<Duration>,
    loss_percent: Option<f64>,
}

impl ImpairmentBuilder {
    pub fn bandwidth_mbps(mut self, mbps: f64) -> Self {
        self.bandwidth_mbps = Some(mbps);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.delay_ms = None;
        self
    }

    /// Signed milliseconds; negative values are rejected by `build()`
    pub fn delay_ms(mut self, ms: i64) -> Self {
        self.delay_ms = Some(ms);
        self.delay = None;
        self
    }

    pub fn loss_percent(mut self, loss: f64) -> Self {
        self.loss_percent = Some(loss);
        self
    }

    pub fn build(self) -> Result<ImpairmentProfile, ValidationError> {
        let delay = match self.delay_ms {
            Some(ms) if ms < 0 => return Err(ValidationError::NegativeDelay(ms)),
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => self.delay,
        };
        ImpairmentProfile::new(self.bandwidth_mbps, delay, self.loss_percent)
    }
}

/// Impairment as written in a config file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpairmentConfig {
    pub bandwidth_mbps: Option<f64>,
    pub delay_ms: Option<i64>,
    pub loss_percent: Option<f64>,
}

impl ImpairmentConfig {
    pub fn into_profile(self) -> Result<ImpairmentProfile, ValidationError> {
        let mut builder = ImpairmentProfile::builder();
        if let Some(bw) = self.bandwidth_mbps {
            builder = builder.bandwidth_mbps(bw);
        }
        if let Some(ms) = self.delay_ms {
            builder = builder.delay_ms(ms);
        }
        if let Some(loss) = self.loss_percent {
            builder = builder.loss_percent(loss);
        }
        builder.build()
    }

    /// Overlay the fields set in `other` on top of this config
    pub fn merge(self, other: ImpairmentConfig) -> Self {
        Self {
            bandwidth_mbps: other.bandwidth_mbps.or(self.bandwidth_mbps),
            delay_ms: other.delay_ms.or(self.delay_ms),
            loss_percent: other.loss_percent.or(self.loss_percent),
        }
    }
}

impl From<&ImpairmentProfile> for ImpairmentConfig {
    fn from(profile: &ImpairmentProfile) -> Self {
        Self {
            bandwidth_mbps: profile.bandwidth_mbps,
            delay_ms: profile.delay.map(|d| d.as_millis() as i64),
            loss_percent: profile.loss_percent,
        }
    }
}
