//! Run configuration: optional JSON file plus command-line overrides
//!
//! ```json
//! {
//!   "address_base": "10.0.0.0",
//!   "relays": 2,
//!   "relay_advertise": "primary_relay",
//!   "delivery": { "bandwidth_mbps": 10, "delay_ms": 5, "loss_percent": 5 },
//!   "paths": { "bin_dir": "./target", "media_source": "./dev/bbb.fmp4" }
//! }
//! ```
//!
//! Every field is optional. Delivery impairment fields that are not set
//! keep the degraded defaults (10 Mbit/s, 5 ms, 5 % loss).

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use topology::{
    AddressPlan, HarnessPaths, ImpairmentConfig, ImpairmentProfile, RelayAdvertise, TopologyBuilder,
};
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Network address of the /24 holding every host
    pub address_base: Option<Ipv4Addr>,
    pub relays: Option<usize>,
    pub relay_advertise: Option<RelayAdvertise>,
    pub delivery: ImpairmentConfig,
    pub paths: HarnessPaths,
}

/// Topology flags shared by `up` and `show`; they win over the file
#[derive(Args, Clone, Debug, Default)]
pub struct TopologyArgs {
    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of relays
    #[arg(long)]
    pub relays: Option<usize>,

    /// Delivery link rate in Mbit/s
    #[arg(long)]
    pub bandwidth_mbps: Option<f64>,

    /// Delivery link one-way delay in milliseconds
    #[arg(long)]
    pub delay_ms: Option<i64>,

    /// Delivery link loss percentage
    #[arg(long)]
    pub loss_percent: Option<f64>,

    /// Address relays advertise to the API: primary or own
    #[arg(long)]
    pub relay_advertise: Option<RelayAdvertise>,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// File (if any) with the command-line flags applied on top
    pub fn resolve(args: &TopologyArgs) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(base.with_overrides(args))
    }

    pub fn with_overrides(mut self, args: &TopologyArgs) -> Self {
        self.relays = args.relays.or(self.relays);
        self.relay_advertise = args.relay_advertise.or(self.relay_advertise);
        self.delivery = self.delivery.merge(ImpairmentConfig {
            bandwidth_mbps: args.bandwidth_mbps,
            delay_ms: args.delay_ms,
            loss_percent: args.loss_percent,
        });
        self
    }

    pub fn delivery_profile(&self) -> Result<ImpairmentProfile> {
        let profile = ImpairmentConfig::from(&ImpairmentProfile::degraded_delivery())
            .merge(self.delivery.clone())
            .into_profile()?;
        Ok(profile)
    }

    pub fn builder(&self) -> Result<TopologyBuilder> {
        let plan = match self.address_base {
            Some(base) => AddressPlan::from_base(base)?,
            None => AddressPlan::default(),
        };

        let mut builder = TopologyBuilder::new(plan, self.paths.clone())
            .delivery_impairment(self.delivery_profile()?);
        if let Some(relays) = self.relays {
            builder = builder.relays(relays);
        }
        if let Some(advertise) = self.relay_advertise {
            builder = builder.relay_advertise(advertise);
        }
        Ok(builder)
    }
}
