//! Service configuration types.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use std::time::Duration;

#[serde_with::serde_as]
#[derive(Builder, Clone, Debug, Serialize, Deserialize)]
#[builder(build_fn(skip))]
/// Configuration consumed by [`Momo::new`](crate::Momo::new).
/// Build with [`MomoConfig::builder`](Self::builder).
///
/// # Examples
///
/// ```
/// use momo::MomoConfig;
/// use std::time::Duration;
///
/// let config = MomoConfig::builder()
///     .schedule_name("orders")
///     .ping_interval(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.schedule_name, "orders");
/// ```
pub struct MomoConfig {
    #[builder(setter(into))]
    #[serde(default = "default_schedule_name")]
    /// Groups redundant instances into one leader-elected cluster. Instances
    /// sharing a name coordinate so only one of them runs the jobs.
    pub schedule_name: String,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(default = "default_ping_interval")]
    /// How often this instance refreshes its liveness row. An instance is
    /// considered dead once its row is older than twice this interval.
    pub ping_interval: Duration,
}

impl MomoConfig {
    /// Create a [`MomoConfigBuilder`] with defaults for all settings.
    pub fn builder() -> MomoConfigBuilder {
        MomoConfigBuilder::default()
    }
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            schedule_name: default_schedule_name(),
            ping_interval: default_ping_interval(),
        }
    }
}

impl MomoConfigBuilder {
    /// Validate and construct a [`MomoConfig`].
    pub fn build(&mut self) -> Result<MomoConfig, String> {
        let ping_interval = self.ping_interval.unwrap_or_else(default_ping_interval);
        if ping_interval.is_zero() {
            return Err("ping_interval must be greater than zero".to_string());
        }
        Ok(MomoConfig {
            schedule_name: self
                .schedule_name
                .clone()
                .unwrap_or_else(default_schedule_name),
            ping_interval,
        })
    }
}

fn default_schedule_name() -> String {
    "momo".to_string()
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(60)
}
