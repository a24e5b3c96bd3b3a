use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fixes whose radius of uncertainty is at least this are dropped.
    pub accuracy_threshold_m: f64,
    /// Minimum distance to the last accepted point.
    pub min_distance_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            accuracy_threshold_m: 50.,
            min_distance_m: 30.,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Intermediate points closer than this to the previous waypoint are
    /// skipped when building a request.
    pub min_waypoint_distance_m: f64,
    /// A chunk is closed once it holds more than this many waypoints.
    pub max_waypoints_per_call: usize,
    /// Provider calls per device per day.
    pub daily_limit: u32,
}

impl Default for RouteConfig {
    fn default() -> Self {
        RouteConfig {
            min_waypoint_distance_m: 100.,
            max_waypoints_per_call: 20,
            daily_limit: 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub mode: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://maps.googleapis.com/maps/api/directions/json".to_string(),
            api_key: String::new(),
            mode: "driving".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterConfig,
    pub route: RouteConfig,
    pub provider: ProviderConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }
}
