//! Layered startup configuration: built-in defaults, overridden by an
//! optional TOML file, overridden in turn by environment variables.

use std::{fs, net::IpAddr, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_dimension() -> usize {
    128
}

fn default_num_cells() -> usize {
    16
}

fn default_metric() -> String {
    "l2".to_string()
}

fn default_probes() -> usize {
    1
}

/// Startup configuration for `ivf-server`: the external collaborator that
/// wires host/port/dimension/cell-count into a fresh index.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Vector dimension `D`, fixed for the lifetime of the index.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Cell count `N`, fixed for the lifetime of the index.
    #[serde(default = "default_num_cells")]
    pub num_cells: usize,
    /// Metric tag used when a request omits one.
    #[serde(default = "default_metric")]
    pub default_metric: String,
    /// Default probe count `P` used when a request omits one.
    #[serde(default = "default_probes")]
    pub default_probes: usize,
    /// Generate and load random demo vectors, then reindex, at startup.
    #[serde(default)]
    pub demo_load: bool,
    /// Number of demo vectors to generate when `demo_load` is set.
    #[serde(default)]
    pub demo_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dimension: default_dimension(),
            num_cells: default_num_cells(),
            default_metric: default_metric(),
            default_probes: default_probes(),
            demo_load: false,
            demo_size: 0,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file if it exists, then apply
    /// environment overrides. A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading config file: {path:?}"))?;
            toml::from_str::<ServiceConfig>(&contents)
                .with_context(|| format!("parsing config file: {path:?}"))?
        } else {
            ServiceConfig::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("IVF_HOST") {
            self.host = host
                .parse()
                .map_err(|_| anyhow!("IVF_HOST is not a valid IP address: {host}"))?;
        }
        if let Ok(port) = std::env::var("IVF_PORT") {
            self.port = port
                .parse()
                .map_err(|_| anyhow!("IVF_PORT is not a valid port: {port}"))?;
        }
        if let Ok(dim) = std::env::var("IVF_DIMENSION") {
            self.dimension = dim
                .parse()
                .map_err(|_| anyhow!("IVF_DIMENSION is not a valid integer: {dim}"))?;
        }
        if let Ok(cells) = std::env::var("IVF_NUM_CELLS") {
            self.num_cells = cells
                .parse()
                .map_err(|_| anyhow!("IVF_NUM_CELLS is not a valid integer: {cells}"))?;
        }
        if let Ok(metric) = std::env::var("IVF_DEFAULT_METRIC") {
            self.default_metric = metric;
        }
        if let Ok(probes) = std::env::var("IVF_DEFAULT_PROBES") {
            self.default_probes = probes
                .parse()
                .map_err(|_| anyhow!("IVF_DEFAULT_PROBES is not a valid integer: {probes}"))?;
        }
        if let Ok(demo) = std::env::var("IVF_DEMO_LOAD") {
            self.demo_load = matches!(demo.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(size) = std::env::var("IVF_DEMO_SIZE") {
            self.demo_size = size
                .parse()
                .map_err(|_| anyhow!("IVF_DEMO_SIZE is not a valid integer: {size}"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(anyhow!("dimension must be >= 1"));
        }
        if self.num_cells == 0 {
            return Err(anyhow!("num_cells must be >= 1"));
        }
        if self.demo_load && self.demo_size == 0 {
            return Err(anyhow!("demo_load requires a non-zero demo_size"));
        }
        Ok(())
    }
}
