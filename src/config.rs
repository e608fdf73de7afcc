//! Kernel configuration.
//!
//! A [`KernelConfigBuilder`] is mutable and can be loaded from JSON; once
//! validated it is frozen into a shared, immutable [`KernelConfig`].
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::NestError;
use crate::time::TimeBase;

/// Default block size of the spike exchange, in records per rank.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 64;

/// Validated, immutable kernel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Number of threads per rank.
    pub local_num_threads: usize,
    /// Step length in ms.
    pub resolution_ms: f64,
    /// Number of tics per ms.
    pub tics_per_ms: f64,
    /// Exchange spikes with sub-step offsets.
    pub off_grid_spiking: bool,
    /// Initial block size of the spike exchange, in records per rank.
    pub send_buffer_size: usize,
    /// Seed of the global random generator, shared by all ranks.
    pub grng_seed: u64,
    /// Base seed of the per-virtual-process generators.
    pub rng_seed: u64,
    /// Lower bound imposed on the minimum delay, in ms.
    pub min_delay_ms: Option<f64>,
    /// Upper bound imposed on the maximum delay, in ms.
    pub max_delay_ms: Option<f64>,
    /// Log the simulation progress.
    pub print_time: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            local_num_threads: 1,
            resolution_ms: 0.1,
            tics_per_ms: 1000.0,
            off_grid_spiking: false,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            grng_seed: 0,
            rng_seed: 1,
            min_delay_ms: None,
            max_delay_ms: None,
            print_time: false,
        }
    }
}

impl KernelConfig {
    /// The time base derived from the resolution.
    pub fn time_base(&self) -> Result<TimeBase, NestError> {
        TimeBase::new(self.resolution_ms, self.tics_per_ms)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), NestError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| NestError::IOError(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}

/// Mutable configuration, frozen with [`KernelConfigBuilder::build`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn new() -> Self {
        KernelConfigBuilder::default()
    }

    /// Start from a JSON configuration file; missing fields take their defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, NestError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: KernelConfig =
            serde_json::from_reader(reader).map_err(|e| NestError::IOError(e.to_string()))?;
        Ok(KernelConfigBuilder { config })
    }

    pub fn local_num_threads(mut self, n: usize) -> Self {
        self.config.local_num_threads = n;
        self
    }

    pub fn resolution_ms(mut self, resolution: f64) -> Self {
        self.config.resolution_ms = resolution;
        self
    }

    pub fn tics_per_ms(mut self, tics: f64) -> Self {
        self.config.tics_per_ms = tics;
        self
    }

    pub fn off_grid_spiking(mut self, enabled: bool) -> Self {
        self.config.off_grid_spiking = enabled;
        self
    }

    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.config.send_buffer_size = size;
        self
    }

    pub fn grng_seed(mut self, seed: u64) -> Self {
        self.config.grng_seed = seed;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.config.rng_seed = seed;
        self
    }

    pub fn delay_extrema_ms(mut self, min_delay: f64, max_delay: f64) -> Self {
        self.config.min_delay_ms = Some(min_delay);
        self.config.max_delay_ms = Some(max_delay);
        self
    }

    pub fn print_time(mut self, enabled: bool) -> Self {
        self.config.print_time = enabled;
        self
    }

    /// Validate the configuration and freeze it.
    pub fn build(self) -> Result<Arc<KernelConfig>, NestError> {
        let config = self.config;
        if config.local_num_threads == 0 {
            return Err(NestError::InvalidParameter(
                "the number of threads must be positive".to_string(),
            ));
        }
        // Two records are needed to hold the overflow sentinel.
        if config.send_buffer_size < 2 {
            return Err(NestError::InvalidParameter(format!(
                "the send buffer size must be at least 2, got {}",
                config.send_buffer_size
            )));
        }
        let time_base = config.time_base()?;
        match (config.min_delay_ms, config.max_delay_ms) {
            (Some(min_delay), Some(max_delay)) => {
                let min_steps = time_base.delay_ms_to_steps(min_delay)?;
                let max_steps = time_base.delay_ms_to_steps(max_delay)?;
                if min_steps > max_steps {
                    return Err(NestError::InvalidDelay(format!(
                        "min_delay {} ms exceeds max_delay {} ms",
                        min_delay, max_delay
                    )));
                }
            }
            (None, None) => {}
            _ => {
                return Err(NestError::InvalidDelay(
                    "min_delay and max_delay must be set together".to_string(),
                ))
            }
        }
        Ok(Arc::new(config))
    }
}

impl From<KernelConfig> for KernelConfigBuilder {
    fn from(config: KernelConfig) -> Self {
        KernelConfigBuilder { config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_is_valid() {
        let config = KernelConfigBuilder::new().build().unwrap();
        assert_eq!(config.local_num_threads, 1);
        assert_eq!(config.time_base().unwrap().tics_per_step(), 100);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(KernelConfigBuilder::new().local_num_threads(0).build().is_err());
        assert!(KernelConfigBuilder::new().send_buffer_size(1).build().is_err());
        assert!(KernelConfigBuilder::new().resolution_ms(-1.0).build().is_err());
        assert!(matches!(
            KernelConfigBuilder::new().delay_extrema_ms(2.0, 1.0).build(),
            Err(NestError::InvalidDelay(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kernel.json");

        let config = KernelConfigBuilder::new()
            .local_num_threads(4)
            .off_grid_spiking(true)
            .delay_extrema_ms(0.5, 3.0)
            .build()
            .unwrap();
        config.save_to(&path).unwrap();

        let loaded = KernelConfigBuilder::load_from(&path).unwrap().build().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "local_num_threads": 3, "grng_seed": 9 }"#).unwrap();

        let loaded = KernelConfigBuilder::load_from(&path).unwrap().build().unwrap();
        assert_eq!(loaded.local_num_threads, 3);
        assert_eq!(loaded.grng_seed, 9);
        assert_eq!(loaded.send_buffer_size, DEFAULT_SEND_BUFFER_SIZE);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            KernelConfigBuilder::load_from(dir.path().join("missing.json")),
            Err(NestError::IOError(_))
        ));
    }
}
