//! Configuration for the settlement engine

use serde::{Deserialize, Serialize};

use crate::types::SettlementStage;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Processor configuration
    pub processor: ProcessorConfig,

    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            processor: ProcessorConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

/// Processor sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Sweep interval in seconds (default: 5 minutes)
    pub sweep_interval_seconds: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 300,
        }
    }
}

/// Monitoring sweep and alert-threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Sweep interval in seconds (default: 15 minutes)
    pub sweep_interval_seconds: u64,

    /// Days overdue before a WARNING alert (default: 1)
    pub overdue_warning_days: i64,

    /// Days overdue before an ERROR alert (default: 3)
    pub overdue_error_days: i64,

    /// Normal duration of each non-terminal stage in hours; a
    /// settlement parked in one stage for more than twice this long is
    /// flagged as stuck
    pub stage_duration_hours: StageDurations,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 900,
            overdue_warning_days: 1,
            overdue_error_days: 3,
            stage_duration_hours: StageDurations::default(),
        }
    }
}

/// Expected hours spent in each non-terminal stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDurations {
    /// Pending
    pub pending: u64,
    /// TransferInitiated
    pub transfer_initiated: u64,
    /// InTransit
    pub in_transit: u64,
    /// AtCustody
    pub at_custody: u64,
}

impl Default for StageDurations {
    fn default() -> Self {
        Self {
            pending: 24,
            transfer_initiated: 24,
            in_transit: 24,
            at_custody: 24,
        }
    }
}

impl StageDurations {
    /// Normal duration for `stage` in hours; None for terminal stages
    pub fn for_stage(&self, stage: SettlementStage) -> Option<u64> {
        match stage {
            SettlementStage::Pending => Some(self.pending),
            SettlementStage::TransferInitiated => Some(self.transfer_initiated),
            SettlementStage::InTransit => Some(self.in_transit),
            SettlementStage::AtCustody => Some(self.at_custody),
            SettlementStage::Settled | SettlementStage::Failed => None,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(interval) = std::env::var("SETTLEMENT_PROCESSOR_INTERVAL_SECONDS") {
            config.processor.sweep_interval_seconds = interval
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid processor interval: {}", e)))?;
        }

        if let Ok(interval) = std::env::var("SETTLEMENT_MONITORING_INTERVAL_SECONDS") {
            config.monitoring.sweep_interval_seconds = interval
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid monitoring interval: {}", e)))?;
        }

        if let Ok(days) = std::env::var("SETTLEMENT_OVERDUE_WARNING_DAYS") {
            config.monitoring.overdue_warning_days = days
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid warning threshold: {}", e)))?;
        }

        if let Ok(days) = std::env::var("SETTLEMENT_OVERDUE_ERROR_DAYS") {
            config.monitoring.overdue_error_days = days
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid error threshold: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject threshold orderings that would misclassify alerts
    pub fn validate(&self) -> crate::Result<()> {
        if self.monitoring.overdue_warning_days < 1 {
            return Err(crate::Error::Config(
                "overdue_warning_days must be at least 1".to_string(),
            ));
        }
        if self.monitoring.overdue_error_days < self.monitoring.overdue_warning_days {
            return Err(crate::Error::Config(
                "overdue_error_days must be >= overdue_warning_days".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processor.sweep_interval_seconds, 300);
        assert_eq!(config.monitoring.overdue_error_days, 3);
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let mut config = Config::default();
        config.monitoring.overdue_warning_days = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            parsed.monitoring.stage_duration_hours.in_transit,
            config.monitoring.stage_duration_hours.in_transit
        );
    }
}
