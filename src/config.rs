use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::fees::optimizer::FeeRules;
use crate::rebalance::planner::RebalanceConfig;
use crate::scoring::ScoringConfig;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub scoring: ScoringSection,
    #[serde(default)]
    pub fees: FeesSection,
    #[serde(default)]
    pub rebalance: RebalanceSection,
    #[serde(default)]
    pub collector: CollectorSection,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Dry-run mode: log decisions but execute nothing
    #[serde(default)]
    pub dry_run: bool,
    /// Path to the telemetry SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    /// Path to the node's command-line client
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,
    /// Extra flags prepended to every invocation (network, macaroon path, ...)
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoringSection {
    /// Desired local share of each channel
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f64,
    /// Dead band around the target before a channel needs anything
    #[serde(default = "default_tolerance_ratio")]
    pub tolerance_ratio: f64,
    /// Channels under this capacity are treated as low-liquidity
    #[serde(default = "default_low_liquidity_capacity")]
    pub low_liquidity_capacity_sats: i64,
    /// Balance on one side counting as significant for categorization
    #[serde(default = "default_significant_balance")]
    pub significant_balance_sats: i64,
}

#[derive(Debug, Deserialize)]
pub struct FeesSection {
    /// Base PPM per category
    #[serde(default = "default_low_liquidity_ppm")]
    pub low_liquidity_ppm: i64,
    #[serde(default = "default_inbound_ppm")]
    pub inbound_ppm: i64,
    #[serde(default = "default_balanced_ppm")]
    pub balanced_ppm: i64,
    #[serde(default = "default_outbound_ppm")]
    pub outbound_ppm: i64,
    /// Fixed fee component for recommendations
    #[serde(default = "default_base_fee_msat")]
    pub base_fee_msat: i64,
    /// Recommendation clamp bounds
    #[serde(default = "default_min_ppm")]
    pub min_ppm: i64,
    #[serde(default = "default_max_ppm")]
    pub max_ppm: i64,
    /// Used when the channel's own advertised policy cannot be resolved
    #[serde(default = "default_time_lock_delta")]
    pub default_time_lock_delta: u32,
}

#[derive(Debug, Deserialize)]
pub struct RebalanceSection {
    /// Maximum estimated fee as a percentage of the amount
    #[serde(default = "default_max_fee_rate_pct")]
    pub max_fee_rate_pct: f64,
    /// Absolute estimated-fee ceiling per proposal (satoshis)
    #[serde(default = "default_max_fee_abs")]
    pub max_fee_abs_sats: i64,
    /// Proposal amount bounds (satoshis)
    #[serde(default = "default_min_amount")]
    pub min_amount_sats: i64,
    #[serde(default = "default_max_amount")]
    pub max_amount_sats: i64,
}

#[derive(Debug, Deserialize)]
pub struct CollectorSection {
    /// Seconds between telemetry ticks
    #[serde(default = "default_collector_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Chat webhook receiving {"text": ...} posts
    #[serde(default)]
    pub webhook_url: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}
fn default_database_path() -> PathBuf {
    PathBuf::from("steward.db")
}
fn default_cli_path() -> PathBuf {
    PathBuf::from("lncli")
}
fn default_target_ratio() -> f64 {
    0.5
}
fn default_tolerance_ratio() -> f64 {
    0.1
}
fn default_low_liquidity_capacity() -> i64 {
    500_000
}
fn default_significant_balance() -> i64 {
    500_000
}
fn default_low_liquidity_ppm() -> i64 {
    500
}
fn default_inbound_ppm() -> i64 {
    300
}
fn default_balanced_ppm() -> i64 {
    100
}
fn default_outbound_ppm() -> i64 {
    25
}
fn default_base_fee_msat() -> i64 {
    1000
}
fn default_min_ppm() -> i64 {
    10
}
fn default_max_ppm() -> i64 {
    1000
}
fn default_time_lock_delta() -> u32 {
    40
}
fn default_max_fee_rate_pct() -> f64 {
    0.5
}
fn default_max_fee_abs() -> i64 {
    1000
}
fn default_min_amount() -> i64 {
    10_000
}
fn default_max_amount() -> i64 {
    1_000_000
}
fn default_collector_interval() -> u64 {
    300
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
            database_path: default_database_path(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            target_ratio: default_target_ratio(),
            tolerance_ratio: default_tolerance_ratio(),
            low_liquidity_capacity_sats: default_low_liquidity_capacity(),
            significant_balance_sats: default_significant_balance(),
        }
    }
}

impl Default for FeesSection {
    fn default() -> Self {
        Self {
            low_liquidity_ppm: default_low_liquidity_ppm(),
            inbound_ppm: default_inbound_ppm(),
            balanced_ppm: default_balanced_ppm(),
            outbound_ppm: default_outbound_ppm(),
            base_fee_msat: default_base_fee_msat(),
            min_ppm: default_min_ppm(),
            max_ppm: default_max_ppm(),
            default_time_lock_delta: default_time_lock_delta(),
        }
    }
}

impl Default for RebalanceSection {
    fn default() -> Self {
        Self {
            max_fee_rate_pct: default_max_fee_rate_pct(),
            max_fee_abs_sats: default_max_fee_abs(),
            min_amount_sats: default_min_amount(),
            max_amount_sats: default_max_amount(),
        }
    }
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            interval_secs: default_collector_interval(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing file at the default location just
    /// means defaults, since every setting has one.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.scoring.target_ratio) {
            anyhow::bail!("target_ratio must be between 0.0 and 1.0");
        }
        if !(0.0..=0.5).contains(&self.scoring.tolerance_ratio) {
            anyhow::bail!("tolerance_ratio must be between 0.0 and 0.5");
        }
        if self.fees.min_ppm < 1 || self.fees.min_ppm > self.fees.max_ppm {
            anyhow::bail!(
                "fee clamp invalid: min_ppm {} .. max_ppm {}",
                self.fees.min_ppm,
                self.fees.max_ppm
            );
        }
        if self.rebalance.min_amount_sats <= 0 {
            anyhow::bail!("min_amount_sats must be positive");
        }
        if self.rebalance.min_amount_sats > self.rebalance.max_amount_sats {
            anyhow::bail!("min_amount_sats > max_amount_sats");
        }
        if self.rebalance.max_fee_rate_pct <= 0.0 || self.rebalance.max_fee_rate_pct > 100.0 {
            anyhow::bail!("max_fee_rate_pct must be in (0, 100]");
        }
        if self.rebalance.max_fee_abs_sats <= 0 {
            anyhow::bail!("max_fee_abs_sats must be positive");
        }
        if self.collector.interval_secs < 10 {
            anyhow::bail!("collector interval_secs must be at least 10");
        }
        Ok(())
    }

    pub fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            target_ratio: self.scoring.target_ratio,
            tolerance_ratio: self.scoring.tolerance_ratio,
            low_liquidity_capacity_sats: self.scoring.low_liquidity_capacity_sats,
            significant_balance_sats: self.scoring.significant_balance_sats,
        }
    }

    pub fn fee_rules(&self) -> FeeRules {
        FeeRules {
            low_liquidity_ppm: self.fees.low_liquidity_ppm,
            inbound_ppm: self.fees.inbound_ppm,
            balanced_ppm: self.fees.balanced_ppm,
            outbound_ppm: self.fees.outbound_ppm,
            base_fee_msat: self.fees.base_fee_msat,
            min_ppm: self.fees.min_ppm,
            max_ppm: self.fees.max_ppm,
        }
    }

    /// The planner's target and tolerance are the scoring ones; keeping a
    /// single source avoids scoring and planning disagreeing about balance.
    pub fn rebalance_config(&self) -> RebalanceConfig {
        RebalanceConfig {
            max_fee_rate_pct: self.rebalance.max_fee_rate_pct,
            max_fee_abs_sats: self.rebalance.max_fee_abs_sats,
            min_amount_sats: self.rebalance.min_amount_sats,
            max_amount_sats: self.rebalance.max_amount_sats,
            target_ratio: self.scoring.target_ratio,
            tolerance_ratio: self.scoring.tolerance_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.target_ratio, 0.5);
        assert_eq!(config.rebalance.max_amount_sats, 1_000_000);
        assert_eq!(config.fees.outbound_ppm, 25);
        assert_eq!(config.node.cli_path, PathBuf::from("lncli"));
    }

    #[test]
    fn test_validate_target_ratio_range() {
        let mut config = Config::default();
        config.scoring.target_ratio = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tolerance_range() {
        let mut config = Config::default();
        config.scoring.tolerance_ratio = 0.6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tolerance_ratio"));
    }

    #[test]
    fn test_validate_amount_bounds() {
        let mut config = Config::default();
        config.rebalance.min_amount_sats = 2_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_amount_sats > max_amount_sats"));
    }

    #[test]
    fn test_validate_fee_clamp() {
        let mut config = Config::default();
        config.fees.min_ppm = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fees.min_ppm = 2000; // above max_ppm
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_collector_interval() {
        let mut config = Config::default();
        config.collector.interval_secs = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_minimal_with_defaults() {
        let toml_str = r#"
[node]
cli_path = "/usr/local/bin/lncli"
extra_args = ["--network", "testnet"]

[scoring]
target_ratio = 0.6
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.cli_path, PathBuf::from("/usr/local/bin/lncli"));
        assert_eq!(config.node.extra_args, vec!["--network", "testnet"]);
        assert_eq!(config.scoring.target_ratio, 0.6);
        // Untouched sections fall back to defaults
        assert_eq!(config.scoring.tolerance_ratio, 0.1);
        assert_eq!(config.fees.balanced_ppm, 100);
        assert_eq!(config.collector.interval_secs, 300);
        assert!(!config.notify.enabled);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/steward.toml")).unwrap();
        assert_eq!(config.scoring.target_ratio, 0.5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[general]\ndry_run = true\n[rebalance]\nmax_fee_abs_sats = 500").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.general.dry_run);
        assert_eq!(config.rebalance.max_fee_abs_sats, 500);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[scoring]\ntarget_ratio = 7.5").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_rebalance_config_shares_scoring_target() {
        let mut config = Config::default();
        config.scoring.target_ratio = 0.4;
        let rc = config.rebalance_config();
        assert_eq!(rc.target_ratio, 0.4);
        assert_eq!(rc.min_amount_sats, 10_000);
    }
}
