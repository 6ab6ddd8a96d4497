// src/config.rs
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::PathBuf;

use crate::consolidation::OvertimePolicy;

const ENV_PREFIX: &str = "CHANTIER_";

/// Runtime settings, read from `CHANTIER_*` environment variables (a `.env` file is honoured).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Server
    #[serde(default = "default_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,

    // Payroll export
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    // Overtime
    #[serde(default = "default_weekly_normal_hours")]
    pub weekly_normal_hours: Decimal,
    #[serde(default = "default_overtime_tier1_ceiling")]
    pub overtime_tier1_ceiling: Decimal,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_weekly_normal_hours() -> Decimal {
    dec!(39)
}

fn default_overtime_tier1_ceiling() -> Decimal {
    dec!(43)
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenv::dotenv().ok();
        envy::prefixed(ENV_PREFIX).from_env::<Config>()
    }

    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(pairs)
    }

    pub fn overtime_policy(&self) -> OvertimePolicy {
        OvertimePolicy {
            weekly_normal_hours: self.weekly_normal_hours,
            tier1_ceiling: self.overtime_tier1_ceiling,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
