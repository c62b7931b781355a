// Node configuration (spec.md S6 "Configuration"). CLI flags via `clap`,
// optionally overlaid with a JSON file for unattended deployment, the way
// `tos_daemon`'s `Config` struct layers `clap::Parser` over defaults.

use crate::error::ConfigError;
use clap::{Args, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use synod_common::amount::Amount;

#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize, ValueEnum)]
pub enum RoleConfig {
    #[serde(rename = "ai-node")]
    AiNode,
    Observer,
}

impl From<RoleConfig> for synod_common::peer::Role {
    fn from(value: RoleConfig) -> Self {
        match value {
            RoleConfig::AiNode => synod_common::peer::Role::AINode,
            RoleConfig::Observer => synod_common::peer::Role::Observer,
        }
    }
}

/// Full node configuration, covering exactly the options spec.md S6 lists.
#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(name = "synod-node", version, about = "Proof-of-AI-Participation node")]
pub struct NodeConfig {
    /// Peers with a different network id are rejected at handshake.
    #[arg(long, default_value = "synod-mainnet")]
    pub network_id: String,

    /// AINode can vote; Observer cannot.
    #[arg(long, value_enum, default_value = "ai-node")]
    pub role: RoleConfig,

    /// Directory under which `<network_id>/` state is persisted.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// TCP address to listen for peer connections on.
    #[arg(long, default_value = "0.0.0.0:7125")]
    pub listen_address: String,

    /// Fixed-interval block target, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub block_period_ms: u64,

    /// Round timeout; must be strictly less than `block_period_ms`.
    #[arg(long, default_value_t = 3_000)]
    pub round_timeout_ms: u64,

    /// Delay before re-entering an aborted round with the next proposer.
    #[arg(long, default_value_t = 500)]
    pub round_restart_delay_ms: u64,

    #[arg(long, default_value_t = 3)]
    pub halving_period_blocks: u64,

    #[arg(long, default_value_t = 1024)]
    pub initial_reward: u64,

    #[command(flatten)]
    pub initial_split: InitialSplitArgs,

    /// Fixed decrement applied to the burn share at every halving (percentage points, e.g. 10 = Delta of 0.10).
    #[arg(long, default_value_t = 10)]
    pub split_decrement_per_halving: u64,

    /// N_pioneer: exact number of pioneer nodes required for bootstrap.
    #[arg(long, default_value_t = 2)]
    pub pioneer_count: usize,

    #[arg(long, default_value_t = 1_048_576)]
    pub initial_liquidity_amount: u64,

    #[arg(long, default_value_t = 64)]
    pub max_peers: usize,

    #[arg(long, default_value_t = 8)]
    pub peer_low_water_mark: usize,

    #[arg(long, default_value_t = 5_000)]
    pub heartbeat_interval_ms: u64,

    #[arg(long, default_value_t = 1_000)]
    pub reconnect_backoff_min_ms: u64,

    #[arg(long, default_value_t = 60_000)]
    pub reconnect_backoff_max_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub pool_capacity_txs: usize,

    #[arg(long, default_value_t = 2_000)]
    pub max_txs_per_block: usize,

    /// Fraction in [0, 1] expressed in basis points (e.g. 500 = 5%/day).
    #[arg(long, default_value_t = 500)]
    pub reputation_decay_bps_per_day: u32,

    /// Overlay a JSON configuration file on top of every other flag, for
    /// unattended deployment.
    #[arg(long)]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// 32-byte hex seed for the node's signing key. A fresh random key is
    /// generated if omitted.
    #[arg(long)]
    #[serde(skip)]
    pub key_seed: Option<String>,
}

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct InitialSplitArgs {
    #[arg(long = "initial-split-burn", default_value_t = 60)]
    pub burn: u64,
    #[arg(long = "initial-split-maintenance", default_value_t = 30)]
    pub maintenance: u64,
    #[arg(long = "initial-split-liquidity", default_value_t = 10)]
    pub liquidity: u64,
}

impl NodeConfig {
    /// Load a full configuration from a JSON file, e.g. for unattended
    /// deployment where flags are inconvenient.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let config: NodeConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round_timeout_ms >= self.block_period_ms {
            return Err(ConfigError::Invalid(
                "round_timeout_ms must be strictly less than block_period_ms".into(),
            ));
        }
        if self.halving_period_blocks == 0 {
            return Err(ConfigError::Invalid(
                "halving_period_blocks must be > 0".into(),
            ));
        }
        let split = &self.initial_split;
        if split.burn + split.maintenance + split.liquidity != 100 {
            return Err(ConfigError::Invalid(
                "initial split shares must sum to 100".into(),
            ));
        }
        if self.pioneer_count == 0 {
            return Err(ConfigError::Invalid("pioneer_count must be > 0".into()));
        }
        if self.reputation_decay_bps_per_day > 10_000 {
            return Err(ConfigError::Invalid(
                "reputation_decay_bps_per_day must be <= 10000 (100%)".into(),
            ));
        }
        Ok(())
    }

    pub fn initial_reward_amount(&self) -> Amount {
        Amount::from_tokens(self.initial_reward)
    }

    pub fn initial_liquidity(&self) -> Amount {
        Amount::from_tokens(self.initial_liquidity_amount)
    }
}
