// Protocol-wide constants shared by every component. Per-node operational
// settings (network id, timers, peer limits...) live in `synod_node::config`
// since spec.md S6 scopes them as node configuration, not protocol constants.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Max memo size on a Transaction (spec.md S3: "memo, opaque bytes, <= 256").
pub const MAX_MEMO_SIZE: usize = 256;

// Number of leading system transactions in a non-genesis block
// (BlockReward, FeeBurn, FeeMaintenance, FeeLiquidity - spec.md S3 B2).
pub const SYSTEM_TX_COUNT_REGULAR: usize = 4;

// Number of leading system transactions in the genesis block
// (liquidity, burn, maintenance, developer SystemInit credits - spec.md S4.5).
pub const SYSTEM_TX_COUNT_GENESIS: usize = 4;
