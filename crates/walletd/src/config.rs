use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chain_btc::BtcNetwork;

/// Default interval between balance refresh sweeps.
const DEFAULT_BALANCE_POLL: Duration = Duration::from_secs(30);

/// Daemon configuration with environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Network new keyrings encode addresses for.
    pub network: BtcNetwork,
    /// Location of the durable vault record.
    pub vault_path: PathBuf,
    /// How often the background balance refresher runs.
    pub balance_poll_interval: Duration,
}

impl Config {
    /// Read configuration from `WALLETD_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let network = env::var("WALLETD_NETWORK")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        let vault_path = env::var("WALLETD_VAULT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("wallet-vault.json"));

        let balance_poll_interval = env::var("WALLETD_BALANCE_POLL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BALANCE_POLL);

        Self {
            network,
            vault_path,
            balance_poll_interval,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: BtcNetwork::Mainnet,
            vault_path: PathBuf::from("wallet-vault.json"),
            balance_poll_interval: DEFAULT_BALANCE_POLL,
        }
    }
}
