use std::str::FromStr;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::error::BtcError;

/// Supported Bitcoin networks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    #[default]
    Mainnet,
    Testnet,
    Signet,
}

impl BtcNetwork {
    /// Convert to the `bitcoin` crate's `Network` type.
    pub fn to_bitcoin_network(self) -> Network {
        match self {
            BtcNetwork::Mainnet => Network::Bitcoin,
            BtcNetwork::Testnet => Network::Testnet,
            BtcNetwork::Signet => Network::Signet,
        }
    }
}

impl std::fmt::Display for BtcNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BtcNetwork::Mainnet => write!(f, "mainnet"),
            BtcNetwork::Testnet => write!(f, "testnet"),
            BtcNetwork::Signet => write!(f, "signet"),
        }
    }
}

impl FromStr for BtcNetwork {
    type Err = BtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "livenet" => Ok(BtcNetwork::Mainnet),
            "testnet" => Ok(BtcNetwork::Testnet),
            "signet" => Ok(BtcNetwork::Signet),
            other => Err(BtcError::InvalidNetwork(other.to_owned())),
        }
    }
}
