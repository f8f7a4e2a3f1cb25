use std::{fs, path::Path, sync::Arc};

use alloy_primitives::{Address, address, aliases::B32, fixed_bytes};
use anyhow::{Context, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::preset::Preset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Minimal,
    Custom(String),
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Minimal => "minimal",
            Network::Custom(name) => name,
        }
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match String::deserialize(deserializer)?.as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "minimal" => Ok(Network::Minimal),
            custom => Ok(Network::Custom(custom.to_string())),
        }
    }
}

impl Serialize for Network {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Runtime configuration of a beacon network.
///
/// Passed explicitly to every state transition and fork choice entry point. Values that size
/// containers live in [`Preset`] instead.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct BeaconNetworkSpec {
    pub preset_base: String,
    #[serde(rename = "CONFIG_NAME")]
    pub network: Network,

    // Genesis
    pub min_genesis_active_validator_count: u64,
    pub min_genesis_time: u64,
    #[serde(with = "crate::b32_hex")]
    pub genesis_fork_version: B32,
    pub genesis_delay: u64,

    // Time parameters
    pub seconds_per_slot: u64,
    pub seconds_per_eth1_block: u64,
    pub min_validator_withdrawability_delay: u64,
    pub shard_committee_period: u64,
    pub eth1_follow_distance: u64,

    // Validator cycle
    pub ejection_balance: u64,
    pub min_per_epoch_churn_limit: u64,
    pub churn_limit_quotient: u64,

    // Deposit contract
    pub deposit_chain_id: u64,
    pub deposit_network_id: u64,
    pub deposit_contract_address: Address,
}

impl BeaconNetworkSpec {
    pub fn mainnet() -> Arc<Self> {
        Self {
            preset_base: "mainnet".to_string(),
            network: Network::Mainnet,
            min_genesis_active_validator_count: 16384,
            min_genesis_time: 1606824000,
            genesis_fork_version: fixed_bytes!("0x00000000"),
            genesis_delay: 604800,
            seconds_per_slot: 12,
            seconds_per_eth1_block: 14,
            min_validator_withdrawability_delay: 256,
            shard_committee_period: 256,
            eth1_follow_distance: 2048,
            ejection_balance: 16_000_000_000,
            min_per_epoch_churn_limit: 4,
            churn_limit_quotient: 65536,
            deposit_chain_id: 1,
            deposit_network_id: 1,
            deposit_contract_address: address!("0x00000000219ab540356cBB839Cbe05303d7705Fa"),
        }
        .into()
    }

    pub fn minimal() -> Arc<Self> {
        Self {
            preset_base: "minimal".to_string(),
            network: Network::Minimal,
            min_genesis_active_validator_count: 64,
            min_genesis_time: 1578009600,
            genesis_fork_version: fixed_bytes!("0x00000001"),
            genesis_delay: 300,
            seconds_per_slot: 6,
            seconds_per_eth1_block: 14,
            min_validator_withdrawability_delay: 256,
            shard_committee_period: 64,
            eth1_follow_distance: 16,
            ejection_balance: 16_000_000_000,
            min_per_epoch_churn_limit: 4,
            churn_limit_quotient: 32,
            deposit_chain_id: 5,
            deposit_network_id: 5,
            deposit_contract_address: address!("0x1234567890123456789012345678901234567890"),
        }
        .into()
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(contents).context("Failed to parse beacon network config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read network config {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    /// Checks that this config was written for the compile-time preset ``P``.
    pub fn ensure_preset<P: Preset>(&self) -> anyhow::Result<()> {
        ensure!(
            self.preset_base == P::NAME.as_str(),
            "Network {} expects preset {}, running with {}",
            self.network.as_str(),
            self.preset_base,
            P::NAME.as_str()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::{MainnetPreset, MinimalPreset};

    const CUSTOM_CONFIG: &str = r#"
PRESET_BASE: minimal
CONFIG_NAME: devnet-7
MIN_GENESIS_ACTIVE_VALIDATOR_COUNT: 32
MIN_GENESIS_TIME: 1700000000
GENESIS_FORK_VERSION: "0x10000007"
GENESIS_DELAY: 60
SECONDS_PER_SLOT: 2
SECONDS_PER_ETH1_BLOCK: 14
MIN_VALIDATOR_WITHDRAWABILITY_DELAY: 256
SHARD_COMMITTEE_PERIOD: 64
ETH1_FOLLOW_DISTANCE: 16
EJECTION_BALANCE: 16000000000
MIN_PER_EPOCH_CHURN_LIMIT: 4
CHURN_LIMIT_QUOTIENT: 32
DEPOSIT_CHAIN_ID: 7
DEPOSIT_NETWORK_ID: 7
DEPOSIT_CONTRACT_ADDRESS: "0x4242424242424242424242424242424242424242"
"#;

    #[test]
    fn test_parse_custom_network() {
        let spec = BeaconNetworkSpec::from_yaml_str(CUSTOM_CONFIG).unwrap();
        assert_eq!(spec.network, Network::Custom("devnet-7".to_string()));
        assert_eq!(spec.genesis_fork_version, fixed_bytes!("0x10000007"));
        assert_eq!(spec.seconds_per_slot, 2);
        assert_eq!(
            spec.deposit_contract_address,
            address!("0x4242424242424242424242424242424242424242")
        );
        spec.ensure_preset::<MinimalPreset>().unwrap();
        assert!(spec.ensure_preset::<MainnetPreset>().is_err());
    }

    #[test]
    fn test_yaml_round_trip_of_builtin() {
        let minimal = BeaconNetworkSpec::minimal();
        let yaml = serde_yaml::to_string(minimal.as_ref()).unwrap();
        assert!(yaml.contains("SHARD_COMMITTEE_PERIOD: 64"));
        assert_eq!(BeaconNetworkSpec::from_yaml_str(&yaml).unwrap(), *minimal);
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let truncated = CUSTOM_CONFIG.replace("CHURN_LIMIT_QUOTIENT: 32\n", "");
        assert!(BeaconNetworkSpec::from_yaml_str(&truncated).is_err());
    }
}
