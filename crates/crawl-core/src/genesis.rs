//! Genesis adapter.
//!
//! Derives the handshake identity (network id, genesis hash, initial sync
//! progress) and the EVM chain config from a static genesis dataset. The
//! dataset is a JSON document listing the network's epoch records.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{EventHash, Hash};
use crate::message::PeerProgress;

// ── Dataset ───────────────────────────────────────────────────────────────────

/// A genesis dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisStore {
    pub network_id: u64,
    pub network_name: String,
    pub genesis_id: Hash,
    #[serde(default)]
    pub epochs: Vec<EpochRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch_state: EpochState,
    pub block_state: BlockState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochState {
    pub epoch: u32,
    pub rules: Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockState {
    pub last_block: BlockCtx,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockCtx {
    pub idx: u64,
    pub atropos: EventHash,
    #[serde(default)]
    pub time: u64,
}

/// Network rules in force for an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    pub name: String,
    pub network_id: u64,
    #[serde(default)]
    pub upgrades: Upgrades,
}

/// Protocol upgrades switched on by a rule set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upgrades {
    #[serde(default)]
    pub berlin: bool,
    #[serde(default)]
    pub london: bool,
    #[serde(default)]
    pub llr: bool,
}

/// The block from which an upgrade set applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeHeight {
    pub upgrades: Upgrades,
    pub height: u64,
}

// ── Derived ───────────────────────────────────────────────────────────────────

/// EVM chain config: chain id and the activation block of each fork.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub berlin_block: Option<u64>,
    pub london_block: Option<u64>,
}

impl ChainConfig {
    /// Fork activation heights in ascending order, duplicates removed.
    pub fn fork_heights(&self) -> Vec<u64> {
        let mut heights: Vec<u64> = [self.berlin_block, self.london_block]
            .into_iter()
            .flatten()
            .filter(|h| *h > 0)
            .collect();
        heights.sort_unstable();
        heights.dedup();
        heights
    }
}

impl Rules {
    /// Build the EVM chain config given the history of upgrade heights.
    /// A fork is activated at the first height where its upgrade is on.
    pub fn evm_chain_config(&self, history: &[UpgradeHeight]) -> ChainConfig {
        let mut chain = ChainConfig {
            chain_id: self.network_id,
            ..ChainConfig::default()
        };
        for h in history {
            if h.upgrades.berlin && chain.berlin_block.is_none() {
                chain.berlin_block = Some(h.height);
            }
            if h.upgrades.london && chain.london_block.is_none() {
                chain.london_block = Some(h.height);
            }
        }
        chain
    }
}

/// Local node description returned by the engine's `node_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub network: u64,
    pub genesis: Hash,
    pub epoch: u32,
    pub num_of_blocks: u64,
}

/// Everything the handshake needs, derived once from the dataset.
#[derive(Debug, Clone)]
pub struct GenesisOutput {
    pub progress: PeerProgress,
    pub node_info: NodeInfo,
    pub rules: Rules,
    pub chain: ChainConfig,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GenesisStore {
    pub fn read(path: &Path) -> Result<Self, GenesisError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GenesisError::ReadFailed(path.display().to_string(), e.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|e| GenesisError::ParseFailed(path.display().to_string(), e.to_string()))
    }
}

/// Walk the epoch records and build the handshake identity from the first
/// epoch and block state.
pub fn load_genesis(genesis: &GenesisStore) -> Result<GenesisOutput, GenesisError> {
    let mut history: Vec<UpgradeHeight> = Vec::new();
    let mut last_rules: Option<&Rules> = None;

    for record in &genesis.epochs {
        let rules = &record.epoch_state.rules;
        if rules.network_id != genesis.network_id || rules.name != genesis.network_name {
            return Err(GenesisError::NetworkMismatch {
                epoch: record.epoch_state.epoch,
                expected: format!("{}/{}", genesis.network_name, genesis.network_id),
                found: format!("{}/{}", rules.name, rules.network_id),
            });
        }

        if last_rules.map_or(true, |last| last.upgrades != rules.upgrades) {
            let height = record
                .block_state
                .last_block
                .idx
                .checked_add(1)
                .ok_or(GenesisError::BlockOverflow(record.epoch_state.epoch))?;
            history.push(UpgradeHeight {
                upgrades: rules.upgrades,
                height,
            });
        }
        last_rules = Some(rules);
    }

    let first = genesis.epochs.first().ok_or(GenesisError::NoEpochRecords)?;
    let es = &first.epoch_state;
    let last_block = first.block_state.last_block;

    Ok(GenesisOutput {
        progress: PeerProgress {
            epoch: es.epoch,
            last_block_idx: last_block.idx,
            last_block_atropos: last_block.atropos,
            highest_lamport: 0,
        },
        node_info: NodeInfo {
            network: genesis.network_id,
            genesis: genesis.genesis_id,
            epoch: es.epoch,
            num_of_blocks: last_block.idx,
        },
        rules: es.rules.clone(),
        chain: es.rules.evm_chain_config(&history),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("failed to read genesis {0}: {1}")]
    ReadFailed(String, String),

    #[error("failed to parse genesis {0}: {1}")]
    ParseFailed(String, String),

    #[error("network ID/name mismatch at epoch {epoch}: expected {expected}, found {found}")]
    NetworkMismatch {
        epoch: u32,
        expected: String,
        found: String,
    },

    #[error("no epoch records in genesis")]
    NoEpochRecords,

    #[error("last block index overflows at epoch {0}")]
    BlockOverflow(u32),
}
