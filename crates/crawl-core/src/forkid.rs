//! Fork identifier advertised in the discovery record.
//!
//! A compact summary of the chain's rule history: a 4-byte digest chained
//! over the genesis hash and every fork height already passed, plus the
//! next scheduled fork height (0 when none is known).

use serde::{Deserialize, Serialize};

use crate::genesis::ChainConfig;
use crate::hash::Hash;

/// Key under which the fork id entry is published.
pub const ENR_KEY: &str = "opera";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkId {
    #[serde(with = "hex::serde")]
    pub hash: [u8; 4],
    pub next: u64,
}

/// Discovery record entry advertising the opera protocol, published
/// under `ENR_KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrEntry {
    pub fork_id: ForkId,
}

impl EnrEntry {
    pub fn key(&self) -> &'static str {
        ENR_KEY
    }
}

/// Compute the fork id for a chain at block `head`.
pub fn new_id(chain: &ChainConfig, genesis: &Hash, head: u64) -> ForkId {
    let mut hash = truncate(blake3::hash(genesis.as_bytes()));
    for fork in chain.fork_heights() {
        if fork > head {
            return ForkId { hash, next: fork };
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(&hash);
        hasher.update(&fork.to_be_bytes());
        hash = truncate(hasher.finalize());
    }
    ForkId { hash, next: 0 }
}

fn truncate(digest: blake3::Hash) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}
