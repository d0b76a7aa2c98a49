//! TOML configuration for an embedded node.
//!
//! `load` falls back to defaults when the file is absent; hosts that
//! construct everything in code can use `NodeConfig::default()` directly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consensus::chain::BlockchainConfig;
use crate::crypto::PublicKey;
use crate::types::Difficulty;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub consensus: ConsensusSection,
    #[serde(default)]
    pub mempool: MempoolSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Endpoint name on the transport layer.
    pub address: String,
    pub log_level: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self { address: "node-0".into(), log_level: "info".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSection {
    pub difficulty_min: u32,
    pub difficulty_max: u32,
    pub target_block_time_secs: f64,
    /// Maximum transactions drained into one produced block.
    pub max_txs_per_block: usize,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            difficulty_min: 5,
            difficulty_max: 15,
            target_block_time_secs: 10.0,
            max_txs_per_block: 1024,
        }
    }
}

impl ConsensusSection {
    pub fn difficulty(&self) -> Difficulty {
        Difficulty::new(self.difficulty_min, self.difficulty_max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSection {
    pub capacity: usize,
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

impl NodeConfig {
    /// Projects the consensus section onto chain parameters. The node set
    /// is runtime data the host supplies after key exchange.
    pub fn blockchain_config(&self, nodes: Vec<PublicKey>) -> BlockchainConfig {
        BlockchainConfig {
            nodes,
            difficulty: self.consensus.difficulty(),
            target_block_time_secs: self.consensus.target_block_time_secs,
        }
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        let cfg: NodeConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    pub fn example_toml() -> &'static str {
        r#"# ambit node configuration
# All values shown are defaults.

[node]
address   = "node-0"
log_level = "info"        # trace | debug | info | warn | error

[consensus]
difficulty_min         = 5     # minimum tour length
difficulty_max         = 15    # maximum tour length
target_block_time_secs = 10.0
max_txs_per_block      = 1024

[mempool]
capacity = 10000
"#
    }

    pub fn write_example(path: &str) -> std::io::Result<()> {
        std::fs::write(path, Self::example_toml())
    }
}
