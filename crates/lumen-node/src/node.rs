//! Wiring of a single-authority devnet node.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use lumen_consensus::GenesisBuilder;
use lumen_core::Chain;
use lumen_crypto::{address_of, SecretKey};
use lumen_miner::{MemPool, Miner, PackLoop, TxSource};
use lumen_state::{KvStore, MemKv, StateCreator};
use lumen_vm::NativeRegistry;
use tracing::info;

use crate::config::NodeConfig;

pub struct Node {
    pub chain: Arc<Chain>,
    pub pool: Arc<MemPool>,
    pub pack_loop: PackLoop,
}

pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn open_store(cfg: &NodeConfig) -> Result<Arc<dyn KvStore>> {
    match &cfg.data_dir {
        None => Ok(Arc::new(MemKv::new())),
        #[cfg(feature = "rocksdb")]
        Some(dir) => {
            let kv = lumen_state::RocksKv::open(dir).with_context(|| format!("opening {}", dir.display()))?;
            Ok(Arc::new(kv))
        }
        #[cfg(not(feature = "rocksdb"))]
        Some(dir) => bail!("data_dir {} set but lumen-node was built without the rocksdb feature", dir.display()),
    }
}

/// Builds the devnet genesis with `key` as its only authority and executor,
/// opens the chain and prepares the packing loop.
pub fn bootstrap(cfg: &NodeConfig, key: SecretKey) -> Result<Node> {
    if cfg.chain.block_interval == 0 {
        bail!("chain.block_interval must be positive");
    }
    if cfg.chain.gas_limit_bound_divisor == 0 {
        bail!("chain.gas_limit_bound_divisor must be positive");
    }
    let kv = open_store(cfg)?;
    let creator = StateCreator::new(kv.clone());

    let interval = cfg.chain.block_interval;
    let timestamp = cfg.genesis_timestamp.unwrap_or_else(|| unix_now() / interval * interval);
    let genesis = GenesisBuilder::devnet(&[key], timestamp)
        .gas_limit(cfg.chain.initial_gas_limit)
        .build(&creator)
        .context("building genesis")?;
    let chain = Arc::new(Chain::open(kv, genesis).context("opening chain")?);
    info!(genesis = %chain.genesis_id(), tag = chain.tag(), "chain ready");

    let miner = Miner::new(
        chain.clone(),
        creator,
        Arc::new(NativeRegistry::with_builtins()),
        cfg.chain.clone(),
        address_of(&key),
        cfg.beneficiary()?,
    );
    miner.set_target_gas_limit(cfg.target_gas_limit);

    let pool = Arc::new(MemPool::new());
    let source: Arc<dyn TxSource> = pool.clone();
    let pack_loop = PackLoop::new(Arc::new(miner), key, source).with_tick(Duration::from_millis(cfg.tick_ms.max(1)));
    Ok(Node { chain, pool, pack_loop })
}
