//! Data-source traits the adapters read chain state through.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One output of a UTXO transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoOutput {
    /// Receiving address, absent for non-standard scripts.
    pub address: Option<String>,
    /// Value in the smallest unit (satoshis).
    pub value: u64,
}

/// A UTXO transaction as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoTransaction {
    /// Transaction id.
    pub txid: String,
    /// Outputs in order.
    pub outputs: Vec<UtxoOutput>,
    /// Address spent by the first input, if resolvable.
    pub sender: Option<String>,
    /// Height of the containing block; `None` while in the mempool.
    pub block_height: Option<u64>,
    /// Hash of the containing block.
    pub block_hash: Option<String>,
}

/// Read access to a UTXO chain.
#[async_trait]
pub trait UtxoSource: Send + Sync {
    /// Fetch a transaction; `Ok(None)` when the chain does not know it.
    async fn transaction(&self, txid: &str) -> Result<Option<UtxoTransaction>>;

    /// Height of the current chain tip.
    async fn tip_height(&self) -> Result<u64>;
}

/// A transaction on an account chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTransaction {
    /// Transaction hash.
    pub hash: String,
    /// Sender.
    pub from: String,
    /// Recipient; `None` for contract creation.
    pub to: Option<String>,
    /// Native value in the smallest unit (wei).
    pub value: u128,
}

/// One event-log entry of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: String,
    /// Indexed topics, hex encoded.
    pub topics: Vec<String>,
    /// Non-indexed data, hex encoded.
    pub data: String,
}

/// Execution receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Execution succeeded.
    pub success: bool,
    /// Block height.
    pub block_number: u64,
    /// Block hash.
    pub block_hash: Option<String>,
    /// Emitted events.
    pub logs: Vec<LogEntry>,
}

/// Read access to an account chain.
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Fetch a transaction; `Ok(None)` when unknown.
    async fn transaction(&self, hash: &str) -> Result<Option<AccountTransaction>>;

    /// Fetch a receipt; `Ok(None)` while the transaction is not mined.
    async fn receipt(&self, hash: &str) -> Result<Option<Receipt>>;

    /// Current block height.
    async fn block_number(&self) -> Result<u64>;
}
