//! HTTP data sources: Esplora REST for UTXO chains, JSON-RPC for account chains.

use super::source::{
    AccountSource, AccountTransaction, LogEntry, Receipt, UtxoOutput, UtxoSource, UtxoTransaction,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// 32 bytes of hex, optionally `0x`-prefixed.
fn is_tx_hash(hash: &str) -> bool {
    let digits = hash.strip_prefix("0x").unwrap_or(hash);
    matches!(hex::decode(digits), Ok(bytes) if bytes.len() == 32)
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("cryptopay-settlement/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Esplora
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    #[serde(default)]
    vin: Vec<EsploraInput>,
    vout: Vec<EsploraOutput>,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraInput {
    prevout: Option<EsploraOutput>,
}

#[derive(Debug, Deserialize)]
struct EsploraOutput {
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u64>,
    block_hash: Option<String>,
}

impl From<EsploraTx> for UtxoTransaction {
    fn from(tx: EsploraTx) -> Self {
        let sender = tx
            .vin
            .into_iter()
            .find_map(|input| input.prevout.and_then(|p| p.scriptpubkey_address));
        let (block_height, block_hash) = if tx.status.confirmed {
            (tx.status.block_height, tx.status.block_hash)
        } else {
            (None, None)
        };
        Self {
            txid: tx.txid,
            outputs: tx
                .vout
                .into_iter()
                .map(|o| UtxoOutput {
                    address: o.scriptpubkey_address,
                    value: o.value,
                })
                .collect(),
            sender,
            block_height,
            block_hash,
        }
    }
}

/// Parse an Esplora `GET /tx/{txid}` body.
fn parse_esplora_tx(body: &str) -> Result<UtxoTransaction> {
    serde_json::from_str::<EsploraTx>(body)
        .map(UtxoTransaction::from)
        .map_err(|e| Error::Chain(format!("malformed esplora transaction: {e}")))
}

/// UTXO source backed by an Esplora-compatible REST API.
pub struct EsploraSource {
    client: reqwest::Client,
    base_url: String,
}

impl EsploraSource {
    /// Create a source for `base_url` (e.g. `https://blockstream.info/api`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UtxoSource for EsploraSource {
    async fn transaction(&self, txid: &str) -> Result<Option<UtxoTransaction>> {
        if txid.starts_with("0x") || !is_tx_hash(txid) {
            return Ok(None);
        }
        let url = format!("{}/tx/{txid}", self.base_url);
        debug!("GET {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Chain(format!("esplora request failed: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::BAD_REQUEST
        {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| Error::Chain(format!("esplora returned error: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::Chain(format!("esplora body: {e}")))?;
        parse_esplora_tx(&body).map(Some)
    }

    async fn tip_height(&self) -> Result<u64> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Chain(format!("esplora tip request failed: {e}")))?
            .text()
            .await
            .map_err(|e| Error::Chain(format!("esplora tip body: {e}")))?;
        body.trim()
            .parse()
            .map_err(|e| Error::Chain(format!("malformed tip height {body:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(value: &Value) -> Result<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Chain(format!("expected hex quantity, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| Error::Chain(format!("malformed quantity {s:?}: {e}")))
}

fn parse_u64_quantity(value: &Value) -> Result<u64> {
    let q = parse_quantity(value)?;
    u64::try_from(q).map_err(|_| Error::Chain(format!("quantity {q} exceeds u64")))
}

fn str_field(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Chain(format!("missing field {field}")))
}

fn parse_transaction(value: &Value) -> Result<AccountTransaction> {
    Ok(AccountTransaction {
        hash: str_field(value, "hash")?,
        from: str_field(value, "from")?,
        to: value.get("to").and_then(Value::as_str).map(str::to_string),
        value: parse_quantity(value.get("value").unwrap_or(&Value::Null))?,
    })
}

fn parse_receipt(value: &Value) -> Result<Receipt> {
    let status = value
        .get("status")
        .filter(|s| !s.is_null())
        .map(parse_quantity)
        .transpose()?;
    let logs = value
        .get("logs")
        .and_then(Value::as_array)
        .map(|logs| {
            logs.iter()
                .map(|log| {
                    Ok(LogEntry {
                        address: str_field(log, "address")?,
                        topics: log
                            .get("topics")
                            .and_then(Value::as_array)
                            .map(|t| t.iter().filter_map(Value::as_str).map(str::to_string).collect())
                            .unwrap_or_default(),
                        data: log
                            .get("data")
                            .and_then(Value::as_str)
                            .unwrap_or("0x")
                            .to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    Ok(Receipt {
        // Pre-Byzantium receipts carry no status field.
        success: status.map_or(true, |s| s == 1),
        block_number: parse_u64_quantity(value.get("blockNumber").unwrap_or(&Value::Null))?,
        block_hash: value
            .get("blockHash")
            .and_then(Value::as_str)
            .map(str::to_string),
        logs,
    })
}

/// Account-chain source speaking Ethereum JSON-RPC.
pub struct JsonRpcSource {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcSource {
    /// Create a source for the JSON-RPC endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("JSON-RPC {method} #{id}");
        let mut body: Value = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Chain(format!("{method} request failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Chain(format!("{method} response: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(Error::Chain(format!("{method} returned error: {err}")));
        }
        Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null))
    }
}

#[async_trait]
impl AccountSource for JsonRpcSource {
    async fn transaction(&self, hash: &str) -> Result<Option<AccountTransaction>> {
        if !hash.starts_with("0x") || !is_tx_hash(hash) {
            return Ok(None);
        }
        let result = self.call("eth_getTransactionByHash", json!([hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_transaction(&result).map(Some)
    }

    async fn receipt(&self, hash: &str) -> Result<Option<Receipt>> {
        if !hash.starts_with("0x") || !is_tx_hash(hash) {
            return Ok(None);
        }
        let result = self.call("eth_getTransactionReceipt", json!([hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_receipt(&result).map(Some)
    }

    async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_u64_quantity(&result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_hash_shape() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert!(is_tx_hash(&hash));
        assert!(is_tx_hash(&hash[2..]));
        assert!(!is_tx_hash("0xfeed"));
        assert!(!is_tx_hash(&format!("0x{}", "zz".repeat(32))));
        assert!(!is_tx_hash(""));
    }

    #[tokio::test]
    async fn test_malformed_hash_is_not_sent_to_the_node() {
        // Nothing listens here; a request would surface as Error::Chain.
        let source = JsonRpcSource::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(source.transaction("0xnot-a-hash").await.unwrap().is_none());
        assert!(source.receipt("0x1234").await.unwrap().is_none());
        assert!(source.transaction(&"ab".repeat(32)).await.unwrap().is_none());

        let esplora = EsploraSource::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(esplora.transaction("zz").await.unwrap().is_none());
    }

    #[test]
    fn test_parse_esplora_confirmed() {
        let body = r#"{
            "txid": "ab01",
            "vin": [{"prevout": {"scriptpubkey_address": "bc1qsender", "value": 2000000}}],
            "vout": [
                {"scriptpubkey_address": "bc1qmerchant", "value": 1000000},
                {"value": 0}
            ],
            "status": {"confirmed": true, "block_height": 800000, "block_hash": "0000abc"}
        }"#;
        let tx = parse_esplora_tx(body).unwrap();
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[1].address, None);
        assert_eq!(tx.sender.as_deref(), Some("bc1qsender"));
        assert_eq!(tx.block_height, Some(800_000));
    }

    #[test]
    fn test_parse_esplora_mempool() {
        let body = r#"{"txid": "ab01", "vout": [], "status": {"confirmed": false}}"#;
        let tx = parse_esplora_tx(body).unwrap();
        assert_eq!(tx.block_height, None);
        assert!(tx.sender.is_none());
    }

    #[test]
    fn test_parse_quantities() {
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), 0);
        assert_eq!(
            parse_quantity(&json!("0xde0b6b3a7640000")).unwrap(),
            1_000_000_000_000_000_000
        );
        assert!(parse_quantity(&json!(12)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn test_parse_receipt() {
        let receipt = parse_receipt(&json!({
            "status": "0x1",
            "blockNumber": "0x10",
            "blockHash": "0xbeef",
            "logs": [{"address": "0xtoken", "topics": ["0x01", "0x02"], "data": "0x"}]
        }))
        .unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.logs[0].topics.len(), 2);

        let failed = parse_receipt(&json!({"status": "0x0", "blockNumber": "0x1"})).unwrap();
        assert!(!failed.success);
        assert!(failed.logs.is_empty());
    }

    #[test]
    fn test_parse_transaction() {
        let tx = parse_transaction(&json!({
            "hash": "0xfeed",
            "from": "0xaaa",
            "to": null,
            "value": "0x1"
        }))
        .unwrap();
        assert!(tx.to.is_none());
        assert_eq!(tx.value, 1);
    }
}
