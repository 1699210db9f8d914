//! JSON-RPC client for the mainchain daemon (bitcoin-style RPC with HTTP
//! basic authentication).

use crate::gate::view::{BlockSummary, MainchainView, SyncStatus};
use crate::rpc::error::{map_client_error, RpcError};
use crate::rpc::options::RpcClientOptions;
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bitcoin::{Amount, BlockHash};
use futures::future::BoxFuture;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::timeout;

#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub blocks: u64,
    #[serde(rename = "verificationprogress")]
    pub verification_progress: f64,
}

#[derive(Debug, Deserialize)]
struct VerboseBlock {
    hash: BlockHash,
    height: u64,
    #[serde(default)]
    confirmations: i64,
}

#[derive(Debug, Deserialize)]
struct SidechainInfo {
    items: Vec<SidechainItem>,
}

#[derive(Debug, Deserialize)]
struct SidechainItem {
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    balance: Amount,
}

#[derive(Debug, Clone)]
pub struct MainchainRpcClient {
    url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
}

impl MainchainRpcClient {
    pub fn new(
        url: impl Into<String>,
        user: &str,
        password: &str,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;
        let url = url.into();

        let client = HttpClientBuilder::default()
            .set_headers(build_auth_headers(user, password)?)
            .request_timeout(options.request_timeout)
            .max_response_size(options.max_response_size())
            .build(&url)
            .map_err(|err| anyhow!("failed to build mainchain RPC client: {err}"))?;

        Ok(Self {
            url: Arc::new(url),
            client,
            options,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo> {
        self.call("getblockchaininfo", rpc_params![]).await
    }

    pub async fn get_block_count(&self) -> Result<u64> {
        self.call("getblockcount", rpc_params![]).await
    }

    pub async fn get_block_hash(&self, height: u64) -> Result<BlockHash> {
        self.call("getblockhash", rpc_params![height]).await
    }

    /// Fetches the verbose block at `height`. The daemon accepts the height
    /// in place of a hash when it is passed as a string.
    pub async fn get_block(&self, height: u64) -> Result<BlockSummary> {
        let block: VerboseBlock = self
            .call("getblock", rpc_params![height.to_string()])
            .await?;
        Ok(BlockSummary {
            hash: block.hash,
            height: block.height,
            confirmations: block.confirmations,
        })
    }

    pub async fn get_sidechain_balance(&self, sidechain_id: &str) -> Result<Amount> {
        const METHOD: &str = "getscinfo";

        let info: SidechainInfo = self
            .call(METHOD, rpc_params![sidechain_id, true, false])
            .await?;
        let item = info.items.into_iter().next().ok_or_else(|| {
            RpcError::invalid(METHOD, format!("sidechain {sidechain_id} is not known"))
        })?;
        Ok(item.balance)
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: ArrayParams) -> Result<T> {
        let value: Value = timeout(
            self.options.request_timeout,
            self.client.request(method, params),
        )
        .await
        .map_err(|_| RpcError::timed_out(method))?
        .map_err(|err| map_client_error(method, err))?;

        tracing::trace!(target: "orchestrator::mainchain", method, "rpc call completed");
        serde_json::from_value(value).map_err(|err| RpcError::invalid(method, err).into())
    }
}

impl MainchainView for MainchainRpcClient {
    fn sync_status(&self) -> BoxFuture<'_, Result<SyncStatus>> {
        Box::pin(async move {
            let info = self.get_blockchain_info().await?;
            let height = self.get_block_count().await?;
            Ok(SyncStatus {
                height,
                verification_progress: info.verification_progress,
            })
        })
    }

    fn block_hash(&self, height: u64) -> BoxFuture<'_, Result<BlockHash>> {
        Box::pin(self.get_block_hash(height))
    }

    fn block_at(&self, height: u64) -> BoxFuture<'_, Result<BlockSummary>> {
        Box::pin(self.get_block(height))
    }

    fn sidechain_balance<'a>(&'a self, sidechain_id: &'a str) -> BoxFuture<'a, Result<Amount>> {
        Box::pin(self.get_sidechain_balance(sidechain_id))
    }
}

fn build_auth_headers(user: &str, password: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let encoded = BASE64_STANDARD.encode(format!("{user}:{password}"));
    let value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .context("failed to build Authorization header")?;
    headers.insert("Authorization", value);
    Ok(headers)
}
