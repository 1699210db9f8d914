//! Sidechain node client. The node exposes an Ethereum-style JSON-RPC
//! endpoint under `/ethv1` and a REST surface where every route is a JSON
//! POST answering `{"result": ...}` or `{"error": ...}`.

use crate::gate::view::{BlockReference, SidechainView};
use crate::rpc::error::{map_client_error, RpcError};
use crate::rpc::options::RpcClientOptions;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::time::timeout;

pub const ETH_RPC_PATH: &str = "/ethv1";

#[derive(Debug, Deserialize)]
struct ReferenceEnvelope {
    #[serde(rename = "blockReferenceInfo")]
    block_reference_info: ReferenceInfo,
}

#[derive(Debug, Deserialize)]
struct ReferenceInfo {
    #[serde(default)]
    height: Option<u64>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(rename = "mainchainReferenceDataSidechainBlockId", default)]
    sidechain_block_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockHeightResult {
    height: u64,
}

#[derive(Debug, Clone)]
pub struct SidechainClient {
    base_url: Arc<String>,
    rpc: HttpClient,
    rest: reqwest::Client,
    options: RpcClientOptions,
}

impl SidechainClient {
    /// `base_url` is the node root, e.g. `http://evmapp-mainnet:9545`.
    pub fn new(base_url: impl Into<String>, options: RpcClientOptions) -> Result<Self> {
        options.validate()?;
        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_owned();

        let rpc = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_response_size(options.max_response_size())
            .build(format!("{base_url}{ETH_RPC_PATH}"))
            .map_err(|err| anyhow!("failed to build sidechain RPC client: {err}"))?;

        let rest = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build sidechain REST client: {err}"))?;

        Ok(Self {
            base_url: Arc::new(base_url),
            rpc,
            rest,
            options,
        })
    }

    pub fn eth_rpc_url(&self) -> String {
        format!("{}{ETH_RPC_PATH}", self.base_url)
    }

    pub async fn eth_block_number(&self) -> Result<u64> {
        const METHOD: &str = "eth_blockNumber";
        let quantity: String = self.rpc_call(METHOD, rpc_params![]).await?;
        parse_quantity(&quantity).ok_or_else(|| {
            RpcError::invalid(METHOD, format!("'{quantity}' is not a hex quantity")).into()
        })
    }

    pub async fn zen_dump(&self, block_id: &str, destination: &Path) -> Result<()> {
        const METHOD: &str = "zen_dump";
        let block_id = format!("0x{}", block_id.trim_start_matches("0x"));
        let destination = destination.to_string_lossy().into_owned();
        let response: Value = self
            .rpc_call(METHOD, rpc_params![block_id, destination])
            .await?;
        tracing::debug!(
            target: "orchestrator::sidechain",
            response = %response,
            "dump request acknowledged"
        );
        Ok(())
    }

    pub async fn best_block_reference_height(&self) -> Result<u64> {
        const ROUTE: &str = "/mainchain/bestBlockReferenceInfo";
        let envelope: ReferenceEnvelope = self.rest_call(ROUTE, json!({})).await?;
        envelope
            .block_reference_info
            .height
            .ok_or_else(|| RpcError::invalid(ROUTE, "reference height is missing").into())
    }

    pub async fn block_reference_by_height(&self, height: u64) -> Result<BlockReference> {
        const ROUTE: &str = "/mainchain/blockReferenceInfoBy";
        let envelope: ReferenceEnvelope = self
            .rest_call(ROUTE, json!({ "height": height, "format": true }))
            .await?;
        let info = envelope.block_reference_info;
        match (info.hash, info.sidechain_block_id) {
            (Some(mainchain_hash), Some(sidechain_block_id)) => Ok(BlockReference {
                mainchain_hash,
                sidechain_block_id,
            }),
            _ => Err(RpcError::invalid(
                ROUTE,
                format!("reference for mainchain height {height} is incomplete"),
            )
            .into()),
        }
    }

    pub async fn find_block_height(&self, block_id: &str) -> Result<u64> {
        let result: BlockHeightResult = self
            .rest_call("/block/findById", json!({ "blockId": block_id }))
            .await?;
        Ok(result.height)
    }

    pub async fn best_sidechain_height(&self) -> Result<u64> {
        let result: BlockHeightResult = self.rest_call("/block/best", json!({})).await?;
        Ok(result.height)
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: ArrayParams,
    ) -> Result<T> {
        let value: Value = timeout(self.options.request_timeout, self.rpc.request(method, params))
            .await
            .map_err(|_| RpcError::timed_out(method))?
            .map_err(|err| map_client_error(method, err))?;
        serde_json::from_value(value).map_err(|err| RpcError::invalid(method, err).into())
    }

    async fn rest_call<T: DeserializeOwned>(&self, route: &'static str, body: Value) -> Result<T> {
        let url = format!("{}{route}", self.base_url);
        let response = self
            .rest
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| RpcError::unavailable(route, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::unavailable(route, format!("http status {status}")).into());
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| RpcError::invalid(route, err))?;
        tracing::trace!(target: "orchestrator::sidechain", route, "rest call completed");
        decode_rest_payload(route, payload)
    }
}

fn decode_rest_payload<T: DeserializeOwned>(route: &str, mut payload: Value) -> Result<T> {
    if let Some(error) = payload.get("error").filter(|error| !error.is_null()) {
        return Err(RpcError::Rejected {
            method: route.to_owned(),
            code: error.get("code").and_then(rest_error_code).unwrap_or(-1),
            message: error
                .get("description")
                .or_else(|| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string()),
        }
        .into());
    }

    let result = payload
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::invalid(route, "response carries neither result nor error"))?;
    serde_json::from_value(result).map_err(|err| RpcError::invalid(route, err).into())
}

// REST error codes are sometimes rendered as strings ("0204").
fn rest_error_code(code: &Value) -> Option<i64> {
    code.as_i64()
        .or_else(|| code.as_str().and_then(|text| text.parse().ok()))
}

fn parse_quantity(quantity: &str) -> Option<u64> {
    let digits = quantity.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

impl SidechainView for SidechainClient {
    fn block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.eth_block_number())
    }

    fn best_reference_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.best_block_reference_height())
    }

    fn reference_at(&self, mainchain_height: u64) -> BoxFuture<'_, Result<BlockReference>> {
        Box::pin(self.block_reference_by_height(mainchain_height))
    }

    fn block_height_by_id<'a>(&'a self, block_id: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(self.find_block_height(block_id))
    }

    fn best_block_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.best_sidechain_height())
    }

    fn dump<'a>(&'a self, block_id: &'a str, destination: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.zen_dump(block_id, destination))
    }
}
