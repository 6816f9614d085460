//! REST client for the server's `/api/v1/...` surface (SPEC_FULL.md "REST
//! API surface"). Grounded on the teacher's `ApiClient`: same
//! `base_url`-plus-`reqwest::Client` shape, same `ensure_ok` error-body
//! extraction pattern, with the auth/bearer-token plumbing dropped since
//! this spec has no multi-user auth system.

use cdp_proto::{Block, FileMeta, Hash, Query};
use serde::{Deserialize, Serialize};

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct BlockRequest {
    hash: String,
    payload: String,
    uncompressed_length: u64,
    compression_kind: i32,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    hash: String,
    payload: String,
    uncompressed_length: u64,
    compression_kind: i32,
}

#[derive(Debug, Serialize)]
struct NeededHashesRequest {
    hashes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NeededHashesResponse {
    needed: Vec<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Check response status; on error, read body for detail message —
    /// the server's §7 error taxonomy comes through as plain text.
    async fn ensure_ok(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("server error ({status}): {body}")
        }
    }

    pub async fn needed_hashes(&self, candidates: &[Hash]) -> anyhow::Result<Vec<Hash>> {
        let resp = self
            .client
            .post(format!("{}/api/v1/blocks/needed", self.base_url))
            .json(&NeededHashesRequest {
                hashes: candidates.iter().map(|h| h.to_hex()).collect(),
            })
            .send()
            .await?;
        let body: NeededHashesResponse = Self::ensure_ok(resp).await?.json().await?;
        body.needed
            .iter()
            .map(|s| Hash::from_hex(s).map_err(anyhow::Error::from))
            .collect()
    }

    pub async fn store_block(&self, block: &Block) -> anyhow::Result<()> {
        use base64::Engine;
        let resp = self
            .client
            .post(format!("{}/api/v1/blocks", self.base_url))
            .json(&BlockRequest {
                hash: block.hash.to_hex(),
                payload: base64::engine::general_purpose::STANDARD.encode(&block.payload),
                uncompressed_length: block.uncompressed_length,
                compression_kind: block.compression_kind.to_wire(),
            })
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn retrieve_block(&self, hash: &Hash) -> anyhow::Result<Block> {
        use base64::Engine;
        use cdp_proto::CompressionKind;
        let resp = self
            .client
            .get(format!("{}/api/v1/blocks/{}", self.base_url, hash.to_hex()))
            .send()
            .await?;
        let body: BlockResponse = Self::ensure_ok(resp).await?.json().await?;
        Ok(Block {
            hash: Hash::from_hex(&body.hash)?,
            payload: base64::engine::general_purpose::STANDARD.decode(&body.payload)?,
            uncompressed_length: body.uncompressed_length,
            compression_kind: CompressionKind::from_wire(body.compression_kind),
        })
    }

    pub async fn store_filemeta(&self, record: &FileMeta) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(format!("{}/api/v1/filemeta", self.base_url))
            .json(record)
            .send()
            .await?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    pub async fn list_files(&self, query: &Query) -> anyhow::Result<Vec<FileMeta>> {
        let mut params = vec![("latest_only", query.latest_only.to_string())];
        if let Some(ref f) = query.filename {
            params.push(("filename", f.clone()));
        }
        if let Some(b) = query.before_mtime {
            params.push(("before_mtime", b.to_string()));
        }
        if let Some(a) = query.after_mtime {
            params.push(("after_mtime", a.to_string()));
        }
        if let Some(ref o) = query.owner {
            params.push(("owner", o.clone()));
        }
        if let Some(ref g) = query.group {
            params.push(("group", g.clone()));
        }

        let resp = self
            .client
            .get(format!("{}/api/v1/filemeta/{}", self.base_url, query.host))
            .query(&params)
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }
}
