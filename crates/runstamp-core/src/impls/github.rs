//! GitHubArtifactStore - GitHub Actions の artifact を使う本番用ストア
//!
//! # 使う API
//! - list: REST `GET /repos/{repo}/actions/artifacts`（name でのサーバー側フィルタあり）
//! - download: REST `GET /repos/{repo}/actions/artifacts/{id}/zip` → zip ファイル
//! - upload: results service（twirp `CreateArtifact` → blob `PUT` → `FinalizeArtifact`）
//!
//! upload に必要な backend id は runtime token（JWT）の scope から取り出します。

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, SecondsFormat, TimeDelta};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::archive::zip_single_file;
use crate::domain::{
    AccessToken, ArtifactHandle, ArtifactId, Download, ListQuery, RemoteError, UploadAck,
    UploadOptions,
};
use crate::ports::{ArtifactStore, Clock, SystemClock};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const ARTIFACT_SERVICE: &str = "github.actions.results.api.v1.ArtifactService";
const RESULTS_SCOPE_PREFIX: &str = "Actions.Results:";
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for [`GitHubArtifactStore`].
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,

    /// `owner/repo`.
    pub repository: String,

    /// REST token used for listing.
    pub token: Option<AccessToken>,

    /// `ACTIONS_RUNTIME_TOKEN`, required for uploads.
    pub runtime_token: Option<AccessToken>,

    /// `ACTIONS_RESULTS_URL`, required for uploads.
    pub results_url: Option<String>,

    pub user_agent: String,
}

impl GitHubConfig {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            repository: repository.into(),
            token: None,
            runtime_token: None,
            results_url: None,
            user_agent: concat!("runstamp/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_token(mut self, token: Option<AccessToken>) -> Self {
        self.token = token;
        self
    }

    pub fn with_runtime(mut self, runtime_token: Option<AccessToken>, results_url: Option<String>) -> Self {
        self.runtime_token = runtime_token;
        self.results_url = results_url;
        self
    }

    fn artifacts_url(&self) -> String {
        format!(
            "{}/repos/{}/actions/artifacts",
            self.api_url.trim_end_matches('/'),
            self.repository
        )
    }
}

pub struct GitHubArtifactStore<C = SystemClock> {
    client: reqwest::Client,
    config: GitHubConfig,
    clock: C,
}

impl GitHubArtifactStore<SystemClock> {
    pub fn new(config: GitHubConfig) -> Result<Self, RemoteError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> GitHubArtifactStore<C> {
    pub fn with_clock(config: GitHubConfig, clock: C) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            config,
            clock,
        })
    }

    fn rest(&self, request: reqwest::RequestBuilder, token: Option<&AccessToken>) -> reqwest::RequestBuilder {
        let request = request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    async fn twirp<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, RemoteError>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let token = self
            .config
            .runtime_token
            .as_ref()
            .ok_or(RemoteError::MissingCredentials("ACTIONS_RUNTIME_TOKEN"))?;
        let base = self
            .config
            .results_url
            .as_deref()
            .ok_or(RemoteError::MissingCredentials("ACTIONS_RESULTS_URL"))?;

        let response = self
            .client
            .post(twirp_url(base, method))
            .bearer_auth(token.expose())
            .json(body)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

#[async_trait]
impl<C: Clock> ArtifactStore for GitHubArtifactStore<C> {
    async fn list_artifacts(&self, query: &ListQuery) -> Result<Vec<ArtifactHandle>, RemoteError> {
        let mut request = self.client.get(self.config.artifacts_url()).query(&[
            ("per_page", query.per_page.to_string()),
            ("page", query.page.to_string()),
        ]);
        if let Some(name) = &query.name {
            request = request.query(&[("name", name)]);
        }

        let response = self.rest(request, self.config.token.as_ref()).send().await?;
        let body: ListArtifactsResponse = check_status(response).await?.json().await?;
        tracing::debug!(
            page = query.page,
            total_count = body.total_count,
            returned = body.artifacts.len(),
            "listed artifacts"
        );

        Ok(body
            .artifacts
            .into_iter()
            .filter_map(RestArtifact::into_handle)
            .collect())
    }

    fn filters_by_name(&self) -> bool {
        true
    }

    async fn download(
        &self,
        handle: &ArtifactHandle,
        token: &AccessToken,
        dest_dir: &Path,
    ) -> Result<Download, RemoteError> {
        let url = format!("{}/{}/zip", self.config.artifacts_url(), handle.id.0);
        let response = self.rest(self.client.get(url), Some(token)).send().await?;
        let bytes = check_status(response).await?.bytes().await?;

        let path = dest_dir.join("artifact.zip");
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(artifact_id = %handle.id, bytes = bytes.len(), "downloaded artifact archive");
        Ok(Download::Archive { path })
    }

    async fn upload(
        &self,
        name: &str,
        file: &Path,
        options: UploadOptions,
    ) -> Result<UploadAck, RemoteError> {
        let token = self
            .config
            .runtime_token
            .as_ref()
            .ok_or(RemoteError::MissingCredentials("ACTIONS_RUNTIME_TOKEN"))?;
        let ids = BackendIds::from_runtime_token(token.expose())?;

        let entry_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RemoteError::Protocol(format!("not a file: {}", file.display())))?;
        let contents = tokio::fs::read(file).await?;
        let archive = zip_single_file(entry_name, &contents)?;
        let hash = format!("sha256:{}", hex::encode(Sha256::digest(&archive)));
        let expires_at = self.clock.now() + TimeDelta::days(i64::from(options.retention_days));

        let created: CreateArtifactResponse = self
            .twirp(
                "CreateArtifact",
                &CreateArtifactRequest {
                    workflow_run_backend_id: &ids.run,
                    workflow_job_run_backend_id: &ids.job,
                    name,
                    expires_at: Some(expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    version: 4,
                },
            )
            .await?;
        if !created.ok || created.signed_upload_url.is_empty() {
            return Err(RemoteError::Protocol("CreateArtifact was not accepted".to_string()));
        }

        let size = archive.len() as u64;
        let response = self
            .client
            .put(&created.signed_upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", "application/zip")
            .body(archive)
            .send()
            .await?;
        check_status(response).await?;

        let finalized: FinalizeArtifactResponse = self
            .twirp(
                "FinalizeArtifact",
                &FinalizeArtifactRequest {
                    workflow_run_backend_id: &ids.run,
                    workflow_job_run_backend_id: &ids.job,
                    name,
                    size: size.to_string(),
                    hash: Some(hash),
                },
            )
            .await?;
        if !finalized.ok {
            return Err(RemoteError::Protocol("FinalizeArtifact was not accepted".to_string()));
        }

        let id = finalized
            .artifact_id
            .parse::<u64>()
            .map_err(|e| RemoteError::Decode(format!("artifact_id {:?}: {e}", finalized.artifact_id)))?;
        tracing::debug!(artifact_id = id, size, "uploaded artifact");
        Ok(UploadAck {
            id: ArtifactId(id),
            size,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

fn twirp_url(base: &str, method: &str) -> String {
    format!(
        "{}/twirp/{ARTIFACT_SERVICE}/{method}",
        base.trim_end_matches('/')
    )
}

/// Workflow run / job ids of the results service.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BackendIds {
    run: String,
    job: String,
}

impl BackendIds {
    /// Read the `Actions.Results:<run>:<job>` scope out of the runtime JWT.
    fn from_runtime_token(token: &str) -> Result<Self, RemoteError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| RemoteError::Protocol("runtime token is not a JWT".to_string()))?;
        let decoded = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| RemoteError::Decode(format!("runtime token payload: {e}")))?;
        let claims: TokenClaims = serde_json::from_slice(&decoded)?;

        claims
            .scp
            .split(' ')
            .filter_map(|scope| scope.strip_prefix(RESULTS_SCOPE_PREFIX))
            .find_map(|ids| {
                let (run, job) = ids.split_once(':')?;
                (!run.is_empty() && !job.is_empty()).then(|| BackendIds {
                    run: run.to_string(),
                    job: job.to_string(),
                })
            })
            .ok_or_else(|| {
                RemoteError::Protocol("runtime token has no Actions.Results scope".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    scp: String,
}

#[derive(Debug, Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    artifacts: Vec<RestArtifact>,
}

#[derive(Debug, Deserialize)]
struct RestArtifact {
    id: u64,
    name: String,
    created_at: Option<String>,
    #[serde(default)]
    expired: bool,
}

impl RestArtifact {
    /// Entries without a parseable `created_at` cannot be ordered and are dropped.
    fn into_handle(self) -> Option<ArtifactHandle> {
        let created_at = match self.created_at.as_deref().map(DateTime::parse_from_rfc3339) {
            Some(Ok(at)) => at
                .with_timezone(&chrono::Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            _ => {
                tracing::debug!(artifact_id = self.id, "artifact without created_at, skipping");
                return None;
            }
        };
        Some(ArtifactHandle {
            id: ArtifactId(self.id),
            name: self.name,
            created_at,
            expired: self.expired,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateArtifactRequest<'a> {
    workflow_run_backend_id: &'a str,
    workflow_job_run_backend_id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    version: u32,
}

#[derive(Debug, Deserialize)]
struct CreateArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default, alias = "signedUploadUrl")]
    signed_upload_url: String,
}

#[derive(Debug, Serialize)]
struct FinalizeArtifactRequest<'a> {
    workflow_run_backend_id: &'a str,
    workflow_job_run_backend_id: &'a str,
    name: &'a str,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinalizeArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default, alias = "artifactId")]
    artifact_id: String,
}
