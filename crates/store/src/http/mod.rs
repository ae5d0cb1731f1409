//! Retryable JSON GETs and streaming tarball downloads.

pub mod retry;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::integrity::{FileIntegrity, IntegrityChecker, StoreIntegrity};
use crate::observability::{ObservabilityBus, ProgressEvent};
use crate::unpack::{IgnorePredicate, UnpackResult, Unpacker};
use retry::RetryPolicy;

/// Resolves per-host credentials for outbound requests.
///
/// The default implementation reads npm-style tokens out of
/// `raw_npm_config` (e.g. `//registry.npmjs.org/:_authToken`), matching
/// how the per-call config already carries that data.
pub trait CredentialsProvider: Send + Sync {
    /// A bearer token to send for requests to `host`, if any.
    fn token_for_host(&self, host: &str) -> Option<String>;
}

/// [`CredentialsProvider`] backed by a static host → token map.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials(pub HashMap<String, String>);

impl CredentialsProvider for StaticCredentials {
    fn token_for_host(&self, host: &str) -> Option<String> {
        self.0.get(host).cloned()
    }
}

/// Options controlling a single [`HttpClient::download`] call.
pub struct DownloadOptions {
    /// Directory the unpacker should write content into.
    pub unpack_to: PathBuf,
    /// Expected SRI digest, if known ahead of time.
    pub integrity: Option<String>,
    /// Skip archive entries for which this returns `true`.
    pub ignore: Option<IgnorePredicate>,
    /// Whether to compute a per-file integrity index (strict mode) as
    /// opposed to a single whole-package digest (fast mode).
    pub generate_package_integrity: bool,
    /// The registry this tarball was resolved against, for auth scoping.
    pub registry: Option<String>,
    /// Always send credentials regardless of host matching.
    pub always_auth: bool,
    /// The identity this download is for, tagged onto progress events.
    pub identity: String,
    /// Which attempt this is, threaded through only for logging — the
    /// client's own retry loop tracks attempts independently.
    pub attempt_hint: u32,
}

/// The outcome of a successful [`HttpClient::download`]: the unpacked
/// files plus the integrity record to persist.
pub struct DownloadOutcome {
    /// Files written by the unpacker.
    pub unpacked: UnpackResult,
    /// The integrity record to write to `integrity.json`.
    pub integrity: StoreIntegrity,
}

/// Retryable JSON GET and streaming tarball download client.
pub struct HttpClient {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialsProvider>,
    checker: Arc<dyn IntegrityChecker>,
    unpacker: Arc<dyn Unpacker>,
    bus: ObservabilityBus,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Build a client from store configuration and its collaborators.
    pub fn new(
        config: &StoreConfig,
        credentials: Arc<dyn CredentialsProvider>,
        checker: Arc<dyn IntegrityChecker>,
        unpacker: Arc<dyn Unpacker>,
        bus: ObservabilityBus,
    ) -> StoreResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(proxy) = &config.proxy.http {
            builder = builder.proxy(
                reqwest::Proxy::http(proxy).map_err(|e| StoreError::InvalidConfig { reason: e.to_string() })?,
            );
        }
        if let Some(proxy) = &config.proxy.https {
            builder = builder.proxy(
                reqwest::Proxy::https(proxy).map_err(|e| StoreError::InvalidConfig { reason: e.to_string() })?,
            );
        }
        if !config.ssl.strict {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(StoreError::Network)?;

        Ok(Self { client, credentials, checker, unpacker, bus, retry: RetryPolicy::new(config.retry.clone()) })
    }

    fn should_authenticate(&self, url: &str, registry: Option<&str>, always_auth: bool) -> bool {
        if always_auth {
            return true;
        }
        let Some(registry) = registry else {
            return true;
        };
        let tarball_host = reqwest::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string));
        let registry_host = reqwest::Url::parse(registry).ok().and_then(|u| u.host_str().map(str::to_string));
        tarball_host == registry_host
    }

    fn apply_auth(&self, mut request: reqwest::RequestBuilder, url: &str, authenticate: bool) -> reqwest::RequestBuilder {
        if !authenticate {
            return request;
        }
        if let Some(host) = reqwest::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
            if let Some(token) = self.credentials.token_for_host(&host) {
                request = request.bearer_auth(token);
            }
        }
        request
    }

    /// Fetch and deserialize a JSON manifest. No retry at this layer —
    /// metadata requests are cheap and the caller decides whether to
    /// resolve a different identity on failure.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, registry: Option<&str>) -> StoreResult<T> {
        let authenticate = self.should_authenticate(url, registry, false);
        let request = self.apply_auth(self.client.get(url), url, authenticate);
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Network(response.error_for_status().unwrap_err()));
        }
        Ok(response.json().await?)
    }

    /// Download a tarball, verifying integrity and unpacking it, with
    /// retry on transient failures.
    pub async fn download(&self, url: &str, save_path: &Path, opts: &DownloadOptions) -> StoreResult<DownloadOutcome> {
        let authenticate = self.should_authenticate(url, opts.registry.as_deref(), opts.always_auth);
        let mut attempt = 0u32;

        self.retry
            .execute(url, || {
                attempt += 1;
                self.download_once(url, save_path, opts, authenticate, attempt)
            })
            .await
    }

    async fn download_once(
        &self,
        url: &str,
        save_path: &Path,
        opts: &DownloadOptions,
        authenticate: bool,
        attempt: u32,
    ) -> StoreResult<DownloadOutcome> {
        let request = self.apply_auth(self.client.get(url), url, authenticate);
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Network(response.error_for_status().unwrap_err()));
        }

        let expected_size = response.content_length();
        self.bus.emit(ProgressEvent::FetchingStarted {
            identity: opts.identity.clone(),
            size: expected_size,
            attempt,
        });

        let mut downloaded: u64 = 0;
        let mut buffer = Vec::with_capacity(expected_size.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            downloaded += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            self.bus.emit(ProgressEvent::FetchingProgress { identity: opts.identity.clone(), downloaded });
        }

        if let Some(expected) = expected_size {
            if downloaded != expected {
                return Err(StoreError::BadTarball { expected: Some(expected), received: downloaded, url: url.to_string() });
            }
        }

        let data = Bytes::from(buffer);

        if let Some(expected_integrity) = &opts.integrity {
            self.checker.check(&data, expected_integrity)?;
        }

        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(save_path, &data).await?;

        let unpacked = self.unpacker.unpack(data.clone(), &opts.unpack_to, opts.ignore.clone()).await?;

        let integrity = if opts.generate_package_integrity {
            let mut per_file = HashMap::new();
            for file in &unpacked.files {
                let full_path = opts.unpack_to.join(&file.path);
                if let Ok(contents) = tokio::fs::read(&full_path).await {
                    let digest = self.checker.generate(&contents);
                    per_file.insert(
                        file.path.clone(),
                        FileIntegrity { integrity: digest, mode: file.mode, size: file.size },
                    );
                }
            }
            StoreIntegrity::PerFile(per_file)
        } else {
            StoreIntegrity::Whole(opts.integrity.clone().unwrap_or_else(|| self.checker.generate(&data)))
        };

        debug!(url, downloaded, "download complete");
        Ok(DownloadOutcome { unpacked, integrity })
    }
}
