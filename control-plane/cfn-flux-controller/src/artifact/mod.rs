//! Downloads a source artifact, verifies its digest and reads the template
//! out of it.

pub mod safe_path;

use std::time::Duration;

use futures_util::StreamExt;
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::ArtifactHttpConfig;
use crate::source::Artifact;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("failed to download artifact from {url}: {message}")]
    Http { url: String, message: String },
    #[error("failed to download artifact from {url}: HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("artifact digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("artifact advertises neither a digest nor a checksum")]
    MissingDigest,
    #[error("unsupported artifact digest '{0}'")]
    UnsupportedDigest(String),
    #[error("failed to extract artifact: {0}")]
    Extract(String),
    #[error("invalid template path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("failed to read template '{path}': {message}")]
    Read { path: String, message: String },
}

/// Expected digest of an artifact, parsed from `digest` or legacy `checksum`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedDigest {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl ExpectedDigest {
    pub fn from_artifact(artifact: &Artifact) -> Result<Self, ArtifactError> {
        if let Some(digest) = artifact.digest.as_deref().filter(|d| !d.is_empty()) {
            let (algo, hex) = digest
                .split_once(':')
                .ok_or_else(|| ArtifactError::UnsupportedDigest(digest.to_string()))?;
            let algorithm = match algo {
                "sha256" => DigestAlgorithm::Sha256,
                "sha384" => DigestAlgorithm::Sha384,
                "sha512" => DigestAlgorithm::Sha512,
                _ => return Err(ArtifactError::UnsupportedDigest(digest.to_string())),
            };
            return Ok(Self {
                algorithm,
                hex: hex.to_ascii_lowercase(),
            });
        }
        match artifact.checksum.as_deref().filter(|c| !c.is_empty()) {
            Some(sum) => Ok(Self {
                algorithm: DigestAlgorithm::Sha256,
                hex: sum.to_ascii_lowercase(),
            }),
            None => Err(ArtifactError::MissingDigest),
        }
    }
}

enum Verifier {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Verifier {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Verifier::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => Verifier::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => Verifier::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Verifier::Sha256(h) => h.update(chunk),
            Verifier::Sha384(h) => h.update(chunk),
            Verifier::Sha512(h) => h.update(chunk),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Verifier::Sha256(h) => format!("{:x}", h.finalize()),
            Verifier::Sha384(h) => format!("{:x}", h.finalize()),
            Verifier::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Fetches artifacts from the source-controller over HTTP.
#[derive(Clone)]
pub struct ArtifactLoader {
    client: reqwest::Client,
    cfg: ArtifactHttpConfig,
    backoff: Duration,
}

impl ArtifactLoader {
    pub fn new(cfg: ArtifactHttpConfig) -> Result<Self, ArtifactError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ArtifactError::Http {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            cfg,
            backoff: Duration::from_secs(1),
        })
    }

    /// Overrides the initial retry delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Applies the local-development host override to an artifact URL.
    pub fn resolve_url(&self, raw: &str) -> Result<Url, ArtifactError> {
        let http_err = |message: String| ArtifactError::Http {
            url: raw.to_string(),
            message,
        };
        let mut url = Url::parse(raw).map_err(|e| http_err(e.to_string()))?;
        let Some(over) = self
            .cfg
            .source_controller_localhost
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok(url);
        };
        let (host, port) = match over.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| http_err(format!("invalid host override '{over}'")))?;
                (h, Some(port))
            }
            None => (over, None),
        };
        url.set_host(Some(host)).map_err(|e| http_err(e.to_string()))?;
        url.set_port(port)
            .map_err(|_| http_err(format!("invalid host override '{over}'")))?;
        Ok(url)
    }

    /// Downloads the archive, checks its digest, unpacks it into a temporary
    /// directory and returns the template at `template_path`.
    pub async fn load_template(
        &self,
        artifact: &Artifact,
        template_path: &str,
    ) -> Result<String, ArtifactError> {
        let expected = ExpectedDigest::from_artifact(artifact)?;
        let url = self.resolve_url(&artifact.url)?;
        let archive = self.download(&url, &expected).await?;
        let path = template_path.to_string();
        tokio::task::spawn_blocking(move || extract_template(&archive, &path))
            .await
            .map_err(|e| ArtifactError::Extract(e.to_string()))?
    }

    async fn download(
        &self,
        url: &Url,
        expected: &ExpectedDigest,
    ) -> Result<Vec<u8>, ArtifactError> {
        let mut delay = self.backoff;
        let mut attempt = 0u32;
        let response = loop {
            let retryable = match self.client.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => break resp,
                Ok(resp) if resp.status().is_server_error() => ArtifactError::Status {
                    url: url.to_string(),
                    status: resp.status().as_u16(),
                },
                Ok(resp) => {
                    return Err(ArtifactError::Status {
                        url: url.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Err(e) if e.is_connect() || e.is_timeout() => ArtifactError::Http {
                    url: url.to_string(),
                    message: e.to_string(),
                },
                Err(e) => {
                    return Err(ArtifactError::Http {
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                }
            };
            if attempt >= self.cfg.retries {
                return Err(retryable);
            }
            attempt += 1;
            warn!(%url, attempt, error = %retryable, "retrying artifact download");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        };

        let mut verifier = Verifier::new(expected.algorithm);
        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ArtifactError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            verifier.update(&chunk);
            buf.extend_from_slice(&chunk);
        }
        let actual = verifier.finalize_hex();
        if actual != expected.hex {
            return Err(ArtifactError::DigestMismatch {
                expected: format!("{}:{}", expected.algorithm.name(), expected.hex),
                actual: format!("{}:{}", expected.algorithm.name(), actual),
            });
        }
        debug!(%url, bytes = buf.len(), "downloaded artifact");
        Ok(buf)
    }
}

/// Unpacks a gzip tarball into a temporary directory and reads one file
/// from it. The directory is removed when this returns.
pub fn extract_template(archive: &[u8], template_path: &str) -> Result<String, ArtifactError> {
    let dir = tempfile::tempdir().map_err(|e| ArtifactError::Extract(e.to_string()))?;
    let decoder = flate2::read::GzDecoder::new(archive);
    tar::Archive::new(decoder)
        .unpack(dir.path())
        .map_err(|e| ArtifactError::Extract(e.to_string()))?;
    let file = safe_path::secure_join(dir.path(), template_path)?;
    let bytes = std::fs::read(&file).map_err(|e| ArtifactError::Read {
        path: template_path.to_string(),
        message: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|_| ArtifactError::Read {
        path: template_path.to_string(),
        message: "template is not valid UTF-8".into(),
    })
}
