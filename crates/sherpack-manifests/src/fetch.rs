//! Artifact download and extraction
//!
//! Manifests are published by the control plane as gzipped tarballs behind
//! an authenticated URL. A fetch downloads the tarball, optionally checks its
//! sha256 digest and extracts it into a fresh temporary directory owned by
//! the caller.

use async_trait::async_trait;
use sherpack_core::CoreError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{ManifestError, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Downloads and unpacks manifest artifacts
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch the tarball at `url` and return the directory it was extracted to
    ///
    /// `digest` pins the content revision; a `sha256:` digest is also
    /// verified against the downloaded bytes.
    async fn fetch(&self, url: &str, token: &str, digest: Option<&str>) -> Result<PathBuf>;
}

/// HTTP fetcher authenticating with the deploy token
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ManifestError::Network {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Use a preconfigured client (proxies, custom roots)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &Url, token: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .header("Authorization", format!("Token {}", token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManifestError::from_status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| ManifestError::Network {
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, url: &str, token: &str, digest: Option<&str>) -> Result<PathBuf> {
        let url = tarball_url(url, digest)?;
        info!(url = %url, "fetching tarball");

        let data = self.download(&url, token).await?;

        if let Some(expected) = digest.filter(|d| d.starts_with("sha256:")) {
            let actual = compute_digest(&data);
            if !digest_matches(expected, &actual) {
                return Err(ManifestError::Integrity {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let dir = tempfile::Builder::new().prefix("manifests").tempdir()?.keep();
        debug!(dir = %dir.display(), bytes = data.len(), "extracting tarball");

        let dest = dir.clone();
        tokio::task::spawn_blocking(move || {
            sherpack_core::archive::extract_tarball_bytes(&data, &dest)
        })
        .await
        .map_err(|e| ManifestError::Archive {
            dir: dir.clone(),
            message: e.to_string(),
        })?
        .map_err(|e| match e {
            CoreError::Archive { message } => ManifestError::Archive {
                dir: dir.clone(),
                message,
            },
            CoreError::EmptyArchive { .. } => ManifestError::Archive {
                dir: dir.clone(),
                message: "archive is empty".to_string(),
            },
            other => ManifestError::Core(other),
        })?;

        Ok(dir)
    }
}

/// Build the download URL, pinning the digest as a query parameter
pub fn tarball_url(url: &str, digest: Option<&str>) -> Result<Url> {
    let mut parsed = Url::parse(url).map_err(|e| ManifestError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if let Some(digest) = digest.filter(|d| !d.is_empty()) {
        parsed.query_pairs_mut().append_pair("digest", digest);
    }
    Ok(parsed)
}

/// Compute SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check if two digests match, ignoring the algorithm prefix and case
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    fn normalize(digest: &str) -> String {
        digest
            .trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    }

    normalize(expected) == normalize(actual)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::{Builder, Header};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);
        for (path, content) in files {
            let mut header = Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"hello world");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 7 + 64);
    }

    #[test]
    fn test_digest_matches() {
        let digest = compute_digest(b"hello world");
        assert!(digest_matches(&digest, &digest));
        assert!(digest_matches(&digest.to_uppercase(), &digest));
        assert!(digest_matches(&digest.replace("sha256:", "sha256-"), &digest));
        assert!(!digest_matches("sha256:abc", &digest));
    }

    #[test]
    fn test_tarball_url_appends_digest() {
        let url = tarball_url("https://console.example.com/v1/tars/svc", Some("abc")).unwrap();
        assert_eq!(url.as_str(), "https://console.example.com/v1/tars/svc?digest=abc");

        let url = tarball_url("https://console.example.com/v1/tars/svc?x=1", None).unwrap();
        assert_eq!(url.query(), Some("x=1"));

        assert!(matches!(
            tarball_url("not a url", None),
            Err(ManifestError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_extracts_into_fresh_dir() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tars/svc-1"))
            .and(header("Authorization", "Token secret"))
            .and(query_param("digest", "rev-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(tarball(&[("cm.yaml", "kind: ConfigMap")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpArtifactFetcher::new().unwrap();
        let dir = fetcher
            .fetch(&format!("{}/tars/svc-1", server.uri()), "secret", Some("rev-1"))
            .await
            .unwrap();

        assert!(dir.join("cm.yaml").exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_fetch_status_taxonomy() {
        let server = MockServer::start().await;
        for (route, status) in [("/forbidden", 403), ("/payment", 402), ("/broken", 500)] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        let fetcher = HttpArtifactFetcher::new().unwrap();
        let fetch = |route: &str| format!("{}{}", server.uri(), route);

        let err = fetcher.fetch(&fetch("/forbidden"), "t", None).await.unwrap_err();
        assert!(err.is_authentication());

        let err = fetcher.fetch(&fetch("/payment"), "t", None).await.unwrap_err();
        assert!(err.is_transient());

        let err = fetcher.fetch(&fetch("/broken"), "t", None).await.unwrap_err();
        assert!(matches!(err, ManifestError::Fetch { status: 500 }));
    }

    #[tokio::test]
    async fn test_fetch_corrupt_archive_leaves_dir() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a tarball".to_vec()))
            .mount(&server)
            .await;

        let fetcher = HttpArtifactFetcher::new().unwrap();
        let err = fetcher.fetch(&server.uri(), "t", None).await.unwrap_err();

        match err {
            ManifestError::Archive { dir, .. } => {
                assert!(dir.exists());
                std::fs::remove_dir_all(dir).unwrap();
            }
            other => panic!("expected archive error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_verifies_sha256_digest() {
        let body = tarball(&[("cm.yaml", "kind: ConfigMap")]);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let fetcher = HttpArtifactFetcher::new().unwrap();
        let err = fetcher
            .fetch(&server.uri(), "t", Some("sha256:0000"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Integrity { .. }));

        let good = compute_digest(&body);
        let dir = fetcher.fetch(&server.uri(), "t", Some(&good)).await.unwrap();
        std::fs::remove_dir_all(dir).unwrap();
    }
}
