//! Manifest and index negotiation.
//!
//! Fetches `/v2/<repo>/manifests/<ref>`, resolving an index down to the
//! single image manifest matching the configured platform. Registries that
//! misadvertise Content-Type get a body-based auto-detect before we give up.

use url::Url;

use modelpull_core::manifest::{
    is_index_type, is_manifest_type, ImageIndex, ImageManifest, MANIFEST_ACCEPT,
    MEDIA_TYPE_OCI_MANIFEST,
};

use crate::auth::manifest_url;
use crate::error::{RegistryError, RegistryResult};
use crate::transport::Transport;

/// How many body bytes an unsupported-type error carries.
const BODY_PREFIX_LEN: usize = 256;

/// The outcome of manifest resolution.
#[derive(Clone, Debug)]
pub struct ResolvedManifest {
    /// The flat image manifest.
    pub manifest: ImageManifest,
    /// Digest of the manifest document, when known (digest pulls and
    /// index-selected manifests).
    pub digest: Option<String>,
    /// Raw bytes of the manifest document, as served.
    pub raw: Vec<u8>,
}

/// Strip parameters from a Content-Type value (`a/b; charset=x` → `a/b`).
fn effective_media_type(content_type: Option<&str>) -> String {
    let stripped = content_type
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if stripped.is_empty() {
        // Lenient default: some registries omit the type entirely.
        MEDIA_TYPE_OCI_MANIFEST.to_string()
    } else {
        stripped.to_string()
    }
}

fn body_prefix(body: &[u8]) -> String {
    String::from_utf8_lossy(&body[..body.len().min(BODY_PREFIX_LEN)]).into_owned()
}

/// Resolve `(repo, reference)` to a single image manifest.
///
/// `platform` is the target in `os/arch` (or bare `arch`) form; indices are
/// selected against `("linux", lastSegment(platform))`.
pub async fn resolve_manifest(
    transport: &dyn Transport,
    registry: &Url,
    repository: &str,
    reference: &str,
    token: &str,
    platform: &str,
) -> RegistryResult<ResolvedManifest> {
    let target_os = "linux";
    let target_arch = platform.rsplit('/').next().unwrap_or(platform);

    let (media_type, body) =
        fetch_manifest_document(transport, registry, repository, reference, token).await?;

    if is_manifest_type(&media_type) {
        let manifest: ImageManifest = serde_json::from_slice(&body)?;
        return Ok(ResolvedManifest {
            manifest,
            digest: reference.starts_with("sha256:").then(|| reference.to_string()),
            raw: body,
        });
    }

    if is_index_type(&media_type) {
        let index: ImageIndex = serde_json::from_slice(&body)?;
        return resolve_from_index(
            transport, registry, repository, token, &index, target_os, target_arch,
        )
        .await;
    }

    // Unknown media type: try both shapes before failing.
    tracing::debug!(media_type, "unexpected manifest media type, auto-detecting");
    if let Ok(manifest) = serde_json::from_slice::<ImageManifest>(&body) {
        if manifest.looks_like_manifest() {
            return Ok(ResolvedManifest {
                manifest,
                digest: reference.starts_with("sha256:").then(|| reference.to_string()),
                raw: body,
            });
        }
    }
    if let Ok(index) = serde_json::from_slice::<ImageIndex>(&body) {
        if !index.manifests.is_empty() {
            return resolve_from_index(
                transport, registry, repository, token, &index, target_os, target_arch,
            )
            .await;
        }
    }

    Err(RegistryError::UnsupportedManifest {
        media_type,
        body_prefix: body_prefix(&body),
    })
}

/// Select the platform's digest from an index and fetch that manifest.
async fn resolve_from_index(
    transport: &dyn Transport,
    registry: &Url,
    repository: &str,
    token: &str,
    index: &ImageIndex,
    target_os: &str,
    target_arch: &str,
) -> RegistryResult<ResolvedManifest> {
    let digest = index
        .select(target_os, target_arch)
        .ok_or_else(|| RegistryError::NoPlatformMatch {
            os: target_os.to_string(),
            architecture: target_arch.to_string(),
        })?
        .to_string();

    tracing::debug!(digest, target_os, target_arch, "selected manifest from index");

    let (media_type, body) =
        fetch_manifest_document(transport, registry, repository, &digest, token).await?;
    if !is_manifest_type(&media_type) {
        // One level of recursion only; a nested index is unsupported.
        let looks_flat = serde_json::from_slice::<ImageManifest>(&body)
            .is_ok_and(|m| m.looks_like_manifest());
        if !looks_flat {
            return Err(RegistryError::UnsupportedManifest {
                media_type,
                body_prefix: body_prefix(&body),
            });
        }
    }

    let manifest: ImageManifest = serde_json::from_slice(&body)?;
    Ok(ResolvedManifest {
        manifest,
        digest: Some(digest),
        raw: body,
    })
}

/// GET one manifest document, returning its effective media type and body.
async fn fetch_manifest_document(
    transport: &dyn Transport,
    registry: &Url,
    repository: &str,
    reference: &str,
    token: &str,
) -> RegistryResult<(String, Vec<u8>)> {
    let url = manifest_url(registry, repository, reference);
    let mut headers = vec![("Accept".to_string(), MANIFEST_ACCEPT.to_string())];
    if !token.is_empty() {
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));
    }

    let response = transport.get(&url, &headers).await?;
    if response.status() != 200 {
        return Err(RegistryError::RequestFailed {
            status: response.status(),
            url,
        });
    }

    let media_type = effective_media_type(response.header("content-type"));
    let body = response.body_bytes().await?;
    Ok((media_type, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{CannedResponse, FakeTransport};
    use modelpull_core::manifest::{MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_INDEX};

    fn registry() -> Url {
        Url::parse("https://reg.example").unwrap()
    }

    fn manifest_json() -> &'static str {
        r#"{
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json",
                       "digest": "sha256:cfg", "size": 10},
            "layers": [{"mediaType": "application/octet-stream",
                        "digest": "sha256:l1", "size": 20}]
        }"#
    }

    #[tokio::test]
    async fn plain_manifest_passes_through() {
        let transport = FakeTransport::new().on(
            "/manifests/latest",
            CannedResponse::ok(manifest_json())
                .with_header("Content-Type", MEDIA_TYPE_DOCKER_MANIFEST),
        );

        let resolved = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "",
            "linux/amd64",
        )
        .await
        .unwrap();

        assert_eq!(resolved.manifest.config.digest, "sha256:cfg");
        assert_eq!(resolved.manifest.layers.len(), 1);
        assert!(resolved.digest.is_none());
        assert!(!resolved.raw.is_empty());
    }

    #[tokio::test]
    async fn content_type_parameters_are_stripped() {
        let transport = FakeTransport::new().on(
            "/manifests/latest",
            CannedResponse::ok(manifest_json()).with_header(
                "Content-Type",
                "application/vnd.oci.image.manifest.v1+json; charset=utf-8",
            ),
        );

        let resolved = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "",
            "linux/amd64",
        )
        .await
        .unwrap();
        assert_eq!(resolved.manifest.layers[0].digest, "sha256:l1");
    }

    #[tokio::test]
    async fn index_selects_platform_and_recurses() {
        let hex_a = "a".repeat(64);
        let hex_b = "b".repeat(64);
        let index_json = format!(
            r#"{{"manifests": [
                {{"digest": "sha256:{hex_a}", "platform": {{"os": "linux", "architecture": "amd64"}}}},
                {{"digest": "sha256:{hex_b}", "platform": {{"os": "linux", "architecture": "arm64"}}}}
            ]}}"#
        );

        let transport = FakeTransport::new()
            .on(
                "/manifests/latest",
                CannedResponse::ok(index_json).with_header("Content-Type", MEDIA_TYPE_OCI_INDEX),
            )
            .on(
                &format!("/manifests/sha256:{hex_b}"),
                CannedResponse::ok(manifest_json())
                    .with_header("Content-Type", MEDIA_TYPE_OCI_MANIFEST),
            );

        let resolved = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "tok",
            "linux/arm64",
        )
        .await
        .unwrap();

        assert_eq!(resolved.digest.as_deref(), Some(&format!("sha256:{hex_b}")[..]));
        assert_eq!(resolved.manifest.config.digest, "sha256:cfg");

        // the recursive fetch carried the bearer token
        let second = transport.requests_matching(&format!("sha256:{hex_b}"));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].header("authorization"), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn index_without_platform_match_fails() {
        let index_json = r#"{"manifests": [
            {"digest": "sha256:x", "platform": {"os": "windows", "architecture": "amd64"}}
        ]}"#;
        let transport = FakeTransport::new().on(
            "/manifests/latest",
            CannedResponse::ok(index_json).with_header("Content-Type", MEDIA_TYPE_OCI_INDEX),
        );

        let err = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "",
            "linux/amd64",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RegistryError::NoPlatformMatch { .. }));
    }

    #[tokio::test]
    async fn empty_content_type_is_treated_as_manifest() {
        let transport =
            FakeTransport::new().on("/manifests/latest", CannedResponse::ok(manifest_json()));

        let resolved = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "",
            "linux/amd64",
        )
        .await
        .unwrap();
        assert!(resolved.manifest.looks_like_manifest());
    }

    #[tokio::test]
    async fn unknown_type_auto_detects_manifest_body() {
        let transport = FakeTransport::new().on(
            "/manifests/latest",
            CannedResponse::ok(manifest_json()).with_header("Content-Type", "text/plain"),
        );

        let resolved = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "",
            "linux/amd64",
        )
        .await
        .unwrap();
        assert_eq!(resolved.manifest.layers.len(), 1);
    }

    #[tokio::test]
    async fn unknown_type_auto_detects_index_body() {
        let hex = "c".repeat(64);
        let index_json = format!(
            r#"{{"manifests": [
                {{"digest": "sha256:{hex}", "platform": {{"os": "linux", "architecture": "amd64"}}}}
            ]}}"#
        );
        let transport = FakeTransport::new()
            .on(
                "/manifests/latest",
                CannedResponse::ok(index_json).with_header("Content-Type", "text/plain"),
            )
            .on(
                &format!("/manifests/sha256:{hex}"),
                CannedResponse::ok(manifest_json())
                    .with_header("Content-Type", MEDIA_TYPE_OCI_MANIFEST),
            );

        let resolved = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "",
            "linux/amd64",
        )
        .await
        .unwrap();
        assert_eq!(resolved.digest.as_deref(), Some(&format!("sha256:{hex}")[..]));
    }

    #[tokio::test]
    async fn garbage_body_reports_prefix() {
        let transport = FakeTransport::new().on(
            "/manifests/latest",
            CannedResponse::ok("<html>definitely not json</html>")
                .with_header("Content-Type", "text/html"),
        );

        let err = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            "latest",
            "",
            "linux/amd64",
        )
        .await
        .unwrap_err();

        match err {
            RegistryError::UnsupportedManifest {
                media_type,
                body_prefix,
            } => {
                assert_eq!(media_type, "text/html");
                assert!(body_prefix.contains("definitely not json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn digest_pull_records_digest() {
        let hex = "d".repeat(64);
        let transport = FakeTransport::new().on(
            "/manifests/sha256:",
            CannedResponse::ok(manifest_json())
                .with_header("Content-Type", MEDIA_TYPE_OCI_MANIFEST),
        );

        let resolved = resolve_manifest(
            &transport,
            &registry(),
            "library/m",
            &format!("sha256:{hex}"),
            "",
            "linux/amd64",
        )
        .await
        .unwrap();
        assert_eq!(resolved.digest.as_deref(), Some(&format!("sha256:{hex}")[..]));
    }
}
