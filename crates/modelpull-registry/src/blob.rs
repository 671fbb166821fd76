//! Resumable, digest-verified blob downloads.
//!
//! Each blob streams into a `.part` file next to its final content-addressed
//! name, hashing as it goes. Partial files are resumed with a `Range` request
//! and the hasher is pre-fed from the bytes already on disk; servers that
//! ignore the range get the truncate-and-restart recovery. The final rename
//! only happens after the streamed hash matches the digest, so a final file
//! is always verified content.

use std::path::Path;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use url::Url;

use modelpull_core::staging::{digest_hex, StagingLayout};
use modelpull_core::ProgressCounter;

use crate::error::{RegistryError, RegistryResult};
use crate::transport::Transport;

/// Read/hash buffer size for pre-feeding from disk.
const HASH_BUF_LEN: usize = 64 * 1024;

/// Blob URL for `(repo, digest)` against a registry base.
#[must_use]
pub fn blob_url(registry: &Url, repository: &str, digest: &str) -> String {
    format!(
        "{}/v2/{repository}/blobs/{digest}",
        registry.as_str().trim_end_matches('/')
    )
}

/// SHA-256 of a file's current content, as lowercase hex.
async fn hash_file(path: &Path) -> RegistryResult<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_LEN];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_string(&hasher.finalize()))
}

/// Feed the first `limit` bytes of a file into a hasher.
async fn prefeed_hasher(hasher: &mut Sha256, path: &Path, limit: u64) -> RegistryResult<()> {
    let mut file = File::open(path).await?;
    let mut remaining = limit;
    let mut buf = vec![0u8; HASH_BUF_LEN];
    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(buf.len()));
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(())
}

fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Download one blob into the staging layout.
///
/// `expected_size` of zero means unknown. Progress, when provided, is only
/// advanced for newly streamed bytes; bytes already on disk were accounted by
/// the pull engine's startup sweep, and a range downgrade rolls that
/// accounting back before restarting.
#[allow(clippy::too_many_arguments)]
pub async fn download_blob(
    transport: &dyn Transport,
    registry: &Url,
    repository: &str,
    digest: &str,
    token: &str,
    layout: &StagingLayout,
    expected_size: u64,
    progress: Option<&ProgressCounter>,
) -> RegistryResult<()> {
    let hex = digest_hex(digest).ok_or_else(|| RegistryError::MalformedDigest {
        digest: digest.to_string(),
    })?;
    let final_path = layout.blob_path(hex);
    let part_path = layout.blob_part_path(hex);

    // Already installed?
    if let Some(len) = file_len(&final_path).await {
        if expected_size == 0 || len >= expected_size {
            tracing::debug!(digest, "blob already present");
            return Ok(());
        }
    }

    // A complete .part that verifies can be promoted without any HTTP.
    let part_len = file_len(&part_path).await;
    if expected_size > 0
        && part_len == Some(expected_size)
        && hash_file(&part_path).await? == hex
    {
        tracing::debug!(digest, "promoting verified partial file");
        tokio::fs::rename(&part_path, &final_path).await?;
        return Ok(());
    }

    let mut start = part_len.unwrap_or(0);
    if expected_size > 0 {
        start = start.min(expected_size);
    }

    let url = blob_url(registry, repository, digest);
    let mut headers = vec![(
        "Accept".to_string(),
        "application/octet-stream".to_string(),
    )];
    if !token.is_empty() {
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));
    }
    if start > 0 {
        headers.push(("Range".to_string(), format!("bytes={start}-")));
    }

    let response = transport.get(&url, &headers).await?;
    let status = response.status();
    if status != 200 && status != 206 {
        return Err(RegistryError::RequestFailed { status, url });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&part_path)
        .await?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut hasher = Sha256::new();
    if start > 0 {
        prefeed_hasher(&mut hasher, &part_path, start).await?;
    }

    // Range downgrade: the server ignored our range and is sending the whole
    // blob. Restart from scratch and roll back the startup accounting.
    if status == 200 && start > 0 {
        tracing::debug!(digest, start, "server ignored range, restarting blob");
        file.set_len(0).await?;
        file.seek(SeekFrom::Start(0)).await?;
        hasher = Sha256::new();
        if let Some(progress) = progress {
            progress.add(-i64::try_from(start).unwrap_or(i64::MAX));
        }
    }

    let mut body = response.into_body();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        if let Some(progress) = progress {
            progress.add(i64::try_from(chunk.len()).unwrap_or(i64::MAX));
        }
    }
    file.flush().await?;
    drop(file);

    let actual = hex_string(&hasher.finalize());
    if actual != hex {
        // The .part stays behind; the next attempt re-verifies from scratch.
        return Err(RegistryError::DigestMismatch {
            expected: hex.to_string(),
            actual,
        });
    }

    tokio::fs::rename(&part_path, &final_path).await?;
    tracing::debug!(digest, "blob verified and installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{CannedResponse, FakeTransport};

    fn sha_hex(data: &[u8]) -> String {
        hex_string(&Sha256::digest(data))
    }

    fn layout() -> (tempfile::TempDir, StagingLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StagingLayout::new(dir.path().join("m.staging"));
        layout.ensure_dirs().unwrap();
        (dir, layout)
    }

    fn registry() -> Url {
        Url::parse("https://reg.example").unwrap()
    }

    #[tokio::test]
    async fn fresh_download_verifies_and_installs() {
        let (_dir, layout) = layout();
        let content = b"twenty bytes of blob".to_vec();
        let hex = sha_hex(&content);
        let digest = format!("sha256:{hex}");

        let transport = FakeTransport::new().on("/blobs/", CannedResponse::ok(content.clone()));
        let progress = ProgressCounter::new();
        progress.set_total(content.len() as u64);

        download_blob(
            &transport,
            &registry(),
            "library/m",
            &digest,
            "tok",
            &layout,
            content.len() as u64,
            Some(&progress),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(layout.blob_path(&hex)).unwrap(), content);
        assert!(!layout.blob_part_path(&hex).exists());
        assert_eq!(progress.done(), content.len() as u64);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("authorization"), Some("Bearer tok"));
        assert_eq!(
            requests[0].header("accept"),
            Some("application/octet-stream")
        );
        assert!(requests[0].header("range").is_none());
    }

    #[tokio::test]
    async fn existing_final_short_circuits() {
        let (_dir, layout) = layout();
        let content = b"already here".to_vec();
        let hex = sha_hex(&content);
        std::fs::write(layout.blob_path(&hex), &content).unwrap();

        // no canned response: any HTTP call would fail the test
        let transport = FakeTransport::new();
        download_blob(
            &transport,
            &registry(),
            "library/m",
            &format!("sha256:{hex}"),
            "",
            &layout,
            content.len() as u64,
            None,
        )
        .await
        .unwrap();
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn complete_part_is_promoted_without_http() {
        let (_dir, layout) = layout();
        let content = b"finished but never renamed".to_vec();
        let hex = sha_hex(&content);
        std::fs::write(layout.blob_part_path(&hex), &content).unwrap();

        let transport = FakeTransport::new();
        download_blob(
            &transport,
            &registry(),
            "library/m",
            &format!("sha256:{hex}"),
            "",
            &layout,
            content.len() as u64,
            None,
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(layout.blob_path(&hex)).unwrap(), content);
        assert!(!layout.blob_part_path(&hex).exists());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn resume_streams_only_the_tail() {
        let (_dir, layout) = layout();
        let content = b"0123456789abcdefghij".to_vec(); // 20 bytes
        let hex = sha_hex(&content);
        std::fs::write(layout.blob_part_path(&hex), &content[..12]).unwrap();

        let transport = FakeTransport::new().on(
            "/blobs/",
            CannedResponse {
                status: 206,
                headers: Vec::new(),
                body: content[12..].to_vec(),
            },
        );
        let progress = ProgressCounter::new();
        progress.set_total(20);
        progress.set_done(12); // startup sweep accounted the partial

        download_blob(
            &transport,
            &registry(),
            "library/m",
            &format!("sha256:{hex}"),
            "",
            &layout,
            20,
            Some(&progress),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(layout.blob_path(&hex)).unwrap(), content);
        assert_eq!(progress.done(), 20);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("range"), Some("bytes=12-"));
    }

    #[tokio::test]
    async fn range_downgrade_restarts_and_rolls_back_progress() {
        let (_dir, layout) = layout();
        let content = b"0123456789abcdefghij".to_vec();
        let hex = sha_hex(&content);
        // stale partial whose bytes do NOT match the real content
        std::fs::write(layout.blob_part_path(&hex), b"xxxxxxxxxxxx").unwrap();

        // server ignores the range and serves the full blob with 200
        let transport = FakeTransport::new().on("/blobs/", CannedResponse::ok(content.clone()));
        let progress = ProgressCounter::new();
        progress.set_total(20);
        progress.set_done(12);

        download_blob(
            &transport,
            &registry(),
            "library/m",
            &format!("sha256:{hex}"),
            "",
            &layout,
            20,
            Some(&progress),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(layout.blob_path(&hex)).unwrap(), content);
        // 12 rolled back, then the full 20 streamed
        assert_eq!(progress.done(), 20);

        let requests = transport.requests();
        assert_eq!(requests[0].header("range"), Some("bytes=12-"));
    }

    #[tokio::test]
    async fn digest_mismatch_keeps_part_file() {
        let (_dir, layout) = layout();
        let hex = "e".repeat(64); // not the hash of the body below
        let transport = FakeTransport::new().on("/blobs/", CannedResponse::ok("corrupt bytes"));

        let err = download_blob(
            &transport,
            &registry(),
            "library/m",
            &format!("sha256:{hex}"),
            "",
            &layout,
            13,
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RegistryError::DigestMismatch { .. }));
        assert!(layout.blob_part_path(&hex).exists());
        assert!(!layout.blob_path(&hex).exists());
    }

    #[tokio::test]
    async fn unexpected_status_fails() {
        let (_dir, layout) = layout();
        let hex = "f".repeat(64);
        let transport = FakeTransport::new().on("/blobs/", CannedResponse::status(403));

        let err = download_blob(
            &transport,
            &registry(),
            "library/m",
            &format!("sha256:{hex}"),
            "",
            &layout,
            0,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RequestFailed { status: 403, .. }
        ));
    }

    #[tokio::test]
    async fn malformed_digest_is_rejected() {
        let (_dir, layout) = layout();
        let transport = FakeTransport::new();
        let err = download_blob(
            &transport,
            &registry(),
            "library/m",
            "sha256:nothex",
            "",
            &layout,
            0,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedDigest { .. }));
    }
}
