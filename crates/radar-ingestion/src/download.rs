//! Crash-safe single-file download.
//!
//! The body is streamed to a uniquely named `<name>.<random>.partial` file
//! next to the final file, flushed and synced, then renamed into place.
//! Readers of the destination directory therefore see either nothing or a
//! complete file, even when two runs fetch the same file at once (the last
//! rename wins). On any failure the partial file is removed.

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use metrics::counter;
use radar_common::{create_partial_file, RadarError, RadarResult};
use reqwest::{Client, Url};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Outcome of a completed download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl DownloadReport {
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Downloads one URL into a directory. No retries.
#[derive(Debug, Clone)]
pub struct AtomicDownloader {
    client: Client,
}

impl AtomicDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Download `url` into `destination_dir`, keeping the URL's file name.
    #[instrument(skip(self, destination_dir), fields(url = %url, dest = %destination_dir.display()))]
    pub async fn download(&self, url: &str, destination_dir: &Path) -> RadarResult<DownloadReport> {
        ensure_directory(destination_dir).await?;
        let filename = file_name_from_url(url)?;
        let final_path = destination_dir.join(&filename);

        let started = Instant::now();
        let result = self.fetch_to(url, &final_path).await;

        match result {
            Ok(bytes) => {
                let report = DownloadReport {
                    path: final_path,
                    bytes,
                    elapsed: started.elapsed(),
                };
                counter!("radar_downloads_total").increment(1);
                counter!("radar_download_bytes_total").increment(bytes);
                info!(
                    path = %report.path.display(),
                    bytes = report.bytes,
                    speed = format!("{:.1} KB/s", report.bytes_per_second() / 1024.0),
                    "Download completed"
                );
                Ok(report)
            }
            Err(e) => {
                counter!("radar_download_failures_total").increment(1);
                warn!(error = %e, "Download failed");
                Err(e)
            }
        }
    }

    async fn fetch_to(&self, url: &str, final_path: &Path) -> RadarResult<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RadarError::download(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RadarError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        debug!(content_length = ?response.content_length(), "Streaming response body");
        write_stream_atomically(response.bytes_stream(), final_path)
            .await
            .map_err(|e| RadarError::download(url, e))
    }
}

/// Write every chunk of `stream` to `final_path` via a temporary sibling.
///
/// Returns the number of bytes written. If the stream yields an error, or
/// any write, sync or rename fails, the temporary file is removed and
/// `final_path` is left untouched.
pub async fn write_stream_atomically<S, E>(stream: S, final_path: &Path) -> io::Result<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let (file, temp_path) = create_partial_file(final_path)?.into_parts();
    debug!(path = %temp_path.display(), "Writing partial file");

    // Dropping `temp_path` on an early return deletes the partial file.
    let written = write_synced(stream, File::from_std(file)).await?;
    temp_path.persist(final_path).map_err(|e| e.error)?;
    Ok(written)
}

async fn write_synced<S, E>(stream: S, mut file: File) -> io::Result<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn ensure_directory(dir: &Path) -> RadarResult<()> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(RadarError::Destination(dir.to_path_buf())),
    }
}

/// Last path segment of `url`, refusing anything that could leave the
/// destination directory.
pub fn file_name_from_url(url: &str) -> RadarResult<String> {
    let parsed = Url::parse(url).map_err(|e| RadarError::download(url, e))?;
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();
    let name = segment.rsplit('\\').next().unwrap_or_default();

    match name {
        "" | "." | ".." => Err(RadarError::download(url, "URL does not name a file")),
        _ => Ok(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;
    use radar_common::is_partial_name;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn chunks(parts: Vec<Result<&'static str, &'static str>>) -> impl Stream<Item = Result<Bytes, &'static str>> {
        stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| Bytes::from_static(s.as_bytes()))),
        )
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("http://h/2024/05/20/KTLX/file2.ar2v").unwrap(),
            "file2.ar2v"
        );
        assert_eq!(
            file_name_from_url("http://h/d/KTLX_V06.gz?versionId=1").unwrap(),
            "KTLX_V06.gz"
        );
    }

    #[test]
    fn test_file_name_from_url_rejects_directories() {
        assert!(file_name_from_url("http://h/2024/05/20/KTLX/").is_err());
        assert!(file_name_from_url("http://h").is_err());
        assert!(file_name_from_url("not a url").is_err());
    }

    #[test]
    fn test_file_name_from_url_traversal() {
        // The URL parser resolves dot segments before we see them.
        assert_eq!(
            file_name_from_url("http://h/KTLX/../../etc/passwd.ar2v").unwrap(),
            "passwd.ar2v"
        );
    }

    #[tokio::test]
    async fn test_write_stream_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.ar2v");

        let bytes = write_stream_atomically(chunks(vec![Ok("da"), Ok("ta")]), &path)
            .await
            .unwrap();

        assert_eq!(bytes, 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
        assert_eq!(entries(dir.path()), vec!["vol.ar2v"]);
    }

    #[tokio::test]
    async fn test_write_stream_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.ar2v");

        let err = write_stream_atomically(
            chunks(vec![Ok("partial body"), Err("connection reset")]),
            &path,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("connection reset"));
        assert!(!path.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_write_stream_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.ar2v");
        std::fs::write(&path, b"old").unwrap();

        write_stream_atomically(chunks(vec![Ok("new")]), &path)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_failed_write_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.ar2v");
        std::fs::write(&path, b"old").unwrap();

        let result = write_stream_atomically(chunks(vec![Ok("ne"), Err("boom")]), &path).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        assert_eq!(entries(dir.path()), vec!["vol.ar2v"]);
    }

    #[tokio::test]
    async fn test_interleaved_writers_to_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.ar2v");

        let (tx_a, rx_a) = mpsc::unbounded::<Result<Bytes, &'static str>>();
        let (tx_b, rx_b) = mpsc::unbounded::<Result<Bytes, &'static str>>();
        let writer_a = tokio::spawn({
            let path = path.clone();
            async move { write_stream_atomically(rx_a, &path).await }
        });
        let writer_b = tokio::spawn({
            let path = path.clone();
            async move { write_stream_atomically(rx_b, &path).await }
        });
        let settle = || tokio::time::sleep(Duration::from_millis(20));

        tx_a.unbounded_send(Ok(Bytes::from_static(b"da"))).unwrap();
        settle().await;
        tx_b.unbounded_send(Ok(Bytes::from_static(b"xy"))).unwrap();
        settle().await;

        // Both writers hold their own partial file; nothing is visible yet.
        assert!(!path.exists());
        let pending = entries(dir.path());
        assert_eq!(pending.len(), 2, "{pending:?}");
        assert!(pending.iter().all(|n| is_partial_name(n)), "{pending:?}");

        tx_a.unbounded_send(Ok(Bytes::from_static(b"ta"))).unwrap();
        drop(tx_a);
        assert_eq!(writer_a.await.unwrap().unwrap(), 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"data");

        tx_b.unbounded_send(Ok(Bytes::from_static(b"zw"))).unwrap();
        drop(tx_b);
        assert_eq!(writer_b.await.unwrap().unwrap(), 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"xyzw");
        assert_eq!(entries(dir.path()), vec!["vol.ar2v"]);
    }

    #[tokio::test]
    async fn test_missing_destination() {
        let downloader = AtomicDownloader::new(Client::new());
        let err = downloader
            .download("http://127.0.0.1:9/file.ar2v", Path::new("/nonexistent/dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, RadarError::Destination(_)));
    }

    #[tokio::test]
    async fn test_destination_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, b"").unwrap();

        let downloader = AtomicDownloader::new(Client::new());
        let err = downloader
            .download("http://127.0.0.1:9/file.ar2v", &file)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DestinationError");
    }
}
