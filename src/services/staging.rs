use crate::config::RelayConfig;
use crate::utils::validation::{is_pdf_content_type, sanitize_filename};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Copy buffer used while streaming an upload to disk
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Attempts at drawing a fresh name when a generated one already exists
const MAX_NAME_ATTEMPTS: usize = 5;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Only PDF files are accepted (received '{0}')")]
    UnsupportedMediaType(String),

    #[error("File exceeds the maximum allowed size of {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: u64 },

    #[error("Upload stream interrupted: {0}")]
    Interrupted(#[source] std::io::Error),

    #[error("Staging I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// A file written to the staging directory, waiting to be relayed
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub generated_name: String,
    pub original_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingUsage {
    pub files_waiting: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Local directory holding uploads between receipt and relay.
///
/// Writers never coordinate: every file gets a unique name and is opened with
/// create-new semantics. Deletion is idempotent because request cleanup and
/// the sweeper may race for the same file.
pub struct StagingStore {
    dir: PathBuf,
    max_file_size: u64,
}

impl StagingStore {
    pub fn new(dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_size,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.upload_dir.clone(), config.max_file_size)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Creates the staging directory if it does not exist yet
    pub async fn init(&self) -> Result<(), StagingError> {
        fs::create_dir_all(&self.dir).await?;
        tracing::info!("📂 Staging directory ready at {}", self.dir.display());
        Ok(())
    }

    /// Streams an upload to disk and returns its staged metadata.
    ///
    /// The content type is checked before anything touches the disk. The size
    /// limit is enforced while copying; an oversized or interrupted upload
    /// leaves no file behind.
    pub async fn accept<R>(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        mut reader: R,
    ) -> Result<StagedFile, StagingError>
    where
        R: AsyncRead + Unpin,
    {
        let declared = content_type.unwrap_or_default();
        if !is_pdf_content_type(declared) {
            let shown = if declared.is_empty() { "unknown" } else { declared };
            return Err(StagingError::UnsupportedMediaType(shown.to_string()));
        }

        let sanitized = sanitize_filename(original_name);
        let (generated_name, path, mut file) = self.create_unique(&sanitized).await?;
        let guard = PartialFileGuard::new(path.clone());

        let copied = self.copy_limited(&mut reader, &mut file).await;
        drop(file);
        let size_bytes = copied?;
        guard.disarm();

        tracing::debug!(
            "Staged {} as {} ({} bytes)",
            original_name,
            generated_name,
            size_bytes
        );

        Ok(StagedFile {
            generated_name,
            original_name: original_name.to_string(),
            path,
            size_bytes,
            created_at: Utc::now(),
        })
    }

    async fn create_unique(&self, sanitized: &str) -> Result<(String, PathBuf, File), StagingError> {
        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = generate_staged_name(sanitized);
            let path = self.dir.join(&name);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((name, path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!("Staged name collision on {}, retrying", name);
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .unwrap_or_else(|| std::io::Error::new(ErrorKind::AlreadyExists, "name collision"))
            .into())
    }

    async fn copy_limited<R>(&self, reader: &mut R, file: &mut File) -> Result<u64, StagingError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(StagingError::Interrupted)?;
            if n == 0 {
                break;
            }

            written += n as u64;
            if written > self.max_file_size {
                return Err(StagingError::PayloadTooLarge {
                    limit_bytes: self.max_file_size,
                });
            }
            file.write_all(&buffer[..n]).await?;
        }

        file.flush().await?;
        Ok(written)
    }

    /// Deletes a staged file. Returns `false` when it was already gone.
    pub async fn remove(&self, path: &Path) -> Result<bool, StagingError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal: failures are logged, never returned
    pub async fn discard(&self, file: &StagedFile) {
        match self.remove(&file.path).await {
            Ok(true) => tracing::debug!("🗑️  Removed staged file {}", file.generated_name),
            Ok(false) => tracing::debug!("Staged file {} already removed", file.generated_name),
            Err(e) => tracing::warn!(
                "Failed to remove staged file {}: {}",
                file.generated_name,
                e
            ),
        }
    }

    pub async fn discard_all(&self, files: &[StagedFile]) {
        for file in files {
            self.discard(file).await;
        }
    }

    /// Lists staged files, oldest first. Unreadable entries are skipped.
    pub async fn list(&self) -> Result<Vec<StagedFile>, StagingError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Skipping unreadable staged entry {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let generated_name = entry.file_name().to_string_lossy().into_owned();
            let created_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            files.push(StagedFile {
                original_name: original_name_of(&generated_name).to_string(),
                path: entry.path(),
                size_bytes: metadata.len(),
                created_at,
                generated_name,
            });
        }

        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.generated_name.cmp(&b.generated_name))
        });
        Ok(files)
    }

    pub async fn usage(&self) -> Result<StagingUsage, StagingError> {
        let files = self.list().await?;
        Ok(StagingUsage {
            files_waiting: files.len(),
            total_bytes: files.iter().map(|f| f.size_bytes).sum(),
        })
    }

    /// Removes every entry whose modification time is older than `max_age`.
    /// Per-entry failures are logged and counted; they never stop the sweep.
    pub async fn sweep(&self, max_age: Duration) -> Result<SweepReport, StagingError> {
        let mut report = SweepReport::default();
        let mut entries = fs::read_dir(&self.dir).await?;
        let now = SystemTime::now();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Sweep stopped reading staging directory: {}", e);
                    report.failed += 1;
                    break;
                }
            };

            let path = entry.path();
            let modified = match entry.metadata().await {
                Ok(metadata) if !metadata.is_file() => continue,
                Ok(metadata) => metadata.modified(),
                Err(e) => Err(e),
            };
            report.scanned += 1;

            let modified = match modified {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!("Sweep could not stat {:?}: {}", path, e);
                    report.failed += 1;
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match self.remove(&path).await {
                Ok(true) => {
                    tracing::info!("🧹 Evicted stale staged file {:?} (age {:?})", path, age);
                    report.removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Sweep could not delete {:?}: {}", path, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// `<unix-millis>-<9 digit token>-<sanitized name>`
fn generate_staged_name(sanitized: &str) -> String {
    let token: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{}-{:09}-{}", Utc::now().timestamp_millis(), token, sanitized)
}

/// Recovers the sanitized original name from a generated one
fn original_name_of(generated_name: &str) -> &str {
    generated_name
        .splitn(3, '-')
        .nth(2)
        .unwrap_or(generated_name)
}

/// Removes a partially written file unless disarmed, including when the
/// owning future is dropped because the client went away.
struct PartialFileGuard {
    path: Option<PathBuf>,
}

impl PartialFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Discarded partial upload {:?}", path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to discard partial upload {:?}: {}", path, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    const PDF_BYTES: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

    fn store(dir: &Path) -> StagingStore {
        StagingStore::new(dir, 1024)
    }

    fn backdate(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    fn dir_len(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_accept_writes_full_file() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(tmp.path());

        let staged = staging
            .accept("Mi Factura.pdf", Some("application/pdf"), PDF_BYTES)
            .await
            .unwrap();

        assert_eq!(staged.original_name, "Mi Factura.pdf");
        assert!(staged.generated_name.ends_with("-Mi_Factura.pdf"));
        assert_eq!(staged.size_bytes, PDF_BYTES.len() as u64);
        assert_eq!(std::fs::read(&staged.path).unwrap(), PDF_BYTES);
        assert_eq!(staged.path.parent().unwrap(), tmp.path());
    }

    #[tokio::test]
    async fn test_accept_rejects_non_pdf_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(tmp.path());

        let err = staging
            .accept("notes.txt", Some("text/plain"), &b"hello"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::UnsupportedMediaType(_)));

        let err = staging.accept("blob", None, &b"hello"[..]).await.unwrap_err();
        assert!(matches!(err, StagingError::UnsupportedMediaType(ref ct) if ct == "unknown"));

        assert_eq!(dir_len(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_accept_enforces_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(tmp.path());
        let oversized = vec![b'x'; 1025];

        let err = staging
            .accept("big.pdf", Some("application/pdf"), oversized.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::PayloadTooLarge { limit_bytes: 1024 }));
        assert_eq!(dir_len(tmp.path()), 0);

        let exact = vec![b'x'; 1024];
        staging
            .accept("exact.pdf", Some("application/pdf"), exact.as_slice())
            .await
            .unwrap();
        assert_eq!(dir_len(tmp.path()), 1);
    }

    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.sent {
                std::task::Poll::Ready(Err(std::io::Error::new(
                    ErrorKind::ConnectionReset,
                    "client went away",
                )))
            } else {
                self.sent = true;
                buf.put_slice(b"%PDF-1.4 partial");
                std::task::Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn test_interrupted_upload_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(tmp.path());

        let err = staging
            .accept("cut.pdf", Some("application/pdf"), FailingReader { sent: false })
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Interrupted(_)));
        assert_eq!(dir_len(tmp.path()), 0);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_get_unique_names() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = Arc::new(store(tmp.path()));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let staging = staging.clone();
            handles.push(tokio::spawn(async move {
                staging
                    .accept("same.pdf", Some("application/pdf"), PDF_BYTES)
                    .await
                    .unwrap()
            }));
        }

        let mut names = HashSet::new();
        for handle in handles {
            names.insert(handle.await.unwrap().generated_name);
        }
        assert_eq!(names.len(), 32);
        assert_eq!(dir_len(tmp.path()), 32);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(tmp.path());
        let first = staging
            .accept("a.pdf", Some("application/pdf"), PDF_BYTES)
            .await
            .unwrap();
        let second = staging
            .accept("b.pdf", Some("application/pdf"), PDF_BYTES)
            .await
            .unwrap();

        assert!(staging.remove(&first.path).await.unwrap());
        assert!(!staging.remove(&first.path).await.unwrap());
        staging.discard(&first).await;

        assert!(second.path.exists());
        assert_eq!(dir_len(tmp.path()), 1);
    }

    #[tokio::test]
    async fn test_list_and_usage() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(tmp.path());
        let older = staging
            .accept("older.pdf", Some("application/pdf"), PDF_BYTES)
            .await
            .unwrap();
        backdate(&older.path, Duration::from_secs(60));
        staging
            .accept("newer.pdf", Some("application/pdf"), &b"%PDF"[..])
            .await
            .unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();

        let files = staging.list().await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].original_name, "older.pdf");
        assert_eq!(files[1].original_name, "newer.pdf");

        let usage = staging.usage().await.unwrap();
        assert_eq!(usage.files_waiting, 2);
        assert_eq!(usage.total_bytes, PDF_BYTES.len() as u64 + 4);
    }

    #[tokio::test]
    async fn test_list_fails_when_directory_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(&tmp.path().join("missing"));
        assert!(matches!(staging.list().await, Err(StagingError::Io(_))));
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = store(tmp.path());
        let ttl = Duration::from_secs(30 * 60);

        let stale = staging
            .accept("stale.pdf", Some("application/pdf"), PDF_BYTES)
            .await
            .unwrap();
        backdate(&stale.path, ttl + Duration::from_secs(60));
        let fresh = staging
            .accept("fresh.pdf", Some("application/pdf"), PDF_BYTES)
            .await
            .unwrap();
        backdate(&fresh.path, ttl - Duration::from_secs(60));

        let report = staging.sweep(ttl).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 2,
                removed: 1,
                failed: 0
            }
        );
        assert!(!stale.path.exists());
        assert!(fresh.path.exists());

        // Handler cleanup after the sweeper already evicted the file
        staging.discard(&stale).await;
        assert!(!staging.remove(&stale.path).await.unwrap());
    }

    #[tokio::test]
    async fn test_init_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("uploads");
        let staging = store(&dir);
        staging.init().await.unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_original_name_of() {
        assert_eq!(original_name_of("1700000000000-000000042-my-doc.pdf"), "my-doc.pdf");
        assert_eq!(original_name_of("stray.pdf"), "stray.pdf");
    }
}
