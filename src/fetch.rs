//! Downloading remote resources and unpacking them in place.
use crate::progress::{BarProgress, LogProgress, Progress, ProgressEvent};
use crate::{CachePolicy, DatasetError, Result};
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::Url;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use zip::result::ZipError;
use zip::ZipArchive;

const CHUNK_SIZE: usize = 64 * 1024;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Builds a [`Fetcher`].
pub struct FetcherBuilder {
    timeout: Option<Duration>,
    user_agent: String,
    progress: Arc<dyn Progress>,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FetcherBuilder {
    /// No timeout, progress reported through `log`.
    pub fn new() -> Self {
        Self {
            timeout: None,
            user_agent: USER_AGENT.to_string(),
            progress: Arc::new(LogProgress::default()),
        }
    }

    /// Gives up on a request that takes longer than `timeout` overall.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `true` draws a progress bar, `false` logs progress lines.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = if progress {
            Arc::new(BarProgress::default())
        } else {
            Arc::new(LogProgress::default())
        };
        self
    }

    /// Sends progress events to `progress`.
    pub fn with_reporter<P: Progress + 'static>(mut self, progress: P) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// The `User-Agent` header sent with every request.
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// Consumes the builder.
    pub fn build(self) -> Result<Fetcher> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()
            .map_err(|err| DatasetError::network("<client>", err))?;
        Ok(Fetcher {
            client,
            progress: self.progress,
        })
    }
}

/// What [`Fetcher::download_and_extract`] does with a downloaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Gzip,
    Plain,
}

impl ArchiveKind {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("zip") => ArchiveKind::Zip,
            Some(ext) if ext.eq_ignore_ascii_case("gz") => ArchiveKind::Gzip,
            _ => ArchiveKind::Plain,
        }
    }
}

/// Blocking HTTP client that downloads, extracts and reports progress.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    progress: Arc<dyn Progress>,
}

/// # Panics
///
/// When the http client cannot be built (no TLS backend available). Use [`Fetcher::new`]
/// to get the error instead.
impl Default for Fetcher {
    fn default() -> Self {
        Self::new().unwrap_or_else(|err| panic!("cannot build the http client: {err}"))
    }
}

impl Fetcher {
    /// A fetcher with the default settings.
    pub fn new() -> Result<Self> {
        FetcherBuilder::new().build()
    }

    /// Streams `url` into `destination`, overwriting it. Returns the number of bytes written.
    pub fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| DatasetError::network(url, err))?;
        let total = response.content_length();
        let mut file = File::create(destination).map_err(|source| DatasetError::Filesystem {
            path: destination.to_path_buf(),
            source,
        })?;
        self.progress.report(ProgressEvent::Started {
            resource: url,
            total,
        });

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded = 0u64;
        loop {
            let read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(DatasetError::network(url, err)),
            };
            file.write_all(&buffer[..read])
                .map_err(|err| DatasetError::io(destination, err))?;
            downloaded += read as u64;
            self.progress.report(ProgressEvent::Advanced {
                resource: url,
                downloaded,
                total,
            });
        }
        file.flush()
            .map_err(|err| DatasetError::io(destination, err))?;

        if let Some(total) = total {
            if downloaded < total {
                return Err(DatasetError::network(
                    url,
                    format!("connection closed after {downloaded} of {total} bytes"),
                ));
            }
        }
        self.progress.report(ProgressEvent::Finished {
            resource: url,
            downloaded,
        });
        Ok(downloaded)
    }

    /// Downloads `url` into `target` (created if needed) under the url's file name, then
    /// unpacks `.zip` archives into `target` and `.gz` streams next to themselves, deleting
    /// the archive. Other files are left as downloaded.
    ///
    /// Returns what was produced: `target` for a zip, the decompressed file for a gzip
    /// stream, the downloaded file otherwise.
    pub fn download_and_extract(&self, url: &str, target: &Path) -> Result<PathBuf> {
        fs::create_dir_all(target).map_err(|source| DatasetError::Filesystem {
            path: target.to_path_buf(),
            source,
        })?;
        let filename = file_name(url)?;
        let archive = target.join(&filename);

        log::info!("Downloading {filename} from: {url}");
        self.download(url, &archive)?;

        let produced = match ArchiveKind::of(&archive) {
            ArchiveKind::Zip => {
                log::info!("Extracting {} into {}", archive.display(), target.display());
                unzip(&archive, target)?;
                target.to_path_buf()
            }
            ArchiveKind::Gzip => {
                log::info!("Decompressing {}", archive.display());
                gunzip(&archive)?
            }
            ArchiveKind::Plain => return Ok(archive),
        };
        fs::remove_file(&archive).map_err(|err| DatasetError::io(&archive, err))?;
        Ok(produced)
    }

    /// Makes sure `root` holds a dataset, fetching every url in `urls` into it otherwise.
    ///
    /// `expected` lists the files a complete root contains; it only matters under
    /// [`CachePolicy::RequireFiles`]. Returns whether anything was downloaded.
    pub fn acquire(
        &self,
        root: &Path,
        urls: &[String],
        expected: &[PathBuf],
        policy: CachePolicy,
    ) -> Result<bool> {
        if is_acquired(root, expected, policy) {
            log::debug!("Using cached {}", root.display());
            return Ok(false);
        }
        if root.is_dir() {
            log::warn!(
                "{} is incomplete, downloading it again",
                root.display()
            );
        }
        for url in urls {
            self.download_and_extract(url, root)?;
        }
        Ok(true)
    }
}

/// Whether `root` counts as already downloaded under `policy`.
pub fn is_acquired(root: &Path, expected: &[PathBuf], policy: CachePolicy) -> bool {
    if !root.is_dir() {
        return false;
    }
    match policy {
        CachePolicy::DirectoryExists => true,
        CachePolicy::RequireFiles => expected.iter().all(|path| path.exists()),
    }
}

/// The last path segment of `url`.
fn file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|_| DatasetError::InvalidUrl(url.to_string()))?;
    parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DatasetError::InvalidUrl(url.to_string()))
}

fn unzip(archive: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|err| DatasetError::io(archive, err))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|err| zip_error(archive, target, err))?;
    zip.extract(target)
        .map_err(|err| zip_error(archive, target, err))
}

fn zip_error(archive: &Path, target: &Path, err: ZipError) -> DatasetError {
    match err {
        // Errors raised by the OS are about the target directory; everything else
        // (checksums, truncated or undecodable entries) is about the archive.
        ZipError::Io(source)
            if source.raw_os_error().is_some()
                || matches!(
                    source.kind(),
                    ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::AlreadyExists
                ) =>
        {
            DatasetError::Filesystem {
                path: target.to_path_buf(),
                source,
            }
        }
        other => DatasetError::Archive {
            path: archive.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

/// Decompresses `name.gz` to `name`, returns the decompressed path.
fn gunzip(archive: &Path) -> Result<PathBuf> {
    let output = archive.with_extension("");
    let file = File::open(archive).map_err(|err| DatasetError::io(archive, err))?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut out = File::create(&output).map_err(|source| DatasetError::Filesystem {
        path: output.clone(),
        source,
    })?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match decoder.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(DatasetError::Archive {
                    path: archive.to_path_buf(),
                    reason: err.to_string(),
                })
            }
        };
        out.write_all(&buffer[..read])
            .map_err(|err| DatasetError::io(&output, err))?;
    }
    out.flush().map_err(|err| DatasetError::io(&output, err))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Cursor;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    #[test]
    fn archive_kind_from_extension() {
        assert_eq!(ArchiveKind::of(Path::new("a/b.zip")), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::of(Path::new("a/b.ZIP")), ArchiveKind::Zip);
        assert_eq!(
            ArchiveKind::of(Path::new("train-labels-idx1-ubyte.gz")),
            ArchiveKind::Gzip
        );
        assert_eq!(ArchiveKind::of(Path::new("words.txt")), ArchiveKind::Plain);
        assert_eq!(ArchiveKind::of(Path::new("README")), ArchiveKind::Plain);
    }

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(
            file_name("http://cs231n.stanford.edu/tiny-imagenet-200.zip").unwrap(),
            "tiny-imagenet-200.zip"
        );
        assert_eq!(
            file_name("https://host/mnist/t10k-images-idx3-ubyte.gz?raw=1").unwrap(),
            "t10k-images-idx3-ubyte.gz"
        );
        assert!(matches!(
            file_name("https://host/"),
            Err(DatasetError::InvalidUrl(_))
        ));
        assert!(matches!(
            file_name("not a url"),
            Err(DatasetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn gunzip_strips_suffix_and_keeps_content() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("train-labels-idx1-ubyte.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0, 0, 8, 1, 0, 0, 0, 1, 7]).unwrap();
        fs::write(&archive, encoder.finish().unwrap()).unwrap();

        let output = gunzip(&archive).unwrap();
        assert_eq!(output, dir.path().join("train-labels-idx1-ubyte"));
        assert_eq!(fs::read(output).unwrap(), vec![0, 0, 8, 1, 0, 0, 0, 1, 7]);
    }

    #[test]
    fn corrupt_gzip_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.gz");
        fs::write(&archive, b"this is not gzip at all").unwrap();
        assert!(matches!(
            gunzip(&archive),
            Err(DatasetError::Archive { .. })
        ));
    }

    #[test]
    fn unzip_preserves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("set.zip");
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("set/train/", FileOptions::default()).unwrap();
        writer.start_file("set/wnids.txt", FileOptions::default()).unwrap();
        writer.write_all(b"n01\n").unwrap();
        writer.start_file("set/train/a.txt", FileOptions::default()).unwrap();
        writer.write_all(b"a").unwrap();
        fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();

        let target = dir.path().join("out");
        fs::create_dir(&target).unwrap();
        unzip(&archive, &target).unwrap();
        assert_eq!(fs::read(target.join("set/wnids.txt")).unwrap(), b"n01\n");
        assert_eq!(fs::read(target.join("set/train/a.txt")).unwrap(), b"a");
    }

    #[test]
    fn corrupt_zip_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"PK but not really").unwrap();
        assert!(matches!(
            unzip(&archive, dir.path()),
            Err(DatasetError::Archive { .. })
        ));
    }

    #[test]
    fn zip_checksum_mismatch_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("set.zip");
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("set/wnids.txt", stored).unwrap();
        writer.write_all(b"n01\n").unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();
        let at = bytes.windows(4).position(|w| w == b"n01\n").unwrap();
        bytes[at] = b'X';
        fs::write(&archive, bytes).unwrap();

        let target = dir.path().join("out");
        fs::create_dir(&target).unwrap();
        let err = unzip(&archive, &target).unwrap_err();
        assert!(matches!(err, DatasetError::Archive { .. }), "{err}");
    }

    #[test]
    fn os_errors_while_unzipping_are_filesystem_errors() {
        let err = zip_error(
            Path::new("set.zip"),
            Path::new("out"),
            ZipError::Io(std::io::Error::from(ErrorKind::PermissionDenied)),
        );
        assert!(matches!(err, DatasetError::Filesystem { .. }));
        let err = zip_error(
            Path::new("set.zip"),
            Path::new("out"),
            ZipError::Io(std::io::Error::new(ErrorKind::Other, "Invalid checksum")),
        );
        assert!(matches!(err, DatasetError::Archive { .. }));
    }

    #[test]
    fn default_fetcher_builds() {
        let fetcher = Fetcher::default();
        assert!(fetcher.clone().client.get("http://127.0.0.1/").build().is_ok());
    }

    #[test]
    fn cache_policies() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("MNIST");
        let expected = vec![root.join("train-labels-idx1-ubyte")];
        assert!(!is_acquired(&root, &expected, CachePolicy::DirectoryExists));

        fs::create_dir(&root).unwrap();
        assert!(is_acquired(&root, &expected, CachePolicy::DirectoryExists));
        assert!(!is_acquired(&root, &expected, CachePolicy::RequireFiles));

        fs::write(&expected[0], b"").unwrap();
        assert!(is_acquired(&root, &expected, CachePolicy::RequireFiles));
    }

    #[test]
    fn existing_root_skips_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FetcherBuilder::new()
            .with_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        // Nothing listens on this port; any request would fail.
        let urls = vec!["http://127.0.0.1:9/never.zip".to_string()];
        let fetched = fetcher
            .acquire(dir.path(), &urls, &[], CachePolicy::DirectoryExists)
            .unwrap();
        assert!(!fetched);
    }

    #[test]
    fn unreachable_host_is_a_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FetcherBuilder::new()
            .with_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let err = fetcher
            .download("http://127.0.0.1:9/never.zip", &dir.path().join("never.zip"))
            .unwrap_err();
        assert!(matches!(err, DatasetError::Network { .. }));
    }
}
