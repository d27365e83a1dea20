#![deny(missing_docs)]
//! This crate gives uniform access to small public image classification datasets
//! ([tiny-imagenet](http://cs231n.stanford.edu/tiny-imagenet-200.zip) and
//! [MNIST](http://yann.lecun.com/exdb/mnist/)).
//!
//! Every dataset implements [`Dataset`]: a label to description mapping plus a train
//! and a validation split, each returned as an [`ExampleSet`] of index-aligned samples
//! and labels. Data is downloaded and extracted on first construction and reused from
//! the local data root afterwards.
//!
//! ```no_run
//! use dataset_collection::{Dataset, DatasetConfig, Mnist};
//!
//! let mnist = Mnist::with_config(&DatasetConfig::from_env()).unwrap();
//! let train = mnist.train_dataset().unwrap();
//! println!("{} training digits", train.len());
//! ```
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod fetch;
pub mod mnist;
pub mod progress;
pub mod template;
pub mod tiny_imagenet;

pub use fetch::{Fetcher, FetcherBuilder};
pub use mnist::{Image, Mnist};
pub use progress::{BarProgress, LogProgress, NoProgress, Progress, ProgressEvent};
pub use template::PathTemplate;
pub use tiny_imagenet::TinyImageNet;

/// Label identifier to human readable description.
///
/// A `None` description means the label is part of the dataset but the description
/// table has no row for it.
pub type DescriptionMap = BTreeMap<String, Option<String>>;

/// The contract every dataset adapter implements.
pub trait Dataset {
    /// What one example is (a file uri, a decoded image...)
    type Sample;

    /// The label attached to one example.
    type Label;

    /// Returns the label to description mapping, restricted to the labels of this dataset.
    fn description_map(&self) -> Result<DescriptionMap>;

    /// Returns the training split.
    fn train_dataset(&self) -> Result<ExampleSet<Self::Sample, Self::Label>>;

    /// Returns the validation split.
    fn val_dataset(&self) -> Result<ExampleSet<Self::Sample, Self::Label>>;
}

/// Samples and labels kept as two index-aligned sequences.
///
/// `samples()[i]` is labelled by `labels()[i]`; the container refuses to be built from
/// sequences of different lengths so the pairing can never drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleSet<S, L> {
    samples: Vec<S>,
    labels: Vec<L>,
}

impl<S, L> Default for ExampleSet<S, L> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl<S, L> ExampleSet<S, L> {
    /// An empty set with room for `capacity` pairs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
        }
    }

    /// Pairs up two sequences. Fails with [`DatasetError::Consistency`] when their
    /// lengths differ.
    pub fn from_parts(samples: Vec<S>, labels: Vec<L>) -> Result<Self> {
        if samples.len() != labels.len() {
            return Err(DatasetError::Consistency {
                samples: samples.len(),
                labels: labels.len(),
            });
        }
        Ok(Self { samples, labels })
    }

    /// Appends one pair.
    pub fn push(&mut self, sample: S, label: L) {
        self.samples.push(sample);
        self.labels.push(label);
    }

    /// The number of pairs.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the set holds no pair.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the pair at `index`, `None` if and only if `index >= self.len()`.
    pub fn get(&self, index: usize) -> Option<(&S, &L)> {
        Some((self.samples.get(index)?, self.labels.get(index)?))
    }

    /// All samples, in order.
    pub fn samples(&self) -> &[S] {
        &self.samples
    }

    /// All labels, in order.
    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    /// Iterate over the pairs in order.
    pub fn iter(&self) -> ExampleIterator<'_, S, L> {
        ExampleIterator {
            set: self,
            index: 0,
        }
    }

    /// Splits the set back into its two sequences.
    pub fn into_parts(self) -> (Vec<S>, Vec<L>) {
        (self.samples, self.labels)
    }
}

/// Iterates over the pairs of an [`ExampleSet`].
pub struct ExampleIterator<'a, S, L> {
    set: &'a ExampleSet<S, L>,
    index: usize,
}

impl<'a, S, L> Iterator for ExampleIterator<'a, S, L> {
    type Item = (&'a S, &'a L);

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.set.get(self.index);
        self.index += 1;
        pair
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.set.len().saturating_sub(self.index);
        (left, Some(left))
    }
}

impl<'a, S, L> IntoIterator for &'a ExampleSet<S, L> {
    type Item = (&'a S, &'a L);
    type IntoIter = ExampleIterator<'a, S, L>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Result type for dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

/// Error type for datasets
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The remote resource could not be reached or the transfer was interrupted.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The resource being fetched.
        url: String,
        /// What the transport reported.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The url has no final path segment to name the local file after.
    #[error("invalid url {0}: no file name to download to")]
    InvalidUrl(String),

    /// The file claims to be an archive but cannot be read as one.
    #[error("archive error in {}: {reason}", path.display())]
    Archive {
        /// The archive on disk.
        path: PathBuf,
        /// What the decoder reported.
        reason: String,
    },

    /// A local path could not be created, read or written.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An expected local file is absent.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Malformed content: wrong column count, undecodable bytes, truncated binary stream.
    #[error("parse error in {}: {reason}", path.display())]
    Parse {
        /// The file being parsed.
        path: PathBuf,
        /// Where and why parsing failed.
        reason: String,
    },

    /// Two sequences that must be index-aligned have different lengths.
    #[error("inconsistent dataset: {samples} samples vs {labels} labels")]
    Consistency {
        /// Number of samples.
        samples: usize,
        /// Number of labels.
        labels: usize,
    },

    /// A path template could not be turned into a glob pattern.
    #[error("pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl DatasetError {
    /// Wraps an I/O error on `path`, singling out missing files.
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            DatasetError::NotFound(path.to_path_buf())
        } else {
            DatasetError::Filesystem {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub(crate) fn network<E>(url: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        DatasetError::Network {
            url: url.to_string(),
            source: source.into(),
        }
    }
}

/// When is a local dataset root considered already acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// The root directory exists, whatever it contains. A download that failed halfway
    /// leaves a root behind that is never fetched again.
    #[default]
    DirectoryExists,
    /// The root directory exists and holds every file the dataset needs; a partial root
    /// is fetched again in place.
    RequireFiles,
}

/// Folder created under the home directory when no data root is given.
pub const DEFAULT_DATA_DIR: &str = "dataset_collection_data";

const DATA_ENV: &str = "DATASET_COLLECTION_DATA";
const MIRROR_ENV: &str = "DATASET_COLLECTION_MIRROR";
const TIMEOUT_ENV: &str = "DATASET_COLLECTION_TIMEOUT_SECS";

/// Where datasets live and how they are fetched.
#[derive(Clone)]
pub struct DatasetConfig {
    /// Base folder, each dataset keeps its own sub folder in it.
    pub data_root: PathBuf,
    /// When to skip acquisition.
    pub cache_policy: CachePolicy,
    /// Replaces the base url of every remote resource, the file names are kept.
    pub mirror: Option<String>,
    /// The client used when data has to be downloaded.
    pub fetcher: Fetcher,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            cache_policy: CachePolicy::default(),
            mirror: None,
            fetcher: Fetcher::default(),
        }
    }
}

impl DatasetConfig {
    /// Configuration rooted at `data_root`, everything else default.
    pub fn new<P: AsRef<Path>>(data_root: P) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Reads `DATASET_COLLECTION_DATA`, `DATASET_COLLECTION_MIRROR` and
    /// `DATASET_COLLECTION_TIMEOUT_SECS`, falling back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = std::env::var_os(DATA_ENV) {
            config.data_root = PathBuf::from(root);
        }
        config.mirror = std::env::var(MIRROR_ENV).ok().filter(|m| !m.is_empty());
        match std::env::var(TIMEOUT_ENV).map(|secs| secs.parse::<u64>()) {
            Ok(Ok(secs)) => {
                match FetcherBuilder::new()
                    .with_timeout(Duration::from_secs(secs))
                    .build()
                {
                    Ok(fetcher) => config.fetcher = fetcher,
                    Err(err) => log::warn!("Ignoring {TIMEOUT_ENV}: {err}"),
                }
            }
            Ok(Err(err)) => log::warn!("Ignoring {TIMEOUT_ENV}: {err}"),
            Err(_) => {}
        }
        config
    }

    /// Sets the cache policy.
    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Sets the mirror base url.
    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirror = Some(mirror.into());
        self
    }

    /// Sets the fetcher.
    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// The url to fetch `default_url` from, honouring the mirror.
    pub(crate) fn resolve(&self, default_url: &str) -> String {
        match &self.mirror {
            Some(mirror) => {
                let filename = default_url.rsplit('/').next().unwrap_or(default_url);
                format!("{}/{filename}", mirror.trim_end_matches('/'))
            }
            None => default_url.to_string(),
        }
    }
}

/// `<home>/dataset_collection_data`, or a relative `dataset_collection_data` when no
/// home directory is known.
pub fn default_data_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_DATA_DIR))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_set_rejects_mismatched_lengths() {
        let err = ExampleSet::from_parts(vec!["a", "b"], vec![1]).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Consistency {
                samples: 2,
                labels: 1
            }
        ));
    }

    #[test]
    fn example_set_iterates_in_order() {
        let mut set = ExampleSet::with_capacity(2);
        set.push("x", 1);
        set.push("y", 2);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1), Some((&"y", &2)));
        assert_eq!(set.get(2), None);
        let pairs: Vec<_> = set.iter().collect();
        assert_eq!(pairs, vec![(&"x", &1), (&"y", &2)]);
        assert_eq!(set.iter().size_hint(), (2, Some(2)));
        let (samples, labels) = set.into_parts();
        assert_eq!(samples, vec!["x", "y"]);
        assert_eq!(labels, vec![1, 2]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = DatasetError::io(
            Path::new("nowhere"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, DatasetError::NotFound(_)));
        let err = DatasetError::io(
            Path::new("nowhere"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, DatasetError::Filesystem { .. }));
    }

    #[test]
    fn mirror_keeps_file_name() {
        let config = DatasetConfig::new("data").with_mirror("http://localhost:8000/mnist/");
        assert_eq!(
            config.resolve("https://example.com/exdb/mnist/train-labels-idx1-ubyte.gz"),
            "http://localhost:8000/mnist/train-labels-idx1-ubyte.gz"
        );
        let config = DatasetConfig::new("data");
        assert_eq!(
            config.resolve("https://example.com/a.zip"),
            "https://example.com/a.zip"
        );
    }
}
