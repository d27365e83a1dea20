//! The [MNIST](http://yann.lecun.com/exdb/mnist/) handwritten digits.
//!
//! The four files use the IDX format, every header field a big-endian 32 bit integer:
//!
//! - images: `magic | count | rows | cols | count * rows * cols pixels (u8)`
//! - labels: `magic | count | labels (u8)`
//!
//! The test files serve as the validation split.
use crate::{Dataset, DatasetConfig, DatasetError, DescriptionMap, ExampleSet, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Remote gzip files, in download order. The original host refuses most automated
/// downloads, so the PyTorch mirror is used.
pub const RESOURCE_URLS: [(&str, &str); 4] = [
    (
        "train-images",
        "https://ossci-datasets.s3.amazonaws.com/mnist/train-images-idx3-ubyte.gz",
    ),
    (
        "train-labels",
        "https://ossci-datasets.s3.amazonaws.com/mnist/train-labels-idx1-ubyte.gz",
    ),
    (
        "test-images",
        "https://ossci-datasets.s3.amazonaws.com/mnist/t10k-images-idx3-ubyte.gz",
    ),
    (
        "test-labels",
        "https://ossci-datasets.s3.amazonaws.com/mnist/t10k-labels-idx1-ubyte.gz",
    ),
];

const FOLDER: &str = "MNIST";

/// Canonical magic number of an image file. Other values are accepted.
pub const IMAGES_MAGIC: u32 = 2051;
/// Canonical magic number of a label file. Other values are accepted.
pub const LABELS_MAGIC: u32 = 2049;

const DIGIT_NAMES: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// One grayscale image, pixels stored row major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    rows: usize,
    cols: usize,
    pixels: Vec<u8>,
}

impl Image {
    /// Number of pixel rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of pixel columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// All `rows * cols` intensities, row after row.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Intensity at (`row`, `col`).
    pub fn pixel(&self, row: usize, col: usize) -> Option<u8> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.pixels.get(row * self.cols + col).copied()
    }

    /// Takes the pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// Error decoding an IDX stream.
#[derive(Debug, Error)]
pub enum IdxError {
    /// The stream ended before the header was complete.
    #[error("stream ended inside the {0} header")]
    TruncatedHeader(&'static str),

    /// The pixel payload cannot be reshaped into the announced images.
    #[error("{count} images of {rows}x{cols} pixels need {expected:?} bytes, found {found}")]
    ShapeMismatch {
        /// Announced number of images.
        count: usize,
        /// Announced rows.
        rows: usize,
        /// Announced columns.
        cols: usize,
        /// `count * rows * cols`, `None` when it overflows.
        expected: Option<usize>,
        /// Bytes after the header.
        found: usize,
    },

    /// The header announces images without a single pixel.
    #[error("{count} images of {rows}x{cols} pixels hold no data")]
    EmptyImages {
        /// Announced number of images.
        count: usize,
        /// Announced rows.
        rows: usize,
        /// Announced columns.
        cols: usize,
    },

    /// Reading the stream failed.
    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

fn read_header<R: Read, const N: usize>(
    reader: &mut R,
    kind: &'static str,
) -> std::result::Result<[u32; N], IdxError> {
    let mut fields = [0u32; N];
    for field in fields.iter_mut() {
        let mut bytes = [0u8; 4];
        reader.read_exact(&mut bytes).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => IdxError::TruncatedHeader(kind),
            _ => IdxError::Io(err),
        })?;
        *field = u32::from_be_bytes(bytes);
    }
    Ok(fields)
}

/// Decodes an IDX image stream into `count` images of `rows x cols` pixels.
pub fn decode_images<R: Read>(mut reader: R) -> std::result::Result<Vec<Image>, IdxError> {
    let [magic, count, rows, cols] = read_header::<_, 4>(&mut reader, "images")?;
    if magic != IMAGES_MAGIC {
        log::debug!("images stream has magic {magic}, expected {IMAGES_MAGIC}");
    }
    let (count, rows, cols) = (count as usize, rows as usize, cols as usize);

    let mut payload = Vec::new();
    reader.read_to_end(&mut payload)?;

    let size = rows.checked_mul(cols);
    let expected = size.and_then(|size| size.checked_mul(count));
    if expected != Some(payload.len()) {
        return Err(IdxError::ShapeMismatch {
            count,
            rows,
            cols,
            expected,
            found: payload.len(),
        });
    }
    let size = size.unwrap_or_default();
    if size == 0 {
        if count == 0 {
            return Ok(Vec::new());
        }
        return Err(IdxError::EmptyImages { count, rows, cols });
    }
    Ok(payload
        .chunks_exact(size)
        .map(|pixels| Image {
            rows,
            cols,
            pixels: pixels.to_vec(),
        })
        .collect())
}

/// Decodes an IDX label stream. Every byte after the header is a label, whatever the
/// header count says.
pub fn decode_labels<R: Read>(mut reader: R) -> std::result::Result<Vec<u8>, IdxError> {
    let [magic, count] = read_header::<_, 2>(&mut reader, "labels")?;
    if magic != LABELS_MAGIC {
        log::debug!("labels stream has magic {magic}, expected {LABELS_MAGIC}");
    }
    let mut labels = Vec::new();
    reader.read_to_end(&mut labels)?;
    if labels.len() != count as usize {
        log::warn!("labels header announces {count} labels, stream holds {}", labels.len());
    }
    Ok(labels)
}

/// MNIST, downloaded on construction if missing.
#[derive(Debug, Clone)]
pub struct Mnist {
    base_folder: PathBuf,
    train_images: PathBuf,
    train_labels: PathBuf,
    val_images: PathBuf,
    val_labels: PathBuf,
}

impl Mnist {
    /// Opens the dataset below `data_root`, downloading it when `data_root/MNIST` does not
    /// exist.
    pub fn new<P: AsRef<Path>>(data_root: P) -> Result<Self> {
        Self::with_config(&DatasetConfig::new(data_root))
    }

    /// Opens the dataset below `config.data_root`, downloading it as `config` says.
    pub fn with_config(config: &DatasetConfig) -> Result<Self> {
        let base_folder = config.data_root.join(FOLDER);
        let dataset = Self {
            train_images: base_folder.join("train-images-idx3-ubyte"),
            train_labels: base_folder.join("train-labels-idx1-ubyte"),
            val_images: base_folder.join("t10k-images-idx3-ubyte"),
            val_labels: base_folder.join("t10k-labels-idx1-ubyte"),
            base_folder,
        };
        let urls: Vec<String> = RESOURCE_URLS
            .iter()
            .map(|(_, url)| config.resolve(url))
            .collect();
        let expected = vec![
            dataset.train_images.clone(),
            dataset.train_labels.clone(),
            dataset.val_images.clone(),
            dataset.val_labels.clone(),
        ];
        config
            .fetcher
            .acquire(&dataset.base_folder, &urls, &expected, config.cache_policy)?;
        Ok(dataset)
    }

    /// The folder this dataset was downloaded to.
    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }

    fn load(&self, images: &Path, labels: &Path) -> Result<ExampleSet<Image, u8>> {
        let images = decode_file(images, decode_images)?;
        let labels = decode_file(labels, decode_labels)?;
        ExampleSet::from_parts(images, labels)
    }
}

fn decode_file<T, F>(path: &Path, decode: F) -> Result<T>
where
    F: FnOnce(BufReader<File>) -> std::result::Result<T, IdxError>,
{
    let file = File::open(path).map_err(|err| DatasetError::io(path, err))?;
    decode(BufReader::new(file)).map_err(|err| match err {
        IdxError::Io(source) => DatasetError::io(path, source),
        other => DatasetError::Parse {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })
}

impl Dataset for Mnist {
    type Sample = Image;
    type Label = u8;

    fn description_map(&self) -> Result<DescriptionMap> {
        Ok(DIGIT_NAMES
            .iter()
            .enumerate()
            .map(|(digit, name)| (digit.to_string(), Some(name.to_string())))
            .collect())
    }

    fn train_dataset(&self) -> Result<ExampleSet<Image, u8>> {
        self.load(&self.train_images, &self.train_labels)
    }

    fn val_dataset(&self) -> Result<ExampleSet<Image, u8>> {
        self.load(&self.val_images, &self.val_labels)
    }
}
