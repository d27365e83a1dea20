//! The [tiny-imagenet](http://cs231n.stanford.edu/tiny-imagenet-200.zip) dataset:
//! 200 ImageNet classes, one folder of JPEG files per class for training and a flat
//! folder of validation images labelled by an annotation table.
//!
//! Samples are file uris, the images themselves are not decoded.
use crate::template::{to_uri, PathTemplate};
use crate::{Dataset, DatasetConfig, DatasetError, DescriptionMap, ExampleSet, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

/// Where the archive is downloaded from.
pub const RESOURCE_URL: &str = "http://cs231n.stanford.edu/tiny-imagenet-200.zip";

/// Name of the dataset folder, both under the data root and inside the archive.
const FOLDER: &str = "tiny-imagenet-200";

/// Tiny-imagenet, downloaded on construction if missing.
#[derive(Debug, Clone)]
pub struct TinyImageNet {
    base_folder: PathBuf,
    data_folder: PathBuf,
    /// Full ImageNet vocabulary: `label \t description`.
    labels_description_file: PathBuf,
    /// The labels used by this dataset, one per line.
    labels_list_file: PathBuf,
    /// `filename \t label \t x0 \t y0 \t x1 \t y1`
    val_annotations_file: PathBuf,
    train_images: PathTemplate,
    val_images: PathTemplate,
}

impl TinyImageNet {
    /// Opens the dataset below `data_root`, downloading it when `data_root/tiny-imagenet-200`
    /// does not exist.
    pub fn new<P: AsRef<Path>>(data_root: P) -> Result<Self> {
        Self::with_config(&DatasetConfig::new(data_root))
    }

    /// Opens the dataset below `config.data_root`, downloading it as `config` says.
    pub fn with_config(config: &DatasetConfig) -> Result<Self> {
        let dataset = Self::layout(&config.data_root);
        config.fetcher.acquire(
            &dataset.base_folder,
            &[config.resolve(RESOURCE_URL)],
            &dataset.expected_files(),
            config.cache_policy,
        )?;
        Ok(dataset)
    }

    fn layout(data_root: &Path) -> Self {
        let base_folder = data_root.join(FOLDER);
        // The archive holds a top level `tiny-imagenet-200` folder of its own.
        let data_folder = base_folder.join(FOLDER);
        Self {
            labels_description_file: data_folder.join("words.txt"),
            labels_list_file: data_folder.join("wnids.txt"),
            val_annotations_file: data_folder.join("val").join("val_annotations.txt"),
            train_images: PathTemplate::new()
                .literal("train")
                .label()
                .literal("images")
                .any(),
            val_images: PathTemplate::new().literal("val").literal("images").any(),
            base_folder,
            data_folder,
        }
    }

    fn expected_files(&self) -> Vec<PathBuf> {
        vec![
            self.labels_description_file.clone(),
            self.labels_list_file.clone(),
            self.val_annotations_file.clone(),
        ]
    }

    /// The folder this dataset was downloaded to.
    pub fn base_folder(&self) -> &Path {
        &self.base_folder
    }
}

impl Dataset for TinyImageNet {
    type Sample = String;
    type Label = Option<String>;

    fn description_map(&self) -> Result<DescriptionMap> {
        let descriptions: HashMap<String, String> =
            read_table(&self.labels_description_file, 2)?
                .into_iter()
                .map(|row| {
                    let mut fields = row.into_iter();
                    let label = fields.next().unwrap_or_default();
                    let description = fields.next().unwrap_or_default();
                    (label, description)
                })
                .collect();

        let mut map = DescriptionMap::new();
        for row in read_table(&self.labels_list_file, 1)? {
            for label in row {
                let description = descriptions.get(&label).cloned();
                map.insert(label, description);
            }
        }
        Ok(map)
    }

    fn train_dataset(&self) -> Result<ExampleSet<String, Option<String>>> {
        let files = self.train_images.files(&self.data_folder)?;
        let mut examples = ExampleSet::with_capacity(files.len());
        for path in files {
            let label = self.train_images.label_of(&self.data_folder, &path);
            examples.push(to_uri(&path), label);
        }
        Ok(examples)
    }

    fn val_dataset(&self) -> Result<ExampleSet<String, Option<String>>> {
        let files = self.val_images.files(&self.data_folder)?;

        let mut annotations: HashMap<String, Vec<String>> = HashMap::new();
        for row in read_table(&self.val_annotations_file, 6)? {
            // The four bounding box columns are dropped.
            let mut fields = row.into_iter();
            if let (Some(filename), Some(label)) = (fields.next(), fields.next()) {
                annotations.entry(filename).or_default().push(label);
            }
        }

        let mut examples = ExampleSet::with_capacity(files.len());
        for path in files {
            let uri = to_uri(&path);
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            match annotations.get(&filename) {
                Some(labels) => {
                    for label in labels {
                        examples.push(uri.clone(), Some(label.clone()));
                    }
                }
                None => examples.push(uri, None),
            }
        }
        Ok(examples)
    }
}

/// Reads a tab separated file with exactly `columns` fields per non blank line.
fn read_table(path: &Path, columns: usize) -> Result<Vec<Vec<String>>> {
    let file = File::open(path).map_err(|err| DatasetError::io(path, err))?;
    let mut rows = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| match err.kind() {
            ErrorKind::InvalidData => DatasetError::Parse {
                path: path.to_path_buf(),
                reason: format!("line {}: not valid UTF-8", number + 1),
            },
            _ => DatasetError::io(path, err),
        })?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(str::to_string).collect();
        if fields.len() != columns {
            return Err(DatasetError::Parse {
                path: path.to_path_buf(),
                reason: format!(
                    "line {}: expected {columns} columns, found {}",
                    number + 1,
                    fields.len()
                ),
            });
        }
        rows.push(fields);
    }
    Ok(rows)
}
