//! Reader for the CIFAR-10 binary distribution.
//!
//! Each record is one label byte followed by 3072 pixel bytes: the red,
//! green and blue planes of a 32x32 image, each stored row-major. Records
//! are converted to channels-last (HWC) on load.

use crate::data::{CLASS_NAMES, LabeledImages, NUM_CLASSES, RawImages};
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const IMAGE_SIDE: usize = 32;
pub const CHANNELS: usize = 3;
const PLANE: usize = IMAGE_SIDE * IMAGE_SIDE;
const RECORD_LEN: usize = 1 + PLANE * CHANNELS;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";
const META_FILE: &str = "batches.meta.txt";

/// Training and test partitions plus the class names.
#[derive(Debug, Clone)]
pub struct CifarDataset {
    pub train: LabeledImages,
    pub test: LabeledImages,
    pub class_names: Vec<String>,
}

/// Loads the dataset from a directory holding the `.bin` batch files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CifarLoader {
    pub dir: PathBuf,
    /// Keep at most this many training images (in file order).
    #[serde(default)]
    pub max_train_samples: Option<usize>,
    #[serde(default)]
    pub max_test_samples: Option<usize>,
}

impl CifarLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_train_samples: None,
            max_test_samples: None,
        }
    }

    pub fn with_limits(mut self, train: Option<usize>, test: Option<usize>) -> Self {
        self.max_train_samples = train;
        self.max_test_samples = test;
        self
    }

    pub fn load(&self) -> Result<CifarDataset, MlError> {
        if !self.dir.is_dir() {
            return Err(MlError::not_found(format!(
                "dataset directory {}",
                self.dir.display()
            )));
        }
        let train_paths: Vec<PathBuf> = TRAIN_FILES.iter().map(|f| self.dir.join(f)).collect();
        let train = read_batches(&train_paths, self.max_train_samples)?;
        let test = read_batches(&[self.dir.join(TEST_FILE)], self.max_test_samples)?;
        let class_names = self.class_names()?;
        tracing::info!(
            dir = %self.dir.display(),
            train = train.len(),
            test = test.len(),
            "loaded CIFAR-10"
        );
        Ok(CifarDataset {
            train,
            test,
            class_names,
        })
    }

    /// Class names from `batches.meta.txt`, or the built-in list.
    pub fn class_names(&self) -> Result<Vec<String>, MlError> {
        let meta = self.dir.join(META_FILE);
        if !meta.exists() {
            return Ok(CLASS_NAMES.iter().map(|s| s.to_string()).collect());
        }
        let text = std::fs::read_to_string(&meta)?;
        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if names.len() != NUM_CLASSES {
            return Err(MlError::dataset(format!(
                "{} lists {} class names, expected {NUM_CLASSES}",
                meta.display(),
                names.len()
            )));
        }
        Ok(names)
    }
}

/// Read records from `paths` in order, stopping once `limit` images are kept.
pub fn read_batches(paths: &[PathBuf], limit: Option<usize>) -> Result<LabeledImages, MlError> {
    let mut labels = Vec::new();
    let mut pixels = Vec::new();
    for path in paths {
        if limit.is_some_and(|max| labels.len() >= max) {
            break;
        }
        let remaining = limit.map(|max| max - labels.len());
        decode_batch_file(path, remaining, &mut labels, &mut pixels)?;
    }
    let images = RawImages::new(labels.len(), (IMAGE_SIDE, IMAGE_SIDE, CHANNELS), pixels)?;
    LabeledImages::new(images, labels)
}

fn decode_batch_file(
    path: &Path,
    limit: Option<usize>,
    labels: &mut Vec<u8>,
    pixels: &mut Vec<u8>,
) -> Result<(), MlError> {
    if !path.exists() {
        return Err(MlError::not_found(format!("batch file {}", path.display())));
    }
    let bytes = std::fs::read(path)?;
    if bytes.len() % RECORD_LEN != 0 {
        return Err(MlError::dataset(format!(
            "{} is truncated: {} bytes is not a multiple of the {RECORD_LEN}-byte record",
            path.display(),
            bytes.len()
        )));
    }
    let records = bytes.chunks_exact(RECORD_LEN);
    let take = limit.unwrap_or(usize::MAX);
    for (i, record) in records.take(take).enumerate() {
        let label = record[0];
        if label as usize >= NUM_CLASSES {
            return Err(MlError::dataset(format!(
                "record {i} of {} has label {label}",
                path.display()
            )));
        }
        labels.push(label);
        decode_record(&record[1..], pixels);
    }
    tracing::debug!(path = %path.display(), total = labels.len(), "decoded batch file");
    Ok(())
}

/// Interleave planar RGB into HWC order.
fn decode_record(planes: &[u8], out: &mut Vec<u8>) {
    out.reserve(PLANE * CHANNELS);
    for p in 0..PLANE {
        for c in 0..CHANNELS {
            out.push(planes[c * PLANE + p]);
        }
    }
}
