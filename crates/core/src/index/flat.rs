//! Exhaustive flat vector index over squared L2 distance.
//!
//! Vectors are stored in one contiguous `f32` arena; search scans every row
//! and keeps the k best in a bounded heap. Labels are the insertion
//! positions, assigned contiguously from 0, and are never reused. Index
//! files are bincode payloads with a magic + CRC32 footer, written with
//! temp-file + rename so a crashed write never leaves a torn file.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BinaryHeap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Magic bytes appended before the CRC32 footer of an index file.
const INDEX_CRC_MAGIC: &[u8; 4] = b"EFI1";

/// Label returned for result slots beyond the number of stored vectors.
pub const NO_RESULT_LABEL: i64 = -1;

/// Errors from the flat index engine.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Vector length does not match the index dimension.
    #[error("dimension mismatch: index has dimension {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Batch layout is inconsistent with the advertised count.
    #[error("invalid vector batch: {0}")]
    InvalidBatch(String),

    /// Filesystem failure while reading or writing the index file.
    #[error("index file i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The index file failed integrity or structural checks.
    #[error("corrupt index file: {0}")]
    Corrupt(String),
}

/// An exhaustive flat L2 index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Creates an empty index of the given dimension.
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::InvalidBatch("dimension cannot be zero".into()));
        }
        Ok(Self {
            dimension,
            vectors: Vec::new(),
        })
    }

    /// Dimension every stored vector must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn ntotal(&self) -> i64 {
        (self.vectors.len() / self.dimension) as i64
    }

    /// Appends `n` vectors laid out flat as `[v0..., v1..., ...]`.
    ///
    /// The new vectors receive labels `ntotal .. ntotal + n`.
    pub fn add(&mut self, flat: &[f32], n: usize) -> Result<(), IndexError> {
        if n == 0 {
            return Err(IndexError::InvalidBatch("batch cannot be empty".into()));
        }
        if flat.len() != n * self.dimension {
            return Err(IndexError::InvalidBatch(format!(
                "expected {} values for {} vectors of dimension {}, got {}",
                n * self.dimension,
                n,
                self.dimension,
                flat.len()
            )));
        }
        self.vectors.extend_from_slice(flat);
        Ok(())
    }

    /// Searches for the `k` nearest stored vectors to `query`.
    ///
    /// Returns parallel `(distances, labels)` arrays of length exactly `k`,
    /// sorted by ascending squared L2 distance with ties broken by ascending
    /// label. Slots beyond `ntotal` carry [`NO_RESULT_LABEL`] and
    /// `f32::INFINITY`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<(Vec<f32>, Vec<i64>), IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        // Max-heap of the k best seen so far; the root is the current worst.
        let mut heap: BinaryHeap<(OrderedFloat<f32>, i64)> = BinaryHeap::with_capacity(k + 1);
        for (label, row) in self.vectors.chunks_exact(self.dimension).enumerate() {
            let dist = squared_l2(query, row);
            heap.push((OrderedFloat(dist), label as i64));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut best: Vec<(f32, i64)> = heap.into_iter().map(|(d, l)| (d.0, l)).collect();
        best.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut distances = vec![f32::INFINITY; k];
        let mut labels = vec![NO_RESULT_LABEL; k];
        for (slot, (dist, label)) in best.into_iter().enumerate() {
            distances[slot] = dist;
            labels[slot] = label;
        }
        Ok((distances, labels))
    }

    /// Serializes the index to `path`: `[bincode][magic "EFI1"][CRC32 BE]`.
    pub fn write_to_file(&self, path: &Path) -> Result<(), IndexError> {
        let bytes = bincode::serialize(self)
            .map_err(|e| IndexError::Corrupt(format!("failed to encode index: {e}")))?;
        let crc = crc32fast::hash(&bytes);

        let mut out = Vec::with_capacity(bytes.len() + 8);
        out.extend_from_slice(&bytes);
        out.extend_from_slice(INDEX_CRC_MAGIC);
        out.extend_from_slice(&crc.to_be_bytes());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("index.tmp");
        fs::write(&tmp_path, &out)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Loads an index from `path`, verifying the CRC32 footer.
    pub fn read_from_file(path: &Path) -> Result<Self, IndexError> {
        let raw = fs::read(path)?;
        if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != INDEX_CRC_MAGIC {
            return Err(IndexError::Corrupt(format!(
                "missing index footer: {}",
                path.display()
            )));
        }
        let payload = &raw[..raw.len() - 8];
        let stored = u32::from_be_bytes([
            raw[raw.len() - 4],
            raw[raw.len() - 3],
            raw[raw.len() - 2],
            raw[raw.len() - 1],
        ]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(IndexError::Corrupt(format!(
                "CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}: {}",
                path.display()
            )));
        }

        let index: FlatIndex = bincode::deserialize(payload)
            .map_err(|e| IndexError::Corrupt(format!("failed to decode index: {e}")))?;
        if index.dimension == 0 || index.vectors.len() % index.dimension != 0 {
            return Err(IndexError::Corrupt(format!(
                "inconsistent arena: {} values, dimension {}",
                index.vectors.len(),
                index.dimension
            )));
        }
        Ok(index)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// L2-normalizes each `dimension`-sized row of a flat vector batch in place.
/// Zero vectors are left untouched.
pub fn normalize_batch(flat: &mut [f32], dimension: usize) {
    if dimension == 0 {
        return;
    }
    for row in flat.chunks_exact_mut(dimension) {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in row.iter_mut() {
                *v /= norm;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit_index() -> FlatIndex {
        let mut idx = FlatIndex::new(3).unwrap();
        idx.add(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0], 3)
            .unwrap();
        idx
    }

    #[test]
    fn labels_are_contiguous_insertion_positions() {
        let mut idx = FlatIndex::new(2).unwrap();
        assert_eq!(idx.ntotal(), 0);
        idx.add(&[0.0, 0.0, 1.0, 1.0], 2).unwrap();
        assert_eq!(idx.ntotal(), 2);
        idx.add(&[2.0, 2.0], 1).unwrap();
        assert_eq!(idx.ntotal(), 3);
    }

    #[test]
    fn search_orders_by_ascending_distance() {
        let idx = unit_index();
        let (distances, labels) = idx.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(labels[0], 0);
        assert_eq!(distances[0], 0.0);
        // The two remaining unit vectors tie at squared distance 2; ties
        // break by ascending label.
        assert_eq!(labels[1], 1);
        assert_eq!(labels[2], 2);
        assert_eq!(distances[1], 2.0);
        assert_eq!(distances[2], 2.0);
    }

    #[test]
    fn search_pads_beyond_ntotal_with_no_result() {
        let idx = unit_index();
        let (distances, labels) = idx.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(labels.len(), 5);
        assert_eq!(labels[3], NO_RESULT_LABEL);
        assert_eq!(labels[4], NO_RESULT_LABEL);
        assert!(distances[3].is_infinite());
    }

    #[test]
    fn search_on_empty_index_is_all_padding() {
        let idx = FlatIndex::new(4).unwrap();
        let (_, labels) = idx.search(&[0.0; 4], 3).unwrap();
        assert_eq!(labels, vec![NO_RESULT_LABEL; 3]);
    }

    #[test]
    fn query_dimension_mismatch_rejected() {
        let idx = unit_index();
        assert!(matches!(
            idx.search(&[1.0, 0.0], 1),
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn add_with_wrong_layout_rejected() {
        let mut idx = FlatIndex::new(3).unwrap();
        assert!(matches!(
            idx.add(&[1.0, 2.0], 1),
            Err(IndexError::InvalidBatch(_))
        ));
        assert!(matches!(idx.add(&[], 0), Err(IndexError::InvalidBatch(_))));
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(FlatIndex::new(0).is_err());
    }

    #[test]
    fn file_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c1.index");
        let idx = unit_index();
        idx.write_to_file(&path).unwrap();

        let loaded = FlatIndex::read_from_file(&path).unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.ntotal(), 3);
        let (_, labels) = loaded.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(labels[0], 1);
    }

    #[test]
    fn corrupted_file_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c1.index");
        unit_index().write_to_file(&path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[10] ^= 0xFF;
        fs::write(&path, &raw).unwrap();

        assert!(matches!(
            FlatIndex::read_from_file(&path),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            FlatIndex::read_from_file(&tmp.path().join("absent.index")),
            Err(IndexError::Io(_))
        ));
    }

    #[test]
    fn normalize_batch_produces_unit_rows() {
        let mut flat = vec![3.0, 4.0, 0.0, 0.0];
        normalize_batch(&mut flat, 2);
        assert!((flat[0] - 0.6).abs() < 1e-6);
        assert!((flat[1] - 0.8).abs() < 1e-6);
        // zero vector untouched
        assert_eq!(&flat[2..], &[0.0, 0.0]);
    }
}
