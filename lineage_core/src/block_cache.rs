//! Blockwise cache for lazily computed output volumes.
//!
//! The volume is cut into a fixed grid of blocks. Each block is computed on
//! first read, encoded (MessagePack + LZ4) and kept until invalidated.
//!
//! ```text
//!   read(roi) ──► blocks ∩ roi ──► slot(block) ──► OnceCell::get_or_try_init
//!                                                    │ hit: decode
//!                                                    └ miss: compute ─► encode
//! ```
//!
//! Concurrent readers of the same block share one slot; only the first
//! computes, the others block on the cell until the bytes are published.

use lineage_env::{EnvError, LabelArray, Roi, AXES};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Grid position of a block.
pub type BlockIndex = [usize; AXES];

type Slot = Arc<OnceCell<Arc<[u8]>>>;

// ============================================================================
// GEOMETRY
// ============================================================================

/// Volume shape and block grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGeometry {
    shape: [usize; AXES],
    block_shape: [usize; AXES],
}

impl BlockGeometry {
    /// Block extents are clamped to `1..=shape` per axis.
    pub fn new(shape: [usize; AXES], block_shape: [usize; AXES]) -> Self {
        let mut clamped = block_shape;
        for axis in 0..AXES {
            clamped[axis] = block_shape[axis].clamp(1, shape[axis].max(1));
        }
        Self {
            shape,
            block_shape: clamped,
        }
    }

    pub fn shape(&self) -> [usize; AXES] {
        self.shape
    }

    pub fn block_shape(&self) -> [usize; AXES] {
        self.block_shape
    }

    /// Number of blocks per axis.
    pub fn grid(&self) -> [usize; AXES] {
        let mut grid = [0; AXES];
        for axis in 0..AXES {
            grid[axis] = self.shape[axis].div_ceil(self.block_shape[axis]);
        }
        grid
    }

    pub fn block_count(&self) -> usize {
        self.grid().iter().product()
    }

    /// ROI covered by a block, clipped to the volume.
    pub fn block_roi(&self, index: BlockIndex) -> Roi {
        let mut start = [0; AXES];
        let mut stop = [0; AXES];
        for axis in 0..AXES {
            start[axis] = index[axis] * self.block_shape[axis];
            stop[axis] = (start[axis] + self.block_shape[axis]).min(self.shape[axis]);
        }
        Roi::new(start, stop)
    }

    /// Block starting exactly at `start`, if `start` is block-aligned.
    pub fn block_at(&self, start: [usize; AXES]) -> Option<BlockIndex> {
        let grid = self.grid();
        let mut index = [0; AXES];
        for axis in 0..AXES {
            if start[axis] % self.block_shape[axis] != 0 {
                return None;
            }
            index[axis] = start[axis] / self.block_shape[axis];
            if index[axis] >= grid[axis] {
                return None;
            }
        }
        Some(index)
    }

    /// Every block intersecting `roi`, in row-major order.
    pub fn blocks_intersecting(&self, roi: &Roi) -> Vec<BlockIndex> {
        if roi.is_empty() {
            return Vec::new();
        }
        let mut first = [0; AXES];
        let mut last = [0; AXES];
        for axis in 0..AXES {
            first[axis] = roi.start[axis] / self.block_shape[axis];
            last[axis] = (roi.stop[axis] - 1) / self.block_shape[axis];
        }
        let mut blocks = Vec::new();
        let mut current = first;
        loop {
            blocks.push(current);
            let mut axis = AXES;
            loop {
                if axis == 0 {
                    return blocks;
                }
                axis -= 1;
                if current[axis] < last[axis] {
                    current[axis] += 1;
                    break;
                }
                current[axis] = first[axis];
            }
        }
    }
}

// ============================================================================
// CODEC
// ============================================================================

fn encode_block(block: &LabelArray) -> Result<Vec<u8>, EnvError> {
    let packed = rmp_serde::to_vec(block).map_err(EnvError::serialization)?;
    Ok(lz4_flex::compress_prepend_size(&packed))
}

fn decode_block(bytes: &[u8]) -> Result<LabelArray, EnvError> {
    let packed = lz4_flex::decompress_size_prepended(bytes).map_err(EnvError::serialization)?;
    rmp_serde::from_slice(&packed).map_err(EnvError::serialization)
}

/// Persistable clean-block state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheSnapshot {
    geometry: BlockGeometry,
    /// (block start, compressed bytes)
    blocks: Vec<([usize; AXES], Vec<u8>)>,
}

// ============================================================================
// CACHE
// ============================================================================

/// Counters of a [`BlockwiseCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub blocks_total: usize,
    pub blocks_clean: usize,
    pub computations: u64,
    pub hits: u64,
    pub compressed_bytes: usize,
}

/// Compressed, block-granular cache with at-most-once computation per block.
#[derive(Debug)]
pub struct BlockwiseCache {
    geometry: BlockGeometry,
    slots: Mutex<HashMap<BlockIndex, Slot>>,
    computations: AtomicU64,
    hits: AtomicU64,
}

impl BlockwiseCache {
    pub fn new(geometry: BlockGeometry) -> Self {
        Self {
            geometry,
            slots: Mutex::new(HashMap::new()),
            computations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<BlockIndex, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, index: BlockIndex) -> Slot {
        Arc::clone(self.slots().entry(index).or_default())
    }

    /// Reads `roi`, computing missing blocks with `compute`.
    ///
    /// `compute` receives the ROI of one whole block and must return an array
    /// of exactly that shape. A failed computation leaves the block dirty.
    pub fn read<F>(&self, roi: &Roi, compute: F) -> Result<LabelArray, EnvError>
    where
        F: Fn(&Roi) -> Result<LabelArray, EnvError>,
    {
        if !roi.fits(self.geometry.shape) {
            return Err(EnvError::RoiOutOfBounds {
                roi: *roi,
                shape: self.geometry.shape,
            });
        }
        let mut out = LabelArray::zeros(roi.shape());
        for index in self.geometry.blocks_intersecting(roi) {
            let block_roi = self.geometry.block_roi(index);
            let slot = self.slot(index);

            let mut computed = false;
            let bytes = slot.get_or_try_init(|| {
                computed = true;
                self.computations.fetch_add(1, Ordering::Relaxed);
                trace!(block = ?index, roi = %block_roi, "computing block");
                let block = compute(&block_roi)?;
                if block.shape() != block_roi.shape() {
                    return Err(EnvError::ShapeMismatch {
                        expected: block_roi.len(),
                        actual: block.len(),
                    });
                }
                encode_block(&block).map(Arc::from)
            })?;
            if !computed {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }

            let block = decode_block(bytes)?;
            if let Some(overlap) = block_roi.intersect(roi) {
                let piece = block.extract(&overlap.relative_to(block_roi.start));
                out.paste(overlap.relative_to(roi.start).start, &piece);
            }
        }
        Ok(out)
    }

    /// Marks every block intersecting `roi` dirty. Returns how many were clean.
    pub fn invalidate(&self, roi: &Roi) -> usize {
        let mut slots = self.slots();
        let mut dropped = 0;
        for index in self.geometry.blocks_intersecting(roi) {
            if let Some(slot) = slots.remove(&index) {
                if slot.get().is_some() {
                    dropped += 1;
                }
            }
        }
        debug!(roi = %roi, dropped, "cache invalidated");
        dropped
    }

    pub fn invalidate_all(&self) -> usize {
        let mut slots = self.slots();
        let dropped = slots.values().filter(|s| s.get().is_some()).count();
        slots.clear();
        debug!(dropped, "cache cleared");
        dropped
    }

    /// Indices of blocks holding data, sorted.
    pub fn clean_blocks(&self) -> Vec<BlockIndex> {
        let mut clean: Vec<_> = self
            .slots()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(index, _)| *index)
            .collect();
        clean.sort_unstable();
        clean
    }

    /// Serializes every clean block together with the cache geometry.
    pub fn serialize_clean_blocks(&self) -> Result<Vec<u8>, EnvError> {
        let slots = self.slots();
        let mut blocks: Vec<_> = slots
            .iter()
            .filter_map(|(index, slot)| {
                slot.get()
                    .map(|bytes| (self.geometry.block_roi(*index).start, bytes.to_vec()))
            })
            .collect();
        drop(slots);
        blocks.sort_by_key(|(start, _)| *start);

        let snapshot = CacheSnapshot {
            geometry: self.geometry,
            blocks,
        };
        rmp_serde::to_vec(&snapshot).map_err(EnvError::serialization)
    }

    /// Loads blocks written by [`serialize_clean_blocks`](Self::serialize_clean_blocks).
    ///
    /// The geometry must match this cache. Returns the number of blocks restored.
    pub fn restore(&self, blob: &[u8]) -> Result<usize, EnvError> {
        let snapshot: CacheSnapshot = rmp_serde::from_slice(blob).map_err(EnvError::serialization)?;
        if snapshot.geometry != self.geometry {
            return Err(EnvError::serialization(format!(
                "cache geometry mismatch: stored {:?} / {:?}, expected {:?} / {:?}",
                snapshot.geometry.shape,
                snapshot.geometry.block_shape,
                self.geometry.shape,
                self.geometry.block_shape
            )));
        }
        let restored = snapshot.blocks.len();
        for (start, bytes) in snapshot.blocks {
            self.insert_compressed(start, bytes)?;
        }
        debug!(restored, "cache restored");
        Ok(restored)
    }

    /// Installs externally supplied compressed bytes for the block at `start`.
    ///
    /// The bytes are decoded once to check they hold a block of the right shape.
    pub fn insert_compressed(&self, start: [usize; AXES], bytes: Vec<u8>) -> Result<(), EnvError> {
        let index = self.geometry.block_at(start).ok_or_else(|| {
            EnvError::serialization(format!("{start:?} is not the start of a cache block"))
        })?;
        let expected = self.geometry.block_roi(index);
        let block = decode_block(&bytes)?;
        if block.shape() != expected.shape() {
            return Err(EnvError::ShapeMismatch {
                expected: expected.len(),
                actual: block.len(),
            });
        }
        let cell = OnceCell::with_value(Arc::from(bytes));
        self.slots().insert(index, Arc::new(cell));
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots();
        let clean: Vec<_> = slots.values().filter_map(|s| s.get()).collect();
        CacheStats {
            blocks_total: self.geometry.block_count(),
            blocks_clean: clean.len(),
            computations: self.computations.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            compressed_bytes: clean.iter().map(|b| b.len()).sum(),
        }
    }
}
