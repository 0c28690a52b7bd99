//! Engine allocation: grouping regions into import batches.
//!
//! The first few engines of a table grow in capacity so that importing can
//! start early while later batches stay large enough to amortize per-engine
//! overhead. Once the growing engines are used up, engines are filled to the
//! flat batch size, and whatever is left at the end goes to the last engine.

use super::TableRegion;
use tracing::debug;

/// Capacity policy of the engine currently being filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// One of the first `N` engines; each one is larger than the last.
    Growing { capacity: f64 },
    /// Capacity pinned at the batch size.
    Flat { capacity: f64 },
    /// No further engine will be opened.
    Draining,
}

impl Phase {
    pub fn capacity(&self) -> Option<f64> {
        match *self {
            Phase::Growing { capacity } | Phase::Flat { capacity } => Some(capacity),
            Phase::Draining => None,
        }
    }
}

/// Assigns consecutive region sizes to engines.
#[derive(Debug, Clone)]
pub struct EngineBatcher {
    batch_size: f64,
    ratio: f64,
    growing_engines: usize,
    engine_id: i32,
    filled: f64,
    last_assigned: Option<i32>,
    phase: Phase,
}

impl EngineBatcher {
    pub fn new(total_size: f64, batch_size: f64, ratio: f64, table_concurrency: usize) -> Self {
        let (growing_engines, phase) = if total_size <= batch_size {
            (1, Phase::Draining)
        } else {
            let n = growing_engine_count(total_size, batch_size, ratio, table_concurrency);
            let phase = if n > 0 {
                Phase::Growing {
                    capacity: batch_size,
                }
            } else {
                Phase::Flat {
                    capacity: batch_size,
                }
            };
            (n, phase)
        };

        Self {
            batch_size,
            ratio,
            growing_engines,
            engine_id: 0,
            filled: 0.0,
            last_assigned: None,
            phase,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of engines with growing capacity, the first one included.
    pub fn growing_engines(&self) -> usize {
        self.growing_engines
    }

    /// Place the next region and return its engine id.
    pub fn push(&mut self, size: f64) -> i32 {
        let id = self.engine_id;
        self.last_assigned = Some(id);
        self.filled += size;

        if let Some(capacity) = self.phase.capacity() {
            if self.filled >= capacity {
                debug!(engine = id, size = self.filled, capacity, "engine closed");
                self.filled = 0.0;
                self.engine_id += 1;
                self.phase = self.next_phase(capacity);
            }
        }
        id
    }

    /// Stop opening engines; returns how many engines received regions.
    pub fn finish(&mut self) -> usize {
        self.phase = Phase::Draining;
        self.last_assigned.map_or(0, |id| id as usize + 1)
    }

    fn next_phase(&self, previous: f64) -> Phase {
        let index = self.engine_id as usize;
        if index >= self.growing_engines {
            Phase::Flat {
                capacity: self.batch_size,
            }
        } else {
            let left = (self.growing_engines - index) as f64;
            Phase::Growing {
                capacity: previous * (self.ratio / left + 1.0),
            }
        }
    }
}

/// Smallest engine count `n` whose growing engines can take the non-overlapped
/// share of the table, bounded by `table_concurrency`.
fn growing_engine_count(
    total_size: f64,
    batch_size: f64,
    ratio: f64,
    table_concurrency: usize,
) -> usize {
    let target = total_size * (1.0 - ratio) / batch_size;
    let limit = table_concurrency as f64;
    let mut n = target.ceil();
    if !(n > 0.0 && n <= limit) {
        return table_concurrency;
    }

    let mut shrink = inverse_beta(n as usize, ratio);
    loop {
        if n > limit {
            return table_concurrency;
        }
        if n - shrink >= target {
            return n as usize;
        }
        shrink *= 1.0 + ratio / n;
        n += 1.0;
    }
}

/// `ratio * prod_{k=1}^{n-1} (ratio + k) / k`
fn inverse_beta(n: usize, ratio: f64) -> f64 {
    (1..n).fold(ratio, |acc, k| acc * (ratio + k as f64) / k as f64)
}

/// Assign engine ids in place; `sizes[i]` is the weight of the i-th region.
///
/// Missing sizes count as zero.
pub fn allocate_engine_ids<'a, I>(
    regions: I,
    sizes: &[f64],
    batch_size: f64,
    batch_import_ratio: f64,
    table_concurrency: usize,
) where
    I: IntoIterator<Item = &'a mut TableRegion>,
{
    let total: f64 = sizes.iter().sum();
    let mut batcher = EngineBatcher::new(total, batch_size, batch_import_ratio, table_concurrency);

    for (i, region) in regions.into_iter().enumerate() {
        region.engine_id = batcher.push(sizes.get(i).copied().unwrap_or(0.0));
    }

    let engines = batcher.finish();
    debug!(
        engines,
        growing = batcher.growing_engines(),
        total_size = total,
        "allocated engine ids"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_regions(n: usize) -> (Vec<TableRegion>, Vec<f64>) {
        (vec![TableRegion::default(); n], vec![1.0; n])
    }

    fn engine_sizes(regions: &[TableRegion]) -> Vec<usize> {
        let mut sizes: Vec<usize> = Vec::new();
        for region in regions {
            let id = region.engine_id() as usize;
            if sizes.len() <= id {
                sizes.resize(id + 1, 0);
            }
            sizes[id] += 1;
        }
        sizes
    }

    #[test]
    fn test_batch_larger_than_table() {
        let (mut regions, sizes) = unit_regions(700);
        allocate_engine_ids(&mut regions, &sizes, 1000.0, 0.5, 1000);
        assert!(regions.iter().all(|r| r.engine_id() == 0));
    }

    #[test]
    fn test_growing_engines() {
        let (mut regions, sizes) = unit_regions(700);
        allocate_engine_ids(&mut regions, &sizes, 100.0, 0.5, 1000);
        assert_eq!(engine_sizes(&regions), vec![100, 113, 132, 165, 190]);
    }

    #[test]
    fn test_concurrency_caps_growth() {
        let (mut regions, sizes) = unit_regions(700);
        allocate_engine_ids(&mut regions, &sizes, 50.0, 0.5, 4);
        let got = engine_sizes(&regions);
        assert_eq!(got.len(), 13);
        assert_eq!(&got[..4], &[50, 59, 73, 110]);
        assert!(got[4..12].iter().all(|&s| s == 50));
        assert_eq!(got[12], 8);
    }

    #[test]
    fn test_zero_ratio_is_uniform() {
        let (mut regions, sizes) = unit_regions(700);
        allocate_engine_ids(&mut regions, &sizes, 100.0, 0.0, 1000);
        assert_eq!(engine_sizes(&regions), vec![100; 7]);
    }

    #[test]
    fn test_engine_ids_non_decreasing() {
        let mut regions = vec![TableRegion::default(); 40];
        let sizes: Vec<f64> = (0..40).map(|i| (i % 7 + 1) as f64).collect();
        allocate_engine_ids(&mut regions, &sizes, 20.0, 0.75, 3);
        assert!(regions
            .windows(2)
            .all(|w| w[0].engine_id() <= w[1].engine_id()));
        assert_eq!(regions[0].engine_id(), 0);
    }

    #[test]
    fn test_phase_transitions() {
        let mut batcher = EngineBatcher::new(700.0, 50.0, 0.5, 4);
        assert_eq!(batcher.growing_engines(), 4);
        assert_eq!(batcher.phase(), Phase::Growing { capacity: 50.0 });

        let mut last = 0;
        for _ in 0..292 {
            last = batcher.push(1.0);
        }
        assert_eq!(last, 3);
        assert_eq!(batcher.phase(), Phase::Flat { capacity: 50.0 });

        for _ in 0..408 {
            last = batcher.push(1.0);
        }
        assert_eq!(last, 12);
        assert_eq!(batcher.finish(), 13);
        assert_eq!(batcher.phase(), Phase::Draining);
    }

    #[test]
    fn test_small_table_drains_immediately() {
        let mut batcher = EngineBatcher::new(10.0, 100.0, 0.5, 4);
        assert_eq!(batcher.phase(), Phase::Draining);
        assert_eq!(batcher.push(10.0), 0);
        assert_eq!(batcher.finish(), 1);
    }

    #[test]
    fn test_inverse_beta() {
        assert_eq!(inverse_beta(1, 0.5), 0.5);
        assert!((inverse_beta(4, 0.5) - 1.09375).abs() < 1e-12);
        assert_eq!(inverse_beta(5, 0.0), 0.0);
    }
}
