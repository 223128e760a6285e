use std::sync::mpsc;
use std::thread;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::config::DataLoaderSettings;
use crate::error::Result;
use crate::problem::{Batch, Problem};

/// Splits a problem into batches, optionally shuffled, optionally produced
/// by a pool of worker threads.
#[derive(Debug, Clone)]
pub struct DataLoader {
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    num_workers: usize,
    prefetch: usize,
    seed: u64,
}

impl DataLoader {
    pub fn new(settings: &DataLoaderSettings, seed: u64) -> DataLoader {
        DataLoader {
            batch_size: settings.batch_size.unwrap_or(1).max(1),
            shuffle: settings.shuffle,
            drop_last: settings.drop_last,
            num_workers: settings.num_workers,
            prefetch: settings.prefetch.max(1),
            seed,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self, problem: &dyn Problem) -> usize {
        if self.drop_last {
            problem.len() / self.batch_size
        } else {
            problem.get_epoch_size(self.batch_size)
        }
    }

    /// Sample indices of every batch of `epoch`, in delivery order for a
    /// single-threaded loader.
    pub fn plan(&self, len: usize, epoch: usize) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut rng);
        }
        indices
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Builds one batch; every sample gets its own RNG derived from
    /// `(seed, epoch, index)`.
    pub fn build_batch(&self, problem: &dyn Problem, indices: &[usize], epoch: usize) -> Result<Batch> {
        let samples = indices
            .iter()
            .map(|&i| {
                let mut rng = sample_rng(self.seed, epoch, i);
                problem.sample(i, &mut rng).map(|s| (i, s))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(problem.collate(samples))
    }

    /// The first batch of `epoch`, or `None` for an empty problem.
    pub fn first_batch(&self, problem: &dyn Problem, epoch: usize) -> Result<Option<Batch>> {
        match self.plan(problem.len(), epoch).first() {
            Some(indices) => self.build_batch(problem, indices, epoch).map(Some),
            None => Ok(None),
        }
    }

    /// Feeds every batch of `epoch` to `f`, stopping at the first error.
    ///
    /// With workers, batches reach `f` in the order the workers finish them.
    pub fn for_each_batch<F>(&self, problem: &dyn Problem, epoch: usize, mut f: F) -> Result<()>
    where
        F: FnMut(Batch) -> Result<()>,
    {
        let plan = self.plan(problem.len(), epoch);
        if self.num_workers == 0 {
            for indices in &plan {
                f(self.build_batch(problem, indices, epoch)?)?;
            }
            return Ok(());
        }

        let workers = self.num_workers.min(plan.len().max(1));
        debug!(workers, batches = plan.len(), "starting data loader workers");
        thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<Result<Batch>>(workers * self.prefetch);
            for w in 0..workers {
                let tx = tx.clone();
                let plan = &plan;
                scope.spawn(move || {
                    for indices in plan.iter().skip(w).step_by(workers) {
                        // The receiver is gone once the consumer failed.
                        if tx.send(self.build_batch(problem, indices, epoch)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for batch in rx {
                f(batch?)?;
            }
            Ok(())
        })
    }
}

/// Mixes the run seed, epoch and sample index into one RNG seed (splitmix64).
fn sample_rng(seed: u64, epoch: usize, index: usize) -> StdRng {
    let mut z = seed
        ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(z ^ (z >> 31))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{ToyClassification, ToyKind};

    fn loader(batch_size: usize, shuffle: bool, drop_last: bool, num_workers: usize) -> DataLoader {
        let settings = DataLoaderSettings {
            batch_size: Some(batch_size),
            shuffle,
            num_workers,
            drop_last,
            prefetch: 2,
        };
        DataLoader::new(&settings, 42)
    }

    #[test]
    fn plan_covers_every_index_once() {
        let plan = loader(4, true, false, 0).plan(10, 3);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].len(), 2);
        let mut all: Vec<usize> = plan.concat();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn drop_last_discards_partial_batch() {
        let l = loader(4, false, true, 0);
        assert_eq!(l.plan(10, 0), vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
        assert_eq!(l.num_batches(&ToyClassification::new(ToyKind::Xor, 10, 0.0)), 2);
    }

    #[test]
    fn shuffle_depends_on_epoch_but_is_reproducible() {
        let l = loader(10, true, false, 0);
        assert_eq!(l.plan(10, 1), l.plan(10, 1));
        assert_ne!(l.plan(10, 1), l.plan(10, 2));
    }

    #[test]
    fn workers_deliver_the_same_batches() {
        let problem = ToyClassification::new(ToyKind::Blobs, 37, 0.05);
        let mut inline = Vec::new();
        loader(5, true, false, 0)
            .for_each_batch(&problem, 0, |b| {
                inline.push(b.indices.clone());
                Ok(())
            })
            .unwrap();

        let mut pooled = Vec::new();
        loader(5, true, false, 3)
            .for_each_batch(&problem, 0, |b| {
                pooled.push((b.indices.clone(), b.inputs.clone()));
                Ok(())
            })
            .unwrap();

        assert_eq!(pooled.len(), inline.len());
        let mut pooled_indices: Vec<Vec<usize>> = pooled.iter().map(|(i, _)| i.clone()).collect();
        pooled_indices.sort();
        inline.sort();
        assert_eq!(pooled_indices, inline);

        // Noise is drawn from the per-sample RNG, so the pool reproduces it.
        let l = loader(5, true, false, 0);
        for (indices, inputs) in &pooled {
            assert_eq!(&l.build_batch(&problem, indices, 0).unwrap().inputs, inputs);
        }
    }

    #[test]
    fn consumer_error_stops_the_pool() {
        let problem = ToyClassification::new(ToyKind::Xor, 100, 0.0);
        let mut seen = 0;
        let result = loader(1, false, false, 2).for_each_batch(&problem, 0, |_| {
            seen += 1;
            if seen == 3 {
                Err(crate::error::TrainerError::Computation("boom".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(seen, 3);
    }
}
