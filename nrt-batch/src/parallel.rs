//! Multi-threaded epoch loading.
//!
//! Every worker thread opens its own reader on the dataset directory and owns
//! the batches whose index `b` satisfies `b % workers == worker`, which it loads
//! in increasing order into its own bounded `flume` channel. The ordered merge
//! reads batch `b` from the channel of worker `b % workers`, so no batch is ever
//! held outside the channels and at most `queue_capacity` batches (rounded up
//! to a multiple of the worker count) are buffered. Dropping the loader stops
//! the workers and joins them.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use nrt_format::{DatasetReader, OpenOptions};
use serde::{Deserialize, Serialize};

use crate::{
    collate::BatchTensor,
    driver::{load_batch, BatchPlan},
    error::{BatchError, BatchResult},
    view::RandomAccessView,
    window::WindowPolicy,
};

/// How batches from different workers are interleaved for the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Deliver whichever batch is ready first. Each worker's batches stay in order.
    Unordered,
    /// Deliver batches in schedule order.
    #[default]
    Ordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    pub workers: usize,
    /// Upper bound on loaded batches waiting for the consumer, shared by the workers.
    pub queue_capacity: usize,
    pub merge: MergePolicy,
    pub open: OpenOptions,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 8,
            merge: MergePolicy::Ordered,
            open: OpenOptions::default(),
        }
    }
}

impl LoaderOptions {
    pub fn from_config() -> Self {
        Self {
            workers: nrt_config::CONFIG.num_workers,
            queue_capacity: nrt_config::CONFIG.queue_capacity,
            merge: MergePolicy::Ordered,
            open: OpenOptions::from_config(),
        }
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.workers == 0 {
            return Err(BatchError::InvalidPlan("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(BatchError::InvalidPlan(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LoadedBatch {
    /// Position of the batch in the epoch schedule.
    pub batch_index: usize,
    pub worker: usize,
    pub batch: BatchTensor,
}

type Message = BatchResult<LoadedBatch>;

/// Iterator over the batches of one epoch, loaded by background workers.
///
/// Yields at most one error; after an error or the last batch it returns `None`.
pub struct ParallelLoader {
    /// One channel per worker; `None` once that worker has hung up.
    receivers: Vec<Option<flume::Receiver<Message>>>,
    workers: usize,
    per_worker_capacity: usize,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    merge: MergePolicy,
    next_index: usize,
    received: usize,
    total: usize,
}

impl ParallelLoader {
    /// Opens the dataset once to fix the schedule, then starts the workers.
    pub fn spawn(
        dir: impl AsRef<Path>,
        plan: &BatchPlan,
        epoch: u64,
        options: LoaderOptions,
    ) -> BatchResult<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let schedule = {
            let reader = DatasetReader::open(&dir, options.open)?;
            Arc::new(plan.schedule(reader.tensor(), epoch)?)
        };

        let workers = options.workers.min(schedule.len()).max(1);
        let per_worker_capacity = options.queue_capacity.div_ceil(workers);
        let mut loader = Self {
            receivers: Vec::with_capacity(workers),
            workers,
            per_worker_capacity,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::with_capacity(workers),
            merge: options.merge,
            next_index: 0,
            received: 0,
            total: schedule.len(),
        };

        for worker in 0..workers {
            let (sender, receiver) = flume::bounded(per_worker_capacity);
            let task = WorkerTask {
                worker,
                workers,
                dir: dir.clone(),
                open: options.open,
                window: plan.window,
                schedule: schedule.clone(),
                sender,
                stop: loader.stop.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("nrt-loader-{worker}"))
                .spawn(move || task.run())
                .map_err(BatchError::WorkerSpawn)?;
            loader.receivers.push(Some(receiver));
            loader.handles.push(handle);
        }

        tracing::debug!(
            path = %dir.display(),
            epoch,
            workers,
            per_worker_capacity,
            batches = loader.total,
            merge = ?options.merge,
            "spawned parallel loader"
        );
        Ok(loader)
    }

    pub fn num_batches(&self) -> usize {
        self.total
    }

    /// Loaded batches currently waiting in the worker channels.
    pub fn buffered(&self) -> usize {
        self.receivers.iter().flatten().map(flume::Receiver::len).sum()
    }

    /// Most batches that can ever be waiting at once.
    pub fn max_buffered(&self) -> usize {
        self.per_worker_capacity * self.workers
    }

    /// Stops the workers and waits for them, reporting the first one that panicked.
    pub fn join(mut self) -> BatchResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> BatchResult<()> {
        self.stop.store(true, Ordering::Relaxed);
        // Unblocks workers waiting on a full channel.
        self.receivers.clear();

        let mut result = Ok(());
        for (worker, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                tracing::warn!(worker, "loader worker panicked");
                if result.is_ok() {
                    result = Err(BatchError::WorkerPanicked { worker });
                }
            }
        }
        result
    }

    /// Ends iteration once the workers have hung up.
    fn finish(&mut self) -> Option<Message> {
        match self.shutdown() {
            Err(err) => Some(Err(err)),
            Ok(()) if self.received < self.total => {
                tracing::warn!(
                    received = self.received,
                    expected = self.total,
                    "loader workers exited early"
                );
                None
            }
            Ok(()) => None,
        }
    }

    fn deliver(&mut self, message: Message) -> Option<Message> {
        match message {
            Ok(batch) => {
                self.received += 1;
                Some(Ok(batch))
            }
            Err(err) => {
                let _ = self.shutdown();
                Some(Err(err))
            }
        }
    }

    fn next_ordered(&mut self) -> Option<Message> {
        if self.next_index >= self.total {
            return self.finish();
        }
        let worker = self.next_index % self.workers;
        let message = self.receivers[worker].as_ref()?.recv();
        match message {
            Ok(message) => {
                self.next_index += 1;
                self.deliver(message)
            }
            Err(flume::RecvError::Disconnected) => self.finish(),
        }
    }

    fn next_unordered(&mut self) -> Option<Message> {
        loop {
            if self.receivers.iter().all(Option::is_none) {
                return self.finish();
            }
            let mut selector = flume::Selector::new();
            for (worker, receiver) in self.receivers.iter().enumerate() {
                if let Some(receiver) = receiver {
                    selector = selector.recv(receiver, move |message| (worker, message));
                }
            }
            match selector.wait() {
                (_, Ok(message)) => return self.deliver(message),
                (worker, Err(flume::RecvError::Disconnected)) => self.receivers[worker] = None,
            }
        }
    }
}

impl Iterator for ParallelLoader {
    type Item = BatchResult<LoadedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.receivers.is_empty() {
            return None;
        }
        match self.merge {
            MergePolicy::Unordered => self.next_unordered(),
            MergePolicy::Ordered => self.next_ordered(),
        }
    }
}

impl Drop for ParallelLoader {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

struct WorkerTask {
    worker: usize,
    workers: usize,
    dir: PathBuf,
    open: OpenOptions,
    window: WindowPolicy,
    schedule: Arc<Vec<Vec<usize>>>,
    sender: flume::Sender<Message>,
    stop: Arc<AtomicBool>,
}

impl WorkerTask {
    fn run(self) {
        let reader = match DatasetReader::open(&self.dir, self.open) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::warn!(worker = self.worker, error = %err, "worker failed to open dataset");
                let _ = self.sender.send(Err(err.into()));
                return;
            }
        };
        let view = RandomAccessView::new(reader.tensor());

        for batch_index in (self.worker..self.schedule.len()).step_by(self.workers) {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            let result = load_batch(&view, &self.schedule[batch_index], &self.window).map(|batch| {
                LoadedBatch {
                    batch_index,
                    worker: self.worker,
                    batch,
                }
            });
            let failed = result.is_err();
            if self.sender.send(result).is_err() {
                tracing::debug!(worker = self.worker, "consumer dropped, worker stopping");
                break;
            }
            if failed {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrt_format::{DatasetGenerator, RaggedBuilder};

    fn dataset(root: &Path, items: usize) -> PathBuf {
        let items = DatasetGenerator {
            event_groups_per_item: 0..=5,
            measurements_per_event_group: 0..=3,
            ..Default::default()
        }
        .generate(items, 5)
        .unwrap();
        let target = root.join("ds");
        RaggedBuilder::build(&items).unwrap().save(&target).unwrap();
        target
    }

    #[test]
    fn ordered_merge_delivers_schedule_order() {
        let dir = tempfile::tempdir().unwrap();
        let target = dataset(dir.path(), 23);
        let plan = BatchPlan::new(4);
        let options = LoaderOptions {
            workers: 3,
            queue_capacity: 2,
            ..Default::default()
        };
        let loader = ParallelLoader::spawn(&target, &plan, 0, options).unwrap();
        assert_eq!(loader.num_batches(), 6);
        let batches: Vec<LoadedBatch> = loader.collect::<BatchResult<_>>().unwrap();
        assert_eq!(
            batches.iter().map(|b| b.batch_index).collect::<Vec<_>>(),
            (0..6).collect::<Vec<_>>()
        );
        for b in &batches {
            assert_eq!(b.worker, b.batch_index % 3);
        }
    }

    #[test]
    fn buffered_batches_stay_within_queue_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let target = dataset(dir.path(), 60);
        let options = LoaderOptions {
            workers: 3,
            queue_capacity: 4,
            ..Default::default()
        };
        let mut loader = ParallelLoader::spawn(&target, &BatchPlan::new(2), 0, options).unwrap();
        assert_eq!(loader.num_batches(), 30);
        assert_eq!(loader.max_buffered(), 6);

        // Give the workers time to fill their channels while nothing is consumed.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(loader.buffered() <= loader.max_buffered());

        let mut expected = 0;
        while let Some(batch) = loader.next() {
            assert_eq!(batch.unwrap().batch_index, expected);
            assert!(loader.buffered() <= loader.max_buffered());
            expected += 1;
        }
        assert_eq!(expected, 30);
    }

    #[test]
    fn unordered_merge_drains_every_worker() {
        let dir = tempfile::tempdir().unwrap();
        let target = dataset(dir.path(), 17);
        let options = LoaderOptions {
            workers: 4,
            queue_capacity: 1,
            merge: MergePolicy::Unordered,
            ..Default::default()
        };
        let loader = ParallelLoader::spawn(&target, &BatchPlan::new(3), 0, options).unwrap();
        let mut indices: Vec<usize> = loader
            .map(|b| b.unwrap().batch_index)
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dataset(dir.path(), 2);
        let options = LoaderOptions {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            ParallelLoader::spawn(&target, &BatchPlan::new(1), 0, options),
            Err(BatchError::InvalidPlan(_))
        ));
    }

    #[test]
    fn missing_dataset_fails_at_spawn() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ParallelLoader::spawn(
                dir.path().join("absent"),
                &BatchPlan::new(1),
                0,
                LoaderOptions::default()
            ),
            Err(BatchError::Format(_))
        ));
    }

    #[test]
    fn join_after_full_consumption_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let target = dataset(dir.path(), 5);
        let mut loader =
            ParallelLoader::spawn(&target, &BatchPlan::new(2), 0, LoaderOptions::default()).unwrap();
        let mut count = 0;
        for batch in loader.by_ref() {
            batch.unwrap();
            count += 1;
        }
        assert_eq!(count, 3);
        loader.join().unwrap();
    }
}
