//! Single-threaded epoch iteration.
//!
//! A [`BatchPlan`] turns a dataset into a fixed schedule of index batches for a
//! given epoch. [`EpochIter`] walks that schedule lazily, slicing and
//! collating one batch per call to `next`. The schedule depends only on the
//! plan, the dataset and the epoch number, so an epoch can be replayed exactly.

use nrt_format::NestedRaggedTensor;
use serde::{Deserialize, Serialize};

use crate::{
    collate::{collate, BatchTensor},
    error::{BatchError, BatchResult},
    ordering::IndexOrdering,
    view::{ItemRequest, RandomAccessView},
    window::WindowPolicy,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub ordering: IndexOrdering,
    pub window: WindowPolicy,
    /// Items with fewer event-groups are skipped.
    pub min_event_groups: usize,
    /// Drop a trailing batch that is smaller than `batch_size`.
    pub drop_last: bool,
}

impl BatchPlan {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ordering: IndexOrdering::Sequential,
            window: WindowPolicy::unbounded(),
            min_event_groups: 0,
            drop_last: false,
        }
    }

    /// A sequential plan using `NRT_BATCH_SIZE`.
    pub fn from_config() -> Self {
        Self::new(nrt_config::CONFIG.batch_size)
    }

    pub fn with_ordering(mut self, ordering: IndexOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_window(mut self, window: WindowPolicy) -> Self {
        self.window = window;
        self
    }

    pub fn with_min_event_groups(mut self, min_event_groups: usize) -> Self {
        self.min_event_groups = min_event_groups;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.batch_size == 0 {
            return Err(BatchError::InvalidPlan(
                "batch_size must be at least 1".to_string(),
            ));
        }
        self.window.validate()
    }

    /// Item indices of every batch of `epoch`, in delivery order.
    pub fn schedule(&self, tensor: &NestedRaggedTensor, epoch: u64) -> BatchResult<Vec<Vec<usize>>> {
        self.validate()?;
        let bounds = tensor.dim1_bounds();
        let min = self.min_event_groups as u64;
        let order = self
            .ordering
            .arrange(tensor.num_items(), epoch, |i| bounds[i + 1] - bounds[i] >= min)?;

        let mut batches: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        if self.drop_last && batches.last().is_some_and(|b| b.len() < self.batch_size) {
            batches.pop();
        }
        Ok(batches)
    }

    pub fn epoch<'a>(&self, tensor: &'a NestedRaggedTensor, epoch: u64) -> BatchResult<EpochIter<'a>> {
        let batches = self.schedule(tensor, epoch)?;
        tracing::debug!(
            epoch,
            batches = batches.len(),
            batch_size = self.batch_size,
            "starting epoch"
        );
        Ok(EpochIter {
            view: RandomAccessView::new(tensor),
            window: self.window,
            total: batches.len(),
            batches: batches.into_iter(),
        })
    }

    /// Epochs `0..num_epochs`, each created when it is reached.
    pub fn epochs<'a>(
        &self,
        tensor: &'a NestedRaggedTensor,
        num_epochs: u64,
    ) -> impl Iterator<Item = BatchResult<EpochIter<'a>>> + 'a {
        let plan = self.clone();
        (0..num_epochs).map(move |epoch| plan.epoch(tensor, epoch))
    }
}

/// Lazy, finite sequence of the batches of one epoch.
#[derive(Debug)]
pub struct EpochIter<'a> {
    view: RandomAccessView<'a>,
    window: WindowPolicy,
    batches: std::vec::IntoIter<Vec<usize>>,
    total: usize,
}

impl EpochIter<'_> {
    pub fn num_batches(&self) -> usize {
        self.total
    }
}

impl Iterator for EpochIter<'_> {
    type Item = BatchResult<BatchTensor>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.batches.next()?;
        Some(load_batch(&self.view, &indices, &self.window))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}

impl ExactSizeIterator for EpochIter<'_> {}

/// Slices and collates the items at `indices`.
pub fn load_batch(
    view: &RandomAccessView<'_>,
    indices: &[usize],
    window: &WindowPolicy,
) -> BatchResult<BatchTensor> {
    let requests: Vec<ItemRequest> = indices.iter().copied().map(ItemRequest::new).collect();
    let slices = view.get_many(&requests, window)?;
    Ok(collate(&slices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrt_format::{EventGroup, Item, RaggedBuilder};

    /// Item `i` has `i % 4` event-groups, each with one measurement coded `i + 1`.
    fn tensor(n: usize) -> NestedRaggedTensor {
        let items: Vec<Item> = (0..n)
            .map(|i| {
                let groups = (0..i % 4)
                    .map(|g| EventGroup::new(g as f32, [(i as u32 + 1, 1.0)]))
                    .collect();
                Item::new(None, groups)
            })
            .collect();
        RaggedBuilder::build(&items).unwrap()
    }

    #[test]
    fn sequential_schedule_chunks_in_order() {
        let plan = BatchPlan::new(3);
        assert_eq!(
            plan.schedule(&tensor(7), 0).unwrap(),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
        let plan = plan.with_drop_last(true);
        assert_eq!(plan.schedule(&tensor(7), 0).unwrap().len(), 2);
    }

    #[test]
    fn short_items_are_skipped() {
        let plan = BatchPlan::new(10).with_min_event_groups(2);
        assert_eq!(plan.schedule(&tensor(8), 0).unwrap(), vec![vec![2, 3, 6, 7]]);
    }

    #[test]
    fn epoch_yields_collated_batches() {
        let tensor = tensor(5);
        let plan = BatchPlan::new(2).with_window(WindowPolicy::last(2));
        let epoch = plan.epoch(&tensor, 0).unwrap();
        assert_eq!(epoch.num_batches(), 3);
        assert_eq!(epoch.len(), 3);

        let batches: Vec<BatchTensor> = epoch.collect::<BatchResult<_>>().unwrap();
        assert_eq!(batches[0].item_indices(), &[0, 1]);
        assert_eq!(batches[1].item_indices(), &[2, 3]);
        // Item 3 has three event-groups; the window keeps two.
        assert_eq!(batches[1].max_dim1(), 2);
        assert_eq!(batches[2].batch_size(), 1);
    }

    #[test]
    fn replaying_an_epoch_is_identical() {
        let tensor = tensor(20);
        let plan = BatchPlan::new(4).with_ordering(IndexOrdering::Shuffled { seed: 9 });
        let run = |epoch| {
            plan.epoch(&tensor, epoch)
                .unwrap()
                .map(|b| b.unwrap().dynamic_code().to_vec())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(1), run(1));
        assert_ne!(run(1), run(2));
    }

    #[test]
    fn epochs_are_created_lazily() {
        let tensor = tensor(6);
        let plan = BatchPlan::new(4);
        let counts: Vec<usize> = plan
            .epochs(&tensor, 3)
            .map(|e| e.unwrap().num_batches())
            .collect();
        assert_eq!(counts, vec![2, 2, 2]);
    }

    #[test]
    fn invalid_plans_fail_before_iteration() {
        let tensor = tensor(3);
        assert!(matches!(
            BatchPlan::new(0).epoch(&tensor, 0),
            Err(BatchError::InvalidPlan(_))
        ));
        assert!(matches!(
            BatchPlan::new(1).with_window(WindowPolicy::last(0)).epoch(&tensor, 0),
            Err(BatchError::InvalidWindow(_))
        ));
        let explicit = BatchPlan::new(1).with_ordering(IndexOrdering::Explicit(vec![0, 3]));
        assert!(explicit.epoch(&tensor, 0).is_err());
    }

    #[test]
    fn empty_dataset_has_no_batches() {
        let tensor = tensor(0);
        assert_eq!(BatchPlan::new(4).epoch(&tensor, 0).unwrap().count(), 0);
    }
}
