use std::collections::HashMap;

/// One resident batch: the packed device buffer, the per-sample column
/// counts, and the total column count across the batch. Never mutated after
/// creation.
#[derive(Debug)]
pub struct CachedBatch {
    data: wgpu::Buffer,
    column_counts: Vec<usize>,
    total_columns: usize,
}

impl CachedBatch {
    pub(crate) fn new(data: wgpu::Buffer, column_counts: Vec<usize>) -> Self {
        let total_columns = column_counts.iter().sum();

        CachedBatch {
            data,
            column_counts,
            total_columns,
        }
    }

    pub fn data(&self) -> &wgpu::Buffer {
        &self.data
    }

    pub fn column_counts(&self) -> &[usize] {
        &self.column_counts
    }

    pub fn total_columns(&self) -> usize {
        self.total_columns
    }
}

/// Memoizes the batched device buffer per batch identifier, so repeated
/// passes over the same batch skip the host-to-device transfer. There is no
/// eviction: the cache is sized to the data set's batch count and lives for
/// the whole run, until `free` tears down every entry.
#[derive(Debug, Default)]
pub struct InputMemory {
    entries: HashMap<usize, CachedBatch>,
    uploads: usize,
}

impl InputMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, batch_id: usize) -> Option<&CachedBatch> {
        self.entries.get(&batch_id)
    }

    pub(crate) fn insert(&mut self, batch_id: usize, batch: CachedBatch) {
        self.entries.insert(batch_id, batch);
        self.uploads += 1;
    }

    /// Transfer-count probe: how many host-to-device uploads have happened.
    pub fn number_uploads(&self) -> usize {
        self.uploads
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn free(&mut self) {
        for batch in self.entries.values() {
            batch.data.destroy();
        }

        self.entries.clear();
    }
}
