pub mod activation;
pub mod bias;
pub mod dense;
pub mod entry;
pub mod projection;
pub mod weighting;

use ndarray::{ArrayView2, ArrayViewMut2, ShapeBuilder};

use crate::error::Result;

pub use activation::ActivationLayer;
pub use bias::BiasLayer;
pub use dense::DenseLayer;
pub use entry::InputLayer;
pub use projection::ProjectionLayer;
pub use weighting::WeightingLayer;

/// A layer that owns parameter buffers applies one accumulated update per
/// completed batch. `scaling_factor` is `1 / batch_size`, supplied by the
/// caller; the accumulator must be zeroed afterwards.
pub trait Optimizable {
    fn optimize(&mut self, scaling_factor: f32) -> Result<()>;
}

/// The single capability interface every forward layer implements. The
/// propagator depends only on this trait, never on concrete layer kinds.
///
/// `forward` consumes the whole batched buffer of the preceding layer along
/// with per-sample column counts; `backward` addresses one sample slot of
/// the current batch. Components whose buffers depend on the maximum batch
/// size allocate them in `acquire` and drop them in `release`; both are
/// no-ops for layers without such state.
pub trait ForwardLayer {
    fn number_input_rows(&self) -> usize;
    fn maximum_input_columns(&self) -> usize;
    fn number_output_rows(&self) -> usize;
    fn maximum_output_columns(&self) -> usize;

    fn acquire(&mut self, maximum_batch_size: usize) -> Result<()>;
    fn release(&mut self);

    fn forward(
        &mut self,
        batch_size: usize,
        column_counts: &[usize],
        input: &[f32],
        is_training: bool,
    ) -> Result<()>;

    fn backward(&mut self, within_batch: usize, chain: &[f32]) -> Result<()>;

    fn forward_result(&self) -> &[f32];
    fn backward_result(&self, within_batch: usize) -> &[f32];
    fn output_column_counts(&self) -> &[usize];

    fn as_optimizable(&mut self) -> Option<&mut dyn Optimizable> {
        None
    }
}

/// A batched buffer: one fixed-capacity slot per sample, columns contiguous
/// at stride `number_rows`, slot stride `number_rows * maximum_columns`.
#[derive(Debug)]
pub(crate) struct BatchBuffer {
    number_rows: usize,
    maximum_columns: usize,
    entries: Vec<f32>,
}

impl BatchBuffer {
    pub fn new(number_rows: usize, maximum_columns: usize) -> Self {
        BatchBuffer {
            number_rows,
            maximum_columns,
            entries: Vec::new(),
        }
    }

    pub fn allocate(&mut self, maximum_batch_size: usize) {
        self.entries = vec![0.0; maximum_batch_size * self.stride()];
    }

    pub fn release(&mut self) {
        self.entries = Vec::new();
    }

    pub fn stride(&self) -> usize {
        self.number_rows * self.maximum_columns
    }

    pub fn entries(&self) -> &[f32] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [f32] {
        &mut self.entries
    }

    /// The occupied prefix of sample `within_batch`'s slot.
    pub fn slot(&self, within_batch: usize, columns: usize) -> &[f32] {
        let offset = within_batch * self.stride();

        &self.entries[offset..offset + self.number_rows * columns]
    }

    pub fn slot_mut(&mut self, within_batch: usize, columns: usize) -> &mut [f32] {
        let offset = within_batch * self.stride();
        let length = self.number_rows * columns;

        &mut self.entries[offset..offset + length]
    }
}

/// View over a parameter or scratch buffer laid out row by row.
pub(crate) fn matrix_view(rows: usize, columns: usize, entries: &[f32]) -> ArrayView2<'_, f32> {
    ArrayView2::from_shape((rows, columns), entries).expect("buffer matches its declared shape")
}

pub(crate) fn matrix_view_mut(
    rows: usize,
    columns: usize,
    entries: &mut [f32],
) -> ArrayViewMut2<'_, f32> {
    ArrayViewMut2::from_shape((rows, columns), entries).expect("buffer matches its declared shape")
}

/// View over a batch slot, whose columns are contiguous at stride `rows`.
pub(crate) fn column_view(rows: usize, columns: usize, entries: &[f32]) -> ArrayView2<'_, f32> {
    ArrayView2::from_shape((rows, columns).f(), entries).expect("slot matches its declared shape")
}

pub(crate) fn column_view_mut(
    rows: usize,
    columns: usize,
    entries: &mut [f32],
) -> ArrayViewMut2<'_, f32> {
    ArrayViewMut2::from_shape((rows, columns).f(), entries).expect("slot matches its declared shape")
}
