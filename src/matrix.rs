use crate::error::{EngineError, Result};

/// A single sample: a `number_rows × maximum_columns` buffer of which only
/// the first `number_columns` columns carry real data. Columns are stored
/// contiguously at stride `number_rows`, so a sample's real entries occupy
/// the `number_rows * number_columns` prefix of `entries`.
#[derive(Debug, Clone)]
pub struct FloatMatrix {
    number_rows: usize,
    maximum_columns: usize,
    number_columns: usize,
    entries: Vec<f32>,
}

impl FloatMatrix {
    /// A fixed-length matrix: the declared capacity equals the actual
    /// column count.
    pub fn new(number_rows: usize, number_columns: usize, entries: Vec<f32>) -> Result<Self> {
        Self::with_maximum_columns(number_rows, number_columns, number_columns, entries)
    }

    /// A variable-length matrix. `entries` holds the real data
    /// (`number_rows * number_columns` values, columns contiguous); the
    /// buffer is padded with zeros up to the declared capacity.
    pub fn with_maximum_columns(
        number_rows: usize,
        maximum_columns: usize,
        number_columns: usize,
        mut entries: Vec<f32>,
    ) -> Result<Self> {
        if number_columns > maximum_columns {
            return Err(EngineError::Configuration(format!(
                "{number_columns} columns exceed the declared capacity of {maximum_columns}"
            )));
        }

        if entries.len() != number_rows * number_columns {
            return Err(EngineError::Configuration(format!(
                "{} entries do not fill a {number_rows}x{number_columns} matrix",
                entries.len()
            )));
        }

        entries.resize(number_rows * maximum_columns, 0.0);

        Ok(FloatMatrix {
            number_rows,
            maximum_columns,
            number_columns,
            entries,
        })
    }

    /// A column vector, the common case for fixed-size inputs.
    pub fn column_vector(entries: Vec<f32>) -> Self {
        let number_rows = entries.len();

        FloatMatrix {
            number_rows,
            maximum_columns: 1,
            number_columns: 1,
            entries,
        }
    }

    pub fn number_rows(&self) -> usize {
        self.number_rows
    }

    pub fn maximum_columns(&self) -> usize {
        self.maximum_columns
    }

    pub fn number_columns(&self) -> usize {
        self.number_columns
    }

    /// The `number_rows * number_columns` prefix holding real data.
    pub fn occupied_entries(&self) -> &[f32] {
        &self.entries[..self.number_rows * self.number_columns]
    }

    pub fn entries(&self) -> &[f32] {
        &self.entries
    }
}

/// Packs the selected samples into one flat batch buffer.
///
/// Sample `b` of the batch occupies the slot starting at
/// `b * number_rows * maximum_columns`; its real columns are copied
/// contiguously into the front of the slot and the rest of the destination
/// is zeroed, so the padding of a packed batch is deterministic. Returns the
/// per-sample column counts.
pub fn concatenate_batch(
    batch: &[usize],
    inputs: &[FloatMatrix],
    number_rows: usize,
    maximum_columns: usize,
    destination: &mut [f32],
) -> Result<Vec<usize>> {
    let stride = number_rows * maximum_columns;

    if destination.len() < batch.len() * stride {
        return Err(EngineError::Configuration(format!(
            "batch of {} samples does not fit a destination of {} entries",
            batch.len(),
            destination.len()
        )));
    }

    destination.fill(0.0);

    let mut column_counts = Vec::with_capacity(batch.len());

    for (within_batch, &sample) in batch.iter().enumerate() {
        let input = inputs.get(sample).ok_or_else(|| {
            EngineError::Configuration(format!("sample index {sample} is out of bounds"))
        })?;

        if input.number_rows() != number_rows || input.maximum_columns() > maximum_columns {
            return Err(EngineError::Configuration(format!(
                "sample {sample} is {}x{}, expected {number_rows} rows and at most {maximum_columns} columns",
                input.number_rows(),
                input.maximum_columns()
            )));
        }

        let occupied = input.occupied_entries();
        destination[within_batch * stride..within_batch * stride + occupied.len()]
            .copy_from_slice(occupied);

        column_counts.push(input.number_columns());
    }

    Ok(column_counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_length_matrix_is_padded() {
        let matrix = FloatMatrix::with_maximum_columns(2, 3, 1, vec![1.0, 2.0]).unwrap();

        assert_eq!(matrix.number_columns(), 1);
        assert_eq!(matrix.occupied_entries(), &[1.0, 2.0]);
        assert_eq!(matrix.entries(), &[1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_overlong_matrix_is_rejected() {
        assert!(FloatMatrix::with_maximum_columns(2, 1, 2, vec![1.0; 4]).is_err());
    }

    #[test]
    fn test_concatenation_zeroes_stale_padding() {
        let inputs = [
            FloatMatrix::with_maximum_columns(2, 3, 1, vec![1.0, 2.0]).unwrap(),
            FloatMatrix::with_maximum_columns(2, 3, 2, vec![3.0, 4.0, 5.0, 6.0]).unwrap(),
        ];

        let mut destination = vec![9.0; 2 * 2 * 3];
        let counts = concatenate_batch(&[0, 1], &inputs, 2, 3, &mut destination).unwrap();

        assert_eq!(counts, vec![1, 2]);
        assert_eq!(
            destination,
            vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0]
        );
    }
}
