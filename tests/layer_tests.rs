use cascade::layers::{
    ActivationLayer, BiasLayer, ForwardLayer, InputLayer, Optimizable, ProjectionLayer,
    WeightingLayer,
};
use cascade::{ActivationType, FloatMatrix, OptimizationStrategy};

fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len());

    for (index, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < tolerance,
            "entry {index}: {a} differs from {e}"
        );
    }
}

#[test]
fn test_identity_weighting_forward_and_accumulation() {
    // 2-input, 2-output weighting with identity weights.
    let mut layer = WeightingLayer::from_weights(
        vec![1.0, 0.0, 0.0, 1.0],
        2, // input rows
        1, // maximum columns
        2, // output rows
        None,
    );
    layer.acquire(1).unwrap();

    layer.forward(1, &[1], &[1.0, 2.0], true).unwrap();
    assert_close(&layer.forward_result()[..2], &[1.0, 2.0], 1e-6);

    layer.backward(0, &[1.0, 1.0]).unwrap();

    // chain * transpose(input) = [[1, 2], [1, 2]]
    assert_close(layer.accumulator().entries(), &[1.0, 2.0, 1.0, 2.0], 1e-6);

    // transpose(W) * chain with identity weights is the chain itself.
    assert_close(layer.backward_result(0), &[1.0, 1.0], 1e-6);
}

#[test]
fn test_optimize_with_zero_scaling_keeps_parameters() {
    let mut layer = WeightingLayer::from_weights(
        vec![0.5, -0.5, 0.25, 0.75],
        2,
        1,
        2,
        Some(OptimizationStrategy::GradientDescent { learning_rate: 0.1 }),
    );
    layer.acquire(1).unwrap();

    let original = layer.weights().to_vec();

    layer.forward(1, &[1], &[1.0, 2.0], true).unwrap();
    layer.backward(0, &[1.0, -1.0]).unwrap();
    layer.optimize(0.0).unwrap();

    assert_close(layer.weights(), &original, 1e-9);
    assert_eq!(layer.accumulator().count(), 0);
}

#[test]
fn test_optimize_with_empty_accumulator_is_a_no_op() {
    let mut layer = WeightingLayer::from_weights(
        vec![0.5, -0.5, 0.25, 0.75],
        2,
        1,
        2,
        Some(OptimizationStrategy::GradientDescent { learning_rate: 0.1 }),
    );
    layer.acquire(1).unwrap();

    let original = layer.weights().to_vec();
    layer.optimize(1.0).unwrap();

    assert_close(layer.weights(), &original, 1e-9);
}

#[test]
fn test_accumulation_is_order_independent() {
    let weights = vec![0.3, -0.2, 0.1, 0.4];
    let samples = [[1.0f32, 2.0], [-0.5, 0.25]];
    let chains = [[0.5f32, -1.0], [2.0, 0.125]];

    let accumulate = |order: [usize; 2]| {
        let mut layer = WeightingLayer::from_weights(weights.clone(), 2, 1, 2, None);
        layer.acquire(2).unwrap();

        let batch_input = [samples[0], samples[1]].concat();
        layer.forward(2, &[1, 1], &batch_input, true).unwrap();

        for &within_batch in &order {
            layer.backward(within_batch, &chains[within_batch]).unwrap();
        }

        layer.accumulator().entries().to_vec()
    };

    assert_close(&accumulate([0, 1]), &accumulate([1, 0]), 1e-6);
}

#[test]
fn test_plain_update_is_linear_over_two_batches() {
    let learning_rate = 0.05;
    let mut layer = WeightingLayer::from_weights(
        vec![1.0, 0.0, 0.0, 1.0],
        2,
        1,
        2,
        Some(OptimizationStrategy::GradientDescent { learning_rate }),
    );
    layer.acquire(1).unwrap();

    let original = layer.weights().to_vec();
    let input = [1.0, 2.0];
    let chain = [1.0, 1.0];

    // The weight gradient depends on input and chain only, so two identical
    // rounds must move the weights by exactly twice one round's step.
    for _ in 0..2 {
        layer.forward(1, &[1], &input, true).unwrap();
        layer.backward(0, &chain).unwrap();
        layer.optimize(1.0).unwrap();
    }

    let mean_gradient = [1.0, 2.0, 1.0, 2.0];
    let expected: Vec<f32> = original
        .iter()
        .zip(&mean_gradient)
        .map(|(&w, &g)| w - 2.0 * learning_rate * g)
        .collect();

    assert_close(layer.weights(), &expected, 1e-6);
}

#[test]
fn test_bias_broadcast_and_column_sum() {
    let mut layer = BiasLayer::from_bias(vec![1.0, -1.0], 2, None);
    layer.acquire(1).unwrap();

    // One sample with two columns.
    layer
        .forward(1, &[2], &[1.0, 2.0, 3.0, 4.0], true)
        .unwrap();
    assert_close(&layer.forward_result()[..4], &[2.0, 1.0, 4.0, 3.0], 1e-6);

    layer.backward(0, &[1.0, 2.0, 3.0, 4.0]).unwrap();

    // The chain passes through unchanged; the accumulator holds the
    // column-wise sum.
    assert_close(layer.backward_result(0), &[1.0, 2.0, 3.0, 4.0], 1e-6);
    assert_close(layer.accumulator().entries(), &[4.0, 6.0], 1e-6);
}

#[test]
fn test_projection_round_trip_matches_independent_layers() {
    let weights = vec![0.5, -0.25, 1.5, 0.75];
    let bias = vec![0.1, -0.2];
    let input = [2.0, -1.0];
    let ones = [1.0, 1.0];

    let mut projection = ProjectionLayer::from_parts(
        WeightingLayer::from_weights(weights.clone(), 2, 1, 2, None),
        Some(BiasLayer::from_bias(bias.clone(), 1, None)),
    );
    projection.acquire(1).unwrap();
    projection.forward(1, &[1], &input, true).unwrap();
    projection.backward(0, &ones).unwrap();

    let mut weighting = WeightingLayer::from_weights(weights, 2, 1, 2, None);
    weighting.acquire(1).unwrap();
    weighting.forward(1, &[1], &input, true).unwrap();

    let mut bias_layer = BiasLayer::from_bias(bias, 1, None);
    bias_layer.acquire(1).unwrap();
    let weighted = weighting.forward_result()[..2].to_vec();
    bias_layer.forward(1, &[1], &weighted, true).unwrap();

    assert_close(
        &projection.forward_result()[..2],
        &bias_layer.forward_result()[..2],
        1e-6,
    );

    bias_layer.backward(0, &ones).unwrap();
    weighting.backward(0, &ones).unwrap();

    let (projected_weighting, projected_bias) = match &projection {
        ProjectionLayer::WeightingWithBias(weighting, bias) => (weighting, bias),
        ProjectionLayer::Weighting(_) => unreachable!("constructed with a bias"),
    };

    assert_close(
        projected_weighting.accumulator().entries(),
        weighting.accumulator().entries(),
        1e-6,
    );
    assert_close(
        projected_bias.accumulator().entries(),
        bias_layer.accumulator().entries(),
        1e-6,
    );
    assert_close(projection.backward_result(0), weighting.backward_result(0), 1e-6);
}

#[test]
fn test_variable_length_samples_share_a_batch_without_corruption() {
    let mut entry = InputLayer::new(2, 3);
    entry.acquire(2).unwrap();

    let inputs = [
        FloatMatrix::with_maximum_columns(2, 3, 1, vec![1.0, 2.0]).unwrap(),
        FloatMatrix::with_maximum_columns(2, 3, 2, vec![3.0, 4.0, 5.0, 6.0]).unwrap(),
    ];

    entry.forward(&[0, 1], &inputs).unwrap();

    assert_eq!(entry.column_counts(), &[1, 2]);
    assert_eq!(
        entry.forward_result(),
        &[1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0]
    );
}

#[test]
fn test_weighting_respects_each_samples_actual_length() {
    // Row of ones: the output is the sum over each column.
    let mut layer = WeightingLayer::from_weights(vec![1.0, 1.0], 2, 3, 1, None);
    layer.acquire(2).unwrap();

    let mut batch_input = vec![0.0; 2 * 2 * 3];
    batch_input[..2].copy_from_slice(&[1.0, 2.0]); // sample 0, one column
    batch_input[6..10].copy_from_slice(&[3.0, 4.0, 5.0, 6.0]); // sample 1, two columns

    layer.forward(2, &[1, 2], &batch_input, true).unwrap();

    let stride = 3;
    assert_close(&layer.forward_result()[..1], &[3.0], 1e-6);
    assert_close(&layer.forward_result()[stride..stride + 2], &[7.0, 11.0], 1e-6);

    // Sample 0's backward only touches its own column.
    layer.backward(0, &[1.0]).unwrap();
    assert_close(layer.accumulator().entries(), &[1.0, 2.0], 1e-6);
}

#[test]
fn test_softmax_activation_layer_backward() {
    let mut layer = ActivationLayer::new(ActivationType::Softmax, 2, 1);
    layer.acquire(1).unwrap();

    layer.forward(1, &[1], &[0.0, 0.0], true).unwrap();
    assert_close(&layer.forward_result()[..2], &[0.5, 0.5], 1e-6);

    // Cross-entropy chain for a one-hot target on category 0.
    layer.backward(0, &[-2.0, 0.0]).unwrap();
    assert_close(layer.backward_result(0), &[-0.5, 0.5], 1e-6);
}

#[test]
fn test_forward_before_acquire_fails_fast() {
    let mut layer = WeightingLayer::from_weights(vec![1.0], 1, 1, 1, None);

    assert!(layer.forward(1, &[1], &[1.0], true).is_err());
}

#[test]
fn test_forward_after_release_fails_fast() {
    let mut layer = WeightingLayer::from_weights(vec![1.0], 1, 1, 1, None);
    layer.acquire(1).unwrap();
    layer.release();

    assert!(layer.forward(1, &[1], &[1.0], true).is_err());

    // Release is idempotent.
    layer.release();
}
