use cascade::gpu_layers::{
    GpuActivationLayer, GpuBiasLayer, GpuContext, GpuDenseLayer, GpuForwardLayer, GpuInputLayer,
    GpuNetwork, GpuProjectionLayer, GpuWeightingLayer, InputMemory,
};
use cascade::layers::{BiasLayer, ForwardLayer, Optimizable, ProjectionLayer, WeightingLayer};
use cascade::{
    ActivationType, EngineError, FloatMatrix, InitializationStrategy, LossFunction,
    OptimizationStrategy,
};

/// The accelerator tests need a real adapter; they skip on machines
/// without one instead of failing.
fn context() -> Option<GpuContext> {
    GpuContext::new().ok()
}

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
fn test_softmax_has_no_accelerator_implementation() {
    let Some(context) = context() else { return };

    let result = GpuActivationLayer::new(context, ActivationType::Softmax, 2, 1);

    assert!(matches!(
        result,
        Err(EngineError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_input_memory_uploads_each_batch_at_most_once() {
    let Some(context) = context() else { return };

    let entry = GpuInputLayer::new(context.clone(), 2, 3);
    let mut network = GpuNetwork::new(context, 2, entry, Vec::new()).unwrap();
    let mut memory = InputMemory::new();

    let inputs = [
        FloatMatrix::with_maximum_columns(2, 3, 1, vec![1.0, 2.0]).unwrap(),
        FloatMatrix::with_maximum_columns(2, 3, 2, vec![3.0, 4.0, 5.0, 6.0]).unwrap(),
    ];

    network
        .forward(0, &[0, 1], &inputs, &mut memory, false)
        .unwrap();
    assert_eq!(memory.number_uploads(), 1);

    let first = network.read_output().unwrap();
    assert_eq!(
        first,
        vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0]
    );

    // The second pass over the same batch id reuses the resident buffer.
    network
        .forward(0, &[0, 1], &inputs, &mut memory, false)
        .unwrap();
    assert_eq!(memory.number_uploads(), 1);

    let second = network.read_output().unwrap();
    assert_eq!(first, second);

    // A different batch id is a different entry.
    network.forward(1, &[1, 0], &inputs, &mut memory, false).unwrap();
    assert_eq!(memory.number_uploads(), 2);
    assert_eq!(memory.len(), 2);

    memory.free();
    assert!(memory.is_empty());
}

#[test]
fn test_gpu_weighting_forward_matches_host() {
    let Some(context) = context() else { return };

    let weights = vec![0.5, -0.25, 1.5, 0.75, -1.0, 0.125];
    let inputs = [
        FloatMatrix::column_vector(vec![1.0, 2.0, -0.5]),
        FloatMatrix::column_vector(vec![0.25, -1.0, 3.0]),
    ];

    let mut host = WeightingLayer::from_weights(weights.clone(), 3, 1, 2, None);
    host.acquire(2).unwrap();
    let batch_input: Vec<f32> = inputs
        .iter()
        .flat_map(|input| input.occupied_entries().to_vec())
        .collect();
    host.forward(2, &[1, 1], &batch_input, false).unwrap();

    let entry = GpuInputLayer::new(context.clone(), 3, 1);
    let device_layer: Box<dyn GpuForwardLayer> = Box::new(GpuWeightingLayer::from_weights(
        context.clone(),
        weights,
        3,
        1,
        2,
        None,
    ));
    let mut network = GpuNetwork::new(context, 2, entry, vec![device_layer]).unwrap();
    let mut memory = InputMemory::new();

    network
        .forward(0, &[0, 1], &inputs, &mut memory, false)
        .unwrap();
    let output = network.read_output().unwrap();

    assert_close(&output, host.forward_result(), 1e-5);
}

#[test]
fn test_gpu_projection_update_matches_host() {
    let Some(context) = context() else { return };

    let weights = vec![0.5, -0.25, 1.5, 0.75];
    let bias = vec![0.1, -0.2];
    let optimization = OptimizationStrategy::GradientDescent { learning_rate: 0.1 };
    let inputs = [FloatMatrix::column_vector(vec![1.0, 2.0])];

    // Host reference: one forward/backward/optimize round.
    let mut host = ProjectionLayer::from_parts(
        WeightingLayer::from_weights(weights.clone(), 2, 1, 2, Some(optimization)),
        Some(BiasLayer::from_bias(bias.clone(), 1, Some(optimization))),
    );
    host.acquire(1).unwrap();
    host.forward(1, &[1], &[1.0, 2.0], true).unwrap();
    host.backward(0, &[1.0, 1.0]).unwrap();
    host.optimize(1.0).unwrap();

    // Device round over the same numbers.
    let mut memory = InputMemory::new();
    let mut entry = GpuInputLayer::new(context.clone(), 2, 1);
    entry.acquire(1).unwrap();
    let input_buffer = entry.forward(0, &[0], &inputs, &mut memory).unwrap();

    let mut device = GpuProjectionLayer::from_parts(
        GpuWeightingLayer::from_weights(context.clone(), weights, 2, 1, 2, Some(optimization)),
        Some(GpuBiasLayer::from_bias(
            context.clone(),
            bias,
            1,
            Some(optimization),
        )),
    );
    device.acquire(1).unwrap();
    device.forward(1, &input_buffer, true).unwrap();

    let chain = context.upload_storage_buffer("Chain Buffer", &[1.0, 1.0]);
    device.backward(1, &chain).unwrap();
    device.optimize(1.0).unwrap();

    let GpuProjectionLayer::WeightingWithBias(device_weighting, device_bias) = &device else {
        unreachable!("constructed with a bias");
    };
    let (host_weighting, host_bias) = match &host {
        ProjectionLayer::WeightingWithBias(weighting, bias) => (weighting, bias),
        ProjectionLayer::Weighting(_) => unreachable!("constructed with a bias"),
    };

    assert_close(
        &device_weighting.read_weights().unwrap(),
        host_weighting.weights(),
        1e-5,
    );
    assert_close(&device_bias.read_bias().unwrap(), host_bias.bias(), 1e-5);

    // Both accumulators were consumed and zeroed by the update kernels.
    assert_close(
        &device_weighting.read_accumulator().unwrap(),
        &[0.0, 0.0, 0.0, 0.0],
        1e-6,
    );
    assert_close(&device_bias.read_accumulator().unwrap(), &[0.0, 0.0], 1e-6);
}

#[test]
fn test_gpu_optimize_with_zero_scaling_keeps_weights() {
    let Some(context) = context() else { return };

    let weights = vec![0.5, -0.5, 0.25, 0.75];
    let mut memory = InputMemory::new();
    let mut entry = GpuInputLayer::new(context.clone(), 2, 1);
    entry.acquire(1).unwrap();

    let inputs = [FloatMatrix::column_vector(vec![1.0, 2.0])];
    let input_buffer = entry.forward(0, &[0], &inputs, &mut memory).unwrap();

    let mut layer = GpuWeightingLayer::from_weights(
        context.clone(),
        weights.clone(),
        2,
        1,
        2,
        Some(OptimizationStrategy::GradientDescent { learning_rate: 0.1 }),
    );
    layer.acquire(1).unwrap();
    layer.forward(1, &input_buffer, true).unwrap();

    let chain = context.upload_storage_buffer("Chain Buffer", &[1.0, -1.0]);
    layer.backward(1, &chain).unwrap();
    layer.optimize(0.0).unwrap();

    assert_close(&layer.read_weights().unwrap(), &weights, 1e-6);
}

#[test]
fn test_gpu_momentum_matches_host_over_two_batches() {
    let Some(context) = context() else { return };

    let optimization = OptimizationStrategy::Momentum {
        learning_rate: 0.1,
        momentum: 0.9,
    };
    let weights = vec![1.0, 0.0, 0.0, 1.0];
    let inputs = [FloatMatrix::column_vector(vec![1.0, 2.0])];

    let mut host = WeightingLayer::from_weights(weights.clone(), 2, 1, 2, Some(optimization));
    host.acquire(1).unwrap();

    let mut memory = InputMemory::new();
    let mut entry = GpuInputLayer::new(context.clone(), 2, 1);
    entry.acquire(1).unwrap();
    let input_buffer = entry.forward(0, &[0], &inputs, &mut memory).unwrap();

    let mut device =
        GpuWeightingLayer::from_weights(context.clone(), weights, 2, 1, 2, Some(optimization));
    device.acquire(1).unwrap();

    let chain = context.upload_storage_buffer("Chain Buffer", &[1.0, 1.0]);

    // Two rounds: the second update folds the first round's history in.
    for _ in 0..2 {
        host.forward(1, &[1], &[1.0, 2.0], true).unwrap();
        host.backward(0, &[1.0, 1.0]).unwrap();
        host.optimize(1.0).unwrap();

        device.forward(1, &input_buffer, true).unwrap();
        device.backward(1, &chain).unwrap();
        device.optimize(1.0).unwrap();
    }

    assert_close(&device.read_weights().unwrap(), host.weights(), 1e-5);
}

#[test]
fn test_gpu_dense_training_converges_and_caches_batches() {
    let Some(context) = context() else { return };

    let inputs = vec![
        FloatMatrix::column_vector(vec![0.0, 0.0]),
        FloatMatrix::column_vector(vec![0.0, 1.0]),
        FloatMatrix::column_vector(vec![1.0, 0.0]),
        FloatMatrix::column_vector(vec![1.0, 1.0]),
    ];
    let targets = vec![
        vec![1.0, 0.0],
        vec![1.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
    ];

    let entry = GpuInputLayer::new(context.clone(), 2, 1);
    let dense = GpuDenseLayer::new(
        context.clone(),
        2,
        1,
        2,
        &InitializationStrategy::Zero,
        &InitializationStrategy::Zero,
        ActivationType::Sigmoid,
        Some(OptimizationStrategy::GradientDescent { learning_rate: 0.5 }),
    )
    .unwrap();

    let mut network = GpuNetwork::new(context, 4, entry, vec![Box::new(dense)]).unwrap();

    let mut losses = Vec::new();
    let uploads = {
        let mut training = network.training(
            &inputs,
            &targets,
            100,
            LossFunction::SquaredError,
            Some(Box::new(|_iteration, loss| losses.push(loss))),
        );
        training.run().unwrap();
        let uploads = training.input_memory().number_uploads();
        training.free();
        uploads
    };

    assert_eq!(losses.len(), 100);
    assert!(losses[99] < losses[0], "loss did not decrease: {losses:?}");

    // One batch, one hundred iterations, exactly one transfer.
    assert_eq!(uploads, 1);
}
