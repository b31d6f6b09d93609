use ant_nn::gradcheck::{
    GradCheckConfig, GradCheckReport, Site, check_layer, check_loss, check_with_loss,
};
use ant_nn::init::uniform;
use ant_nn::layers::*;
use ant_nn::matrix::Matrix;
use ant_nn::optim::{AdamConfig, OptimizerKind, Parameter, RpropConfig};
use ant_nn::{AntError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn rng() -> StdRng {
    StdRng::seed_from_u64(2024)
}

fn kind() -> OptimizerKind {
    OptimizerKind::default()
}

fn assert_passes(name: &str, report: &GradCheckReport) {
    assert!(!report.checks.is_empty(), "{name}: nothing was checked");
    let failures = report.failures();
    assert!(
        failures.is_empty(),
        "{name}: {} of {} elements failed, first {:?}",
        failures.len(),
        report.checks.len(),
        failures[0]
    );
}

fn check<L: Layer>(name: &str, layer: &mut L, input: &Matrix) {
    let mut rng = rng();
    let report = check_layer(layer, input, &GradCheckConfig::default(), &mut rng).unwrap();
    assert_passes(name, &report);
}

#[test]
fn test_dense_scenario() {
    let w = Matrix::from_rows(2, 2, &[1.0, 0.5, -0.5, 1.0]).unwrap();
    let b = Matrix::new(2, 1).unwrap();
    let mut dense = Dense::with_weights(w, b, Activation::Identity, &kind()).unwrap();

    let y = dense.forward(&Matrix::column(&[1.0, 2.0]).unwrap()).unwrap();
    assert_eq!(y.to_row_major(), vec![2.0, 1.5]);

    dense.backward(&Matrix::column(&[1.0, 1.0]).unwrap()).unwrap();
    assert_eq!(dense.weights().grad().to_row_major(), vec![1.0, 2.0, 1.0, 2.0]);
    assert_eq!(dense.bias().grad().to_row_major(), vec![1.0, 1.0]);
}

#[test]
fn test_maxpool_scenario() {
    let mut pool = MaxPool2d::new(PoolConfig::new(1, 2, 2, 2)).unwrap();
    let y = pool.forward(&Matrix::column(&[1.0, 3.0, 2.0, 4.0]).unwrap()).unwrap();
    assert_eq!(y.to_row_major(), vec![4.0]);
    assert_eq!(pool.winners(), Some(&[3][..]));

    let dx = pool.backward(&Matrix::filled(1, 1, 5.0).unwrap()).unwrap();
    assert_eq!(dx.to_row_major(), vec![0.0, 0.0, 0.0, 5.0]);
}

#[test]
fn test_gradients_dense() {
    let mut rng = rng();
    for activation in [Activation::Identity, Activation::Sigmoid, Activation::Tanh] {
        let mut dense = Dense::new(4, 3, activation, &kind(), &mut rng).unwrap();
        let x = uniform(4, 5, 1.0, &mut rng).unwrap();
        check(&format!("dense {activation:?}"), &mut dense, &x);
    }
}

#[test]
fn test_gradients_activation_layer() {
    let mut rng = rng();
    let x = uniform(3, 4, 2.0, &mut rng).unwrap();
    for activation in [Activation::Sigmoid, Activation::Tanh, Activation::Relu] {
        let mut layer = ActivationLayer::new(activation);
        check(&format!("activation {activation:?}"), &mut layer, &x);
    }
}

#[test]
fn test_gradients_conv2d() {
    let mut rng = rng();
    let config = Conv2dConfig::new(2, 3, 5, 4, 3);
    let mut conv = Conv2d::new(config, &kind(), &mut rng).unwrap();
    let x = uniform(20, 2, 1.0, &mut rng).unwrap();
    check("conv2d", &mut conv, &x);

    let strided = Conv2dConfig::new(1, 2, 5, 5, 2).with_stride(2);
    let mut conv = Conv2d::new(strided, &kind(), &mut rng).unwrap();
    assert_eq!(conv.output_dims(), (2, 2));
    let x = uniform(25, 1, 1.0, &mut rng).unwrap();
    check("conv2d strided", &mut conv, &x);
}

#[test]
fn test_gradients_maxpool() {
    let mut rng = rng();
    let mut pool = MaxPool2d::new(PoolConfig::new(2, 4, 4, 2)).unwrap();
    let x = uniform(16, 2, 1.0, &mut rng).unwrap();
    check("maxpool2d", &mut pool, &x);

    let mut overlapping = MaxPool2d::new(PoolConfig::new(1, 5, 5, 3).with_stride(2)).unwrap();
    let x = uniform(25, 1, 1.0, &mut rng).unwrap();
    check("maxpool2d overlapping", &mut overlapping, &x);
}

#[test]
fn test_gradients_layernorm() {
    let mut rng = rng();
    let gamma = uniform(1, 5, 1.0, &mut rng).unwrap();
    let beta = uniform(1, 5, 1.0, &mut rng).unwrap();
    let mut norm = LayerNorm::with_affine(gamma, beta, &kind()).unwrap();
    let x = uniform(3, 5, 2.0, &mut rng).unwrap();
    check("layernorm", &mut norm, &x);
}

#[test]
fn test_gradients_attention() {
    let mut rng = rng();
    for config in [AttentionConfig::new(4, 2), AttentionConfig::new(4, 2).causal()] {
        let mut attention = MultiHeadAttention::new(config, &kind(), &mut rng).unwrap();
        let x = uniform(3, 4, 1.0, &mut rng).unwrap();
        check(&format!("attention causal={}", config.causal), &mut attention, &x);
    }
}

#[test]
fn test_causal_attention_ignores_the_future() {
    let mut rng = rng();
    let config = AttentionConfig::new(4, 1).causal();
    let mut attention = MultiHeadAttention::new(config, &kind(), &mut rng).unwrap();
    let x = uniform(3, 4, 1.0, &mut rng).unwrap();
    attention.forward(&x).unwrap();

    let s = attention.attention_weights(0).unwrap();
    assert_eq!(s.at(0, 0), 1.0);
    assert_eq!(s.at(0, 1), 0.0);
    assert_eq!(s.at(1, 2), 0.0);
    for row in 0..3 {
        assert!((s.row_vec(row).iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_gradients_embedding() {
    let mut rng = rng();
    let mut embedding = Embedding::new(6, 3, true, &kind(), &mut rng).unwrap();
    let tokens = Matrix::column(&[1.0, 4.0, 1.0, 0.0]).unwrap();
    let config = GradCheckConfig {
        check_input: false,
        ..GradCheckConfig::default()
    };
    let report = check_layer(&mut embedding, &tokens, &config, &mut rng).unwrap();
    assert_passes("embedding", &report);
}

#[test]
fn test_gradients_projection_and_feedforward() {
    let mut rng = rng();
    let mut projection = Projection::new(4, 3, &kind(), &mut rng).unwrap();
    let x = uniform(5, 4, 1.0, &mut rng).unwrap();
    check("projection", &mut projection, &x);

    let mut ffn = FeedForward::new(4, 6, &kind(), &mut rng).unwrap();
    check("feedforward", &mut ffn, &x);
}

#[test]
fn test_gradients_sequential() {
    let mut rng = rng();
    let mut model = Sequential::new();
    model
        .push(Dense::new(3, 5, Activation::Tanh, &kind(), &mut rng).unwrap())
        .push(Dense::new(5, 2, Activation::Sigmoid, &kind(), &mut rng).unwrap());
    let x = uniform(3, 4, 1.0, &mut rng).unwrap();
    check("sequential", &mut model, &x);
}

#[test]
fn test_gradients_transformer_block() {
    let mut rng = rng();
    let config = AttentionConfig::new(4, 2).causal();
    let mut block = transformer_block(config, 6, &kind(), &mut rng).unwrap();
    assert_eq!(block.len(), 4);
    let x = uniform(3, 4, 1.0, &mut rng).unwrap();
    check("transformer block", &mut block, &x);
}

#[test]
fn test_gradients_softmax_cross_entropy() {
    let mut rng = rng();
    let mut xent = SoftmaxCrossEntropy::new();
    xent.set_targets(vec![Target::Class(1), Target::Ignore, Target::Class(3)]);
    let logits = uniform(3, 4, 2.0, &mut rng).unwrap();
    let report = check_loss(&mut xent, &logits, &GradCheckConfig::default()).unwrap();
    assert_passes("softmax_xent", &report);
}

#[test]
fn test_gradients_mean_squared_error() {
    let mut rng = rng();
    let mut mse = MeanSquaredError::new();
    mse.set_target(uniform(2, 3, 1.0, &mut rng).unwrap());
    let prediction = uniform(2, 3, 1.0, &mut rng).unwrap();
    let report = check_loss(&mut mse, &prediction, &GradCheckConfig::default()).unwrap();
    assert_passes("mse", &report);
}

#[test]
fn test_gradients_through_a_loss() {
    let mut rng = rng();
    let mut model = Sequential::new();
    model
        .push(Projection::new(4, 6, &kind(), &mut rng).unwrap())
        .push(LayerNorm::new(6, &kind()).unwrap())
        .push(Projection::new(6, 3, &kind(), &mut rng).unwrap());
    let mut xent = SoftmaxCrossEntropy::new();
    xent.set_targets(vec![Target::Class(0), Target::Class(2)]);
    let x = uniform(2, 4, 1.0, &mut rng).unwrap();

    let report = check_with_loss(&mut model, &mut xent, &x, &GradCheckConfig::default()).unwrap();
    assert_passes("projection stack with cross-entropy", &report);
}

/// Hands its input the negated gradient of the projection it wraps.
struct Flipped(Projection);

impl Layer for Flipped {
    fn kind(&self) -> &'static str {
        "flipped"
    }

    fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        self.0.forward(input)
    }

    fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        Ok(self.0.backward(grad)?.scale(-1.0))
    }

    fn params(&self) -> Vec<&Parameter> {
        self.0.params()
    }

    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.0.params_mut()
    }

    fn meta(&self) -> Vec<usize> {
        self.0.meta()
    }
}

#[test]
fn test_gradient_check_catches_a_sign_error() {
    let mut rng = rng();
    let mut flipped = Flipped(Projection::new(4, 3, &kind(), &mut rng).unwrap());
    let x = uniform(5, 4, 1.0, &mut rng).unwrap();
    let report = check_layer(&mut flipped, &x, &GradCheckConfig::default(), &mut rng).unwrap();

    assert!(!report.passed());
    let failures = report.failures();
    assert!(failures.iter().all(|c| c.site == Site::Input));
    assert_eq!(failures.len(), x.len());
    // magnitudes agree, only the sign is wrong
    assert!(report.worst_ratio() < 1e-4);
}

#[test]
fn test_gradients_dropout() {
    let mut rng = rng();
    let x = uniform(4, 5, 1.0, &mut rng).unwrap();

    let mut dropout = Dropout::new(0.6, &mut rng).unwrap();
    dropout.hold_mask(true);
    check("dropout training", &mut dropout, &x);
    let mask = dropout.mask().unwrap();
    assert!(mask.to_row_major().iter().all(|&m| m == 0.0 || m == 1.0));

    dropout.set_training(false);
    check("dropout inference", &mut dropout, &x);
}

#[test]
fn test_gradients_through_a_reshape() {
    let mut rng = rng();
    let conv = Conv2dConfig::new(1, 2, 4, 4, 3);
    let mut model = Sequential::new();
    model
        .push(Conv2d::new(conv, &kind(), &mut rng).unwrap())
        .push(MaxPool2d::new(PoolConfig::new(2, 2, 2, 2)).unwrap())
        .push(Reshape::flatten((1, 2)).unwrap())
        .push(Dense::new(2, 3, Activation::Tanh, &kind(), &mut rng).unwrap());
    let x = uniform(16, 1, 1.0, &mut rng).unwrap();
    assert_eq!(model.forward(&x).unwrap().shape(), (3, 1));
    check("conv, pool, reshape, dense", &mut model, &x);
}

#[test]
fn test_gradients_multilabel() {
    let mut rng = rng();
    let targets = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0];
    let targets = Matrix::from_rows(3, 4, &targets).unwrap();

    let mut labels = MultiLabel::new();
    labels.set_targets(targets.clone()).unwrap();
    let logits = uniform(3, 4, 2.0, &mut rng).unwrap();
    let report = check_loss(&mut labels, &logits, &GradCheckConfig::default()).unwrap();
    assert_passes("multilabel", &report);

    let mut projection = Projection::new(5, 4, &kind(), &mut rng).unwrap();
    let x = uniform(3, 5, 1.0, &mut rng).unwrap();
    let config = GradCheckConfig::default();
    let report = check_with_loss(&mut projection, &mut labels, &x, &config).unwrap();
    assert_passes("projection with multilabel", &report);
}

/// A `1 × 1` projection fed `x = 1`: every backward accumulates exactly the upstream gradient.
fn scalar_projection(kind: &OptimizerKind) -> Projection {
    Projection::with_weights(Matrix::filled(1, 1, 1.0).unwrap(), kind)
}

/// One forward, backward and update with upstream gradient `g`; returns the new weight.
fn train_step(projection: &mut Projection, g: f64) -> f64 {
    projection.forward(&Matrix::filled(1, 1, 1.0).unwrap()).unwrap();
    projection.backward(&Matrix::filled(1, 1, g).unwrap()).unwrap();
    assert_eq!(projection.weights().grad().at(0, 0), g);
    projection.update().unwrap();
    assert_eq!(projection.weights().grad().at(0, 0), 0.0);
    projection.weights().value().at(0, 0)
}

#[test]
fn test_sgd_steps() {
    let mut projection = scalar_projection(&OptimizerKind::Sgd { learning_rate: 0.5 });
    assert_eq!(train_step(&mut projection, 2.0), 0.0);
    assert_eq!(train_step(&mut projection, -1.0), 0.5);
}

#[test]
fn test_adam_bias_correction_advances_once_per_update() {
    let kind = OptimizerKind::Adam(AdamConfig {
        learning_rate: 0.1,
        ..AdamConfig::default()
    });
    let mut projection = scalar_projection(&kind);

    // m̂ = g and v̂ = g² after one step, so the first move is lr·g/(|g| + ε)
    let w = train_step(&mut projection, 2.0);
    assert!((w - 0.9000000049999998).abs() < 1e-12, "{w}");

    // second step corrects with 1 - β1² and 1 - β2²
    let w = train_step(&mut projection, -1.0);
    assert!((w - 0.8733663027186758).abs() < 1e-12, "{w}");
}

#[test]
fn test_rprop_backtracks_on_a_sign_flip() {
    let mut projection = scalar_projection(&OptimizerKind::Rprop(RpropConfig::default()));

    let w = train_step(&mut projection, 2.0);
    assert!((w - 0.99).abs() < 1e-12, "{w}");
    // same sign: the step grows to 0.012
    let w = train_step(&mut projection, 3.0);
    assert!((w - 0.978).abs() < 1e-12, "{w}");
    // flip: undo the last move, shrink the step to 0.006
    let w = train_step(&mut projection, -1.0);
    assert!((w - 0.99).abs() < 1e-12, "{w}");
    // fresh start with the shrunken step
    let w = train_step(&mut projection, -1.0);
    assert!((w - 0.996).abs() < 1e-12, "{w}");
}

#[test]
fn test_backward_requires_forward() {
    let mut rng = rng();
    let mut dense = Dense::new(2, 2, Activation::Tanh, &kind(), &mut rng).unwrap();
    let g = Matrix::new(2, 1).unwrap();
    assert!(matches!(dense.backward(&g), Err(AntError::MissingActivation { .. })));

    let mut pool = MaxPool2d::new(PoolConfig::new(1, 2, 2, 2)).unwrap();
    assert!(matches!(
        pool.backward(&Matrix::new(1, 1).unwrap()),
        Err(AntError::MissingActivation { .. })
    ));
}

#[test]
fn test_backward_accumulates() {
    let w = Matrix::from_rows(1, 2, &[0.5, -0.5]).unwrap();
    let mut dense =
        Dense::with_weights(w, Matrix::new(1, 1).unwrap(), Activation::Identity, &kind()).unwrap();
    let x = Matrix::column(&[1.0, 3.0]).unwrap();
    let g = Matrix::filled(1, 1, 1.0).unwrap();

    dense.forward(&x).unwrap();
    dense.backward(&g).unwrap();
    dense.backward(&g).unwrap();
    assert_eq!(dense.weights().grad().to_row_major(), vec![2.0, 6.0]);
    assert_eq!(dense.bias().grad().at(0, 0), 2.0);
}

#[test]
fn test_update_clears_every_accumulator() {
    let mut rng = rng();
    for kind in [
        OptimizerKind::Sgd { learning_rate: 0.1 },
        OptimizerKind::Rprop(RpropConfig::default()),
        OptimizerKind::Adam(AdamConfig::default()),
    ] {
        let mut block = transformer_block(AttentionConfig::new(4, 2), 8, &kind, &mut rng).unwrap();
        let x = uniform(3, 4, 1.0, &mut rng).unwrap();
        let y = block.forward(&x).unwrap();
        block.backward(&y).unwrap();
        assert!(block.params().iter().any(|p| p.grad().frobenius() > 0.0));

        block.update().unwrap();
        for p in block.params() {
            assert!(p.grad().to_row_major().iter().all(|&g| g == 0.0), "{kind:?}");
        }
    }
}

#[test]
fn test_update_without_backward_is_accepted() {
    let w = Matrix::from_rows(1, 2, &[0.5, -0.5]).unwrap();
    let kind = OptimizerKind::Sgd { learning_rate: 1.0 };
    let mut dense =
        Dense::with_weights(w, Matrix::new(1, 1).unwrap(), Activation::Identity, &kind).unwrap();
    dense.update().unwrap();
    dense.update().unwrap();
    assert_eq!(dense.weights().value().to_row_major(), vec![0.5, -0.5]);
}

#[test]
fn test_training_reduces_the_loss() {
    let mut rng = rng();
    let kind = OptimizerKind::Adam(AdamConfig {
        learning_rate: 0.05,
        ..AdamConfig::default()
    });
    let mut model = Sequential::new();
    model
        .push(Projection::new(3, 8, &kind, &mut rng).unwrap())
        .push(ActivationLayer::new(Activation::Tanh))
        .push(Projection::new(8, 3, &kind, &mut rng).unwrap());
    let mut xent = SoftmaxCrossEntropy::new();
    let x = Matrix::identity(3).unwrap();
    let targets = vec![Target::Class(2), Target::Class(0), Target::Class(1)];
    let one = Matrix::filled(1, 1, 1.0).unwrap();

    let mut first = None;
    let mut last = 0.0;
    for _ in 0..200 {
        let logits = model.forward(&x).unwrap();
        last = xent.evaluate(&logits, targets.clone()).unwrap();
        first.get_or_insert(last);
        let g = xent.backward(&one).unwrap();
        model.backward(&g).unwrap();
        model.update().unwrap();
    }
    assert!(last < first.unwrap() / 10.0, "loss went from {first:?} to {last}");

    xent.reset_stats();
    xent.evaluate(&model.forward(&x).unwrap(), targets).unwrap();
    assert_eq!(xent.accuracy(), 1.0);
}

#[test]
fn test_embedding_update_is_sparse() {
    let table = Matrix::from_rows(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]).unwrap();
    let kind = OptimizerKind::Adam(AdamConfig::default());
    let mut embedding = Embedding::with_table(table, false, &kind);
    embedding.embed(&[2, 2]).unwrap();
    embedding.backward(&Matrix::filled(2, 2, 1.0).unwrap()).unwrap();
    embedding.update().unwrap();

    let after = embedding.table().value();
    assert_eq!(after.row_vec(0), vec![1.0, 1.0]);
    assert_eq!(after.row_vec(1), vec![2.0, 2.0]);
    assert!(after.at(2, 0) < 3.0);
}

#[test]
fn test_shape_mismatch_is_reported() {
    let mut rng = rng();
    let mut projection = Projection::new(4, 3, &kind(), &mut rng).unwrap();
    assert!(matches!(
        projection.forward(&Matrix::new(2, 5).unwrap()),
        Err(AntError::DimensionMismatch { .. })
    ));
    let mut conv = Conv2d::new(Conv2dConfig::new(1, 1, 3, 3, 2), &kind(), &mut rng).unwrap();
    assert!(conv.forward(&Matrix::new(8, 1).unwrap()).is_err());
}

#[test]
fn test_parameter_counts() {
    let mut rng = rng();
    let block = transformer_block(AttentionConfig::new(4, 2), 6, &kind(), &mut rng).unwrap();
    // 2 heads × (3 × 4×2 + 2×4), two 1×4 affine pairs, 4×6 + 6×4
    assert_eq!(block.parameter_count(), 2 * (3 * 8 + 8) + 2 * 8 + 48);
}
