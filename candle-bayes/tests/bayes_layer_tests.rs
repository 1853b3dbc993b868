use candle_bayes::bayes_layers::{
    bayes_conv2d, bayes_linear, BayesLayer, BayesLayerConfig, BayesLinear, BayesSequential,
    BayesianModule, NormalPosterior, PriorConfig, SamplePass,
};
use candle_bayes::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Activation, Conv2dConfig, Linear, VarBuilder, VarMap};

#[test]
fn test_zero_variance_linear_matches_zero_weight_linear() -> Result<()> {
    let dev = Device::Cpu;
    let w = Tensor::zeros((3, 4), DType::F32, &dev)?;
    let b = Tensor::new(&[0.5f32, -1.0, 2.0], &dev)?;
    let neg_inf_w = Tensor::full(f32::NEG_INFINITY, (3, 4), &dev)?;
    let neg_inf_b = Tensor::full(f32::NEG_INFINITY, 3, &dev)?;

    let layer = BayesLinear::from_posteriors(
        "fc",
        NormalPosterior::new(w.clone(), neg_inf_w),
        Some(NormalPosterior::new(b.clone(), neg_inf_b)),
        PriorConfig::default(),
    )?;
    let reference = Linear::new(w, Some(b));

    let x = Tensor::new(&[[1f32, 2., 3., 4.], [-1., 0., 0.5, 2.]], &dev)?;
    let expected = reference.forward(&x)?.to_vec2::<f32>()?;
    for seed in 0..5 {
        let mut pass = SamplePass::with_seed(seed);
        let y = layer.forward_sample(&x, &mut pass)?;
        assert_eq!(y.to_vec2::<f32>()?, expected);
    }
    Ok(())
}

fn mse(y: &Tensor, t: &Tensor) -> Result<Tensor> {
    Ok(y.sub(t)?.sqr()?.mean_all()?)
}

/// Layer whose weights are a point mass at `mean` with the given bias
fn point_mass_layer(name: &str, mean: &Tensor, bias: &Tensor) -> Result<BayesLinear> {
    let no_var = |t: &Tensor| Tensor::full(f64::NEG_INFINITY, t.dims(), t.device());
    BayesLinear::from_posteriors(
        name,
        NormalPosterior::new(mean.clone(), no_var(mean)?),
        Some(NormalPosterior::new(bias.clone(), no_var(bias)?)),
        PriorConfig::default(),
    )
}

#[test]
fn test_point_mass_posterior_matches_deterministic_likelihood() -> Result<()> {
    let dev = Device::Cpu;
    let w1 = ((Tensor::arange(0f64, 15., &dev)?.reshape((5, 3))? * 0.1)? - 0.7)?;
    let b1 = Tensor::new(&[0.1f64, -0.2, 0.0, 0.3, 0.05], &dev)?;
    let w2 = ((Tensor::arange(0f64, 10., &dev)?.reshape((2, 5))? * -0.05)? + 0.2)?;
    let b2 = Tensor::new(&[0.5f64, -0.5], &dev)?;

    let det1 = Linear::new(w1.clone(), Some(b1.clone()));
    let det2 = Linear::new(w2.clone(), Some(b2.clone()));

    let mut model = BayesSequential::new();
    model.push_with_act(point_mass_layer("fc1", &w1, &b1)?, Activation::Tanh);
    model.push(point_mass_layer("fc2", &w2, &b2)?);

    let x = Tensor::new(&[[0.1f64, 0.4, -0.3], [1.0, -2.0, 0.5], [0.0, 0.3, 0.3]], &dev)?;
    let t = Tensor::new(&[[1f64, 0.], [0., 1.], [0.5, 0.5]], &dev)?;

    let y_det = det2.forward(&det1.forward(&x)?.tanh()?)?;
    let expected = mse(&y_det, &t)?.to_scalar::<f64>()?;

    // any draw from a point mass is its mean
    let mut pass = SamplePass::with_seed(11);
    let y = model.forward_sample(&x, &mut pass)?;
    for (row, row_det) in y.to_vec2::<f64>()?.iter().zip(y_det.to_vec2::<f64>()?.iter()) {
        for (a, b) in row.iter().zip(row_det.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }
    approx::assert_abs_diff_eq!(mse(&y, &t)?.to_scalar::<f64>()?, expected, epsilon = 1e-12);

    // KL(point mass || N(0, 1)) diverges, and so does the full bound
    let kl = pass.total_kl()?.to_scalar::<f64>()?;
    assert!(kl.is_infinite() && kl > 0.0);
    let loss = model.elbo_estimator(&x, &t, 1, mse, 1000)?.to_scalar::<f64>()?;
    assert!(loss.is_infinite() && loss > 0.0);
    Ok(())
}

fn build_model(vb: VarBuilder) -> Result<BayesSequential> {
    let config = BayesLayerConfig::default();
    let conv = Conv2dConfig {
        padding: 1,
        ..Default::default()
    };
    let mut model = BayesSequential::new();
    model.push_with_act(
        bayes_conv2d(1, 2, 3, conv, config, vb.pp("conv1"))?,
        Activation::Relu,
    );
    model.push_deterministic(|x: &Tensor| x.flatten_from(1));
    model.push(bayes_linear(2 * 4 * 4, 3, config, vb.pp("fc1"))?);
    Ok(model)
}

#[test]
fn test_checkpoint_round_trip_keeps_names() -> Result<()> {
    let dev = Device::Cpu;
    let dir = tempfile::tempdir().map_err(candle_core::Error::wrap)?;
    let path = dir.path().join("bnn.safetensors");

    let varmap = VarMap::new();
    let model = build_model(VarBuilder::from_varmap(&varmap, DType::F32, &dev).pp("bnn"))?;
    varmap.save(&path)?;

    let mut names: Vec<String> = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(e.to_string()))?
        .keys()
        .cloned()
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "bnn.conv1.bias.logvar",
            "bnn.conv1.bias.mean",
            "bnn.conv1.weight.logvar",
            "bnn.conv1.weight.mean",
            "bnn.fc1.bias.logvar",
            "bnn.fc1.bias.mean",
            "bnn.fc1.weight.logvar",
            "bnn.fc1.weight.mean",
        ]
    );

    let mut restored_map = VarMap::new();
    let restored = build_model(VarBuilder::from_varmap(&restored_map, DType::F32, &dev).pp("bnn"))?;
    restored_map.load(&path)?;

    let x = Tensor::ones((2, 1, 4, 4), DType::F32, &dev)?;
    assert_eq!(
        model.predict(&x)?.to_vec2::<f32>()?,
        restored.predict(&x)?.to_vec2::<f32>()?
    );
    Ok(())
}
