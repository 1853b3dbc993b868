use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;

/// ε ~ N(0, I) with the given shape
///
/// Drawn on the CPU from `rng` so that a seeded pass is reproducible,
/// then converted and moved (Metal doesn't support f64 tensors).
pub fn standard_normal<R: Rng + ?Sized>(
    rng: &mut R,
    shape: &Shape,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let eps: Vec<f64> = (0..shape.elem_count())
        .map(|_| rng.sample(StandardNormal))
        .collect();
    Tensor::from_vec(eps, shape.clone(), &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)
}

/// u ~ U(0, 1) with the given shape
pub fn standard_uniform<R: Rng + ?Sized>(
    rng: &mut R,
    shape: &Shape,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let u: Vec<f64> = (0..shape.elem_count()).map(|_| rng.random()).collect();
    Tensor::from_vec(u, shape.clone(), &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_seeded_noise_is_reproducible() -> Result<()> {
        let shape = Shape::from((3, 4));
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);

        let a = standard_normal(&mut rng_a, &shape, DType::F32, &Device::Cpu)?;
        let b = standard_normal(&mut rng_b, &shape, DType::F32, &Device::Cpu)?;

        assert_eq!(a.dims(), &[3, 4]);
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_uniform_range() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(11);
        let u = standard_uniform(&mut rng, &Shape::from(1000), DType::F64, &Device::Cpu)?;
        let min: f64 = u.min_all()?.to_scalar()?;
        let max: f64 = u.max_all()?.to_scalar()?;
        assert!(min >= 0.0 && max < 1.0);
        Ok(())
    }
}
