use candle_core::{Device, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::Result;

/// Noisy copies of a few random bit patterns
///
/// * `n` - number of rows
/// * `dim` - bits per row
/// * `num_patterns` - number of prototype patterns
/// * `flip_prob` - chance of flipping each bit of a copy
pub fn binary_patterns<R: Rng + ?Sized>(
    n: usize,
    dim: usize,
    num_patterns: usize,
    flip_prob: f64,
    rng: &mut R,
    device: &Device,
) -> Result<Tensor> {
    let patterns: Vec<Vec<bool>> = (0..num_patterns.max(1))
        .map(|_| (0..dim).map(|_| rng.random::<bool>()).collect())
        .collect();

    let mut data = Vec::with_capacity(n * dim);
    for _ in 0..n {
        let pattern = &patterns[rng.random_range(0..patterns.len())];
        for &bit in pattern {
            let flip = rng.random::<f64>() < flip_prob;
            data.push(if bit != flip { 1f32 } else { 0f32 });
        }
    }
    Ok(Tensor::from_vec(data, (n, dim), device)?)
}

/// Isotropic Gaussian blobs around `num_classes` points on a circle
///
/// Returns (n, 2) features and (n,) u32 labels.
pub fn gaussian_blobs<R: Rng + ?Sized>(
    n: usize,
    num_classes: usize,
    radius: f64,
    noise_std: f64,
    rng: &mut R,
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let num_classes = num_classes.max(1);
    let mut xs = Vec::with_capacity(n * 2);
    let mut labels = Vec::with_capacity(n);

    for i in 0..n {
        let k = i % num_classes;
        let angle = 2.0 * std::f64::consts::PI * k as f64 / num_classes as f64;
        let e0: f64 = rng.sample(StandardNormal);
        let e1: f64 = rng.sample(StandardNormal);
        xs.push((radius * angle.cos() + noise_std * e0) as f32);
        xs.push((radius * angle.sin() + noise_std * e1) as f32);
        labels.push(k as u32);
    }

    let x = Tensor::from_vec(xs, (n, 2), device)?;
    let y = Tensor::from_vec(labels, n, device)?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_shapes_and_support() -> Result<()> {
        let dev = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(7);
        let x = binary_patterns(50, 8, 3, 0.1, &mut rng, &dev)?;
        assert_eq!(x.dims(), &[50, 8]);
        for v in x.flatten_all()?.to_vec1::<f32>()? {
            assert!(v == 0.0 || v == 1.0);
        }

        let (x, y) = gaussian_blobs(30, 3, 2.0, 0.3, &mut rng, &dev)?;
        assert_eq!(x.dims(), &[30, 2]);
        assert_eq!(y.to_vec1::<u32>()?[..4], [0, 1, 2, 0]);
        Ok(())
    }
}
