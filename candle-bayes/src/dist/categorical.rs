use candle_core::{DType, Device, Shape, Tensor, D};
use candle_nn::ops;
use rand::Rng;

use super::{ensure_finite, max_f64, min_f64};
use crate::error::{BayesError, Result};

/// Categorical distribution over the last dimension of `logits`
///
/// Values are class indices stored in the logits' float dtype,
/// with the batch shape `logits.dims()[..rank - 1]`.
#[derive(Clone, Debug)]
pub struct Categorical {
    logits: Tensor,
    batch_shape: Shape,
}

impl Categorical {
    /// * `logits` - unnormalized log-probabilities (.., n_classes)
    pub fn new(logits: &Tensor) -> Result<Self> {
        let dims = logits.dims();
        if dims.is_empty() || dims[dims.len() - 1] == 0 {
            return Err(BayesError::Validation {
                family: "Categorical",
                reason: format!("logits need a non-empty class dimension, got {:?}", dims),
            });
        }
        ensure_finite("Categorical", "logits", logits)?;
        let batch_shape = Shape::from(dims[..dims.len() - 1].to_vec());
        Ok(Self {
            logits: logits.clone(),
            batch_shape,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.logits.dims()[self.logits.rank() - 1]
    }

    pub fn batch_shape(&self) -> &Shape {
        &self.batch_shape
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    /// Inverse-CDF draw per batch element, detached
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Tensor> {
        let k = self.num_classes();
        let probs = ops::softmax(&self.logits.detach(), D::Minus1)?
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F64)?
            .flatten_all()?
            .to_vec1::<f64>()?;

        let draws: Vec<f64> = probs
            .chunks(k)
            .map(|row| {
                let u: f64 = rng.random();
                let mut acc = 0.0;
                let mut pick = k - 1;
                for (j, &p) in row.iter().enumerate() {
                    acc += p;
                    if u < acc {
                        pick = j;
                        break;
                    }
                }
                pick as f64
            })
            .collect();

        Ok(Tensor::from_vec(draws, self.batch_shape.clone(), &Device::Cpu)?
            .to_dtype(self.logits.dtype())?
            .to_device(self.logits.device())?)
    }

    /// log_softmax(logits)[value]
    pub fn log_density(&self, value: &Tensor) -> Result<Tensor> {
        if value.shape() != &self.batch_shape {
            return Err(BayesError::shape(format!(
                "categorical value {:?} vs batch shape {:?}",
                value.dims(),
                self.batch_shape.dims()
            )));
        }
        let k = self.num_classes() as f64;
        if value.elem_count() > 0 {
            let lo = min_f64(value)?;
            let hi = max_f64(value)?;
            let fractional = max_f64(&(value - value.floor()?)?.abs()?)?;
            if lo < 0.0 || hi >= k || fractional > 0.0 {
                return Err(BayesError::Domain {
                    family: "Categorical",
                    reason: format!("class indices must be integers in [0, {})", k),
                });
            }
        }
        let log_p = ops::log_softmax(&self.logits, D::Minus1)?;
        let index = value.to_dtype(DType::U32)?.unsqueeze(D::Minus1)?;
        Ok(log_p.gather(&index, D::Minus1)?.squeeze(D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_log_density_picks_class() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[0f64, 1f64.ln(), 2f64.ln()], [3f64.ln(), 0., 0.]], &dev)?;
        let cat = Categorical::new(&logits)?;
        assert_eq!(cat.batch_shape().dims(), &[2]);

        let lp = cat
            .log_density(&Tensor::new(&[2f64, 0.], &dev)?)?
            .to_vec1::<f64>()?;
        approx::assert_abs_diff_eq!(lp[0], (2.0f64 / 4.0).ln(), epsilon = 1e-10);
        approx::assert_abs_diff_eq!(lp[1], (3.0f64 / 5.0).ln(), epsilon = 1e-10);

        assert!(matches!(
            cat.log_density(&Tensor::new(&[3f64, 0.], &dev)?),
            Err(BayesError::Domain { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_sample_respects_point_mass() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[-50f32, 50., -50.], [50., -50., -50.]], &dev)?;
        let mut rng = StdRng::seed_from_u64(5);
        let x = Categorical::new(&logits)?.sample(&mut rng)?;
        assert_eq!(x.to_vec1::<f32>()?, vec![1., 0.]);
        Ok(())
    }
}
