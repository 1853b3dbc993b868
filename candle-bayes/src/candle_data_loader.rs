use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{BayesError, Result};

/// One minibatch of inputs and (optional) targets
pub struct MinibatchData {
    pub input: Tensor,
    pub output: Option<Tensor>,
}

/// In-memory data set: rows of `input` (and `output`) are examples
pub struct InMemoryData {
    input: Tensor,
    output: Option<Tensor>,
    minibatches: Minibatches,
}

impl InMemoryData {
    pub fn new(input: Tensor) -> Result<Self> {
        let n = input.dim(0)?;
        Ok(Self {
            input,
            output: None,
            minibatches: Minibatches::new(n),
        })
    }

    pub fn new_with_output(input: Tensor, output: Tensor) -> Result<Self> {
        let (n, n_out) = (input.dim(0)?, output.dim(0)?);
        if n != n_out {
            return Err(BayesError::shape(format!(
                "{} input rows vs. {} output rows",
                n, n_out
            )));
        }
        Ok(Self {
            input,
            output: Some(output),
            minibatches: Minibatches::new(n),
        })
    }

    pub fn num_data(&self) -> usize {
        self.minibatches.size()
    }

    pub fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    pub fn shuffle_minibatch<R: Rng + ?Sized>(&mut self, batch_size: usize, rng: &mut R) -> Result<()> {
        if batch_size == 0 {
            return Err(BayesError::invalid_argument("batch_size", "must be positive"));
        }
        self.minibatches.shuffle_minibatch(batch_size, rng);
        Ok(())
    }

    pub fn minibatch_data(&self, batch_idx: usize, target_device: &Device) -> Result<MinibatchData> {
        let chunk = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            BayesError::invalid_argument(
                "batch_idx",
                format!(
                    "invalid index = {} vs. total # = {}; shuffle first",
                    batch_idx,
                    self.num_minibatch()
                ),
            )
        })?;

        let idx = Tensor::from_slice(chunk, chunk.len(), self.input.device())?;
        let input = self.input.index_select(&idx, 0)?.to_device(target_device)?;
        let output = match &self.output {
            Some(out) => Some(out.index_select(&idx, 0)?.to_device(target_device)?),
            None => None,
        };
        Ok(MinibatchData { input, output })
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<u32>,
    pub chunks: Vec<Vec<u32>>,
}

impl Minibatches {
    pub fn new(size: usize) -> Self {
        Self {
            samples: (0..size as u32).collect(),
            chunks: vec![],
        }
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn shuffle_minibatch<R: Rng + ?Sized>(&mut self, batch_size: usize, rng: &mut R) {
        self.samples.shuffle(rng);
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
    }
}
