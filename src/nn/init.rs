//! Weight initialization

use rand::Rng;

use crate::tensor::Tensor;
use crate::{Error, Result};

/// `U(-k, k)` with `k = 1 / sqrt(fan_in)`
pub(crate) fn kaiming_uniform<R: Rng + ?Sized>(
    shape: &[usize],
    fan_in: usize,
    rng: &mut R,
) -> Result<Tensor> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    let n: usize = shape.iter().product();
    let data = (0..n).map(|_| rng.random_range(-bound..=bound)).collect();
    Tensor::from_vec(data, shape)
}

pub(crate) fn check_features(in_features: usize, out_features: usize) -> Result<()> {
    if in_features == 0 || out_features == 0 {
        return Err(Error::InvalidParameter(format!(
            "features must be positive, got in={in_features} out={out_features}"
        )));
    }
    Ok(())
}

/// Input must end in `in_features`
pub(crate) fn check_input(x: &Tensor, in_features: usize) -> Result<()> {
    match x.shape().last() {
        Some(&last) if last == in_features => Ok(()),
        _ => {
            let mut expected = x.shape().to_vec();
            match expected.last_mut() {
                Some(last) => *last = in_features,
                None => expected.push(in_features),
            }
            Err(Error::shape(&expected, x.shape()))
        }
    }
}
