use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

pub type Tensor = ArrayD<f32>;

/// Uniform `[0, 1)` tensor from a fixed seed.
pub fn random_uniform(shape: &[usize], seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.r#gen::<f32>())
}

/// Largest element-wise absolute difference, `None` on shape mismatch.
pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Option<f32> {
    if a.shape() != b.shape() {
        return None;
    }
    let (Some(sa), Some(sb)) = (a.as_slice(), b.as_slice()) else {
        return Some(
            a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max),
        );
    };
    Some(
        sa.par_iter()
            .zip(sb.par_iter())
            .map(|(x, y)| (x - y).abs())
            .reduce(|| 0.0, f32::max),
    )
}

/// Observed `(min, max)` over all elements.
pub fn value_range(t: &Tensor) -> (f32, f32) {
    t.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_tensors_are_reproducible() {
        let a = random_uniform(&[2, 3], 7);
        let b = random_uniform(&[2, 3], 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn max_abs_diff_rejects_shape_mismatch() {
        let a = Tensor::zeros(IxDyn(&[2, 2]));
        let b = Tensor::zeros(IxDyn(&[4]));
        assert_eq!(max_abs_diff(&a, &b), None);

        let mut c = a.clone();
        c[[1, 0]] = -0.5;
        assert_eq!(max_abs_diff(&a, &c), Some(0.5));
    }
}
