use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand_xoshiro::Xoshiro256Plus;

/// A structure to store (n, xdim) matrix data and its mean and standard deviation vectors.
#[derive(Debug)]
pub(crate) struct NormalizedData<F: Float> {
    /// normalized data
    pub data: Array2<F>,
    /// mean vector computed from data
    pub mean: Array1<F>,
    /// standard deviation vector computed from data
    pub std: Array1<F>,
}

impl<F: Float> Clone for NormalizedData<F> {
    fn clone(&self) -> NormalizedData<F> {
        NormalizedData {
            data: self.data.to_owned(),
            mean: self.mean.to_owned(),
            std: self.std.to_owned(),
        }
    }
}

impl<F: Float> NormalizedData<F> {
    /// Constructor
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> NormalizedData<F> {
        let (data, mean, std) = normalize(x);
        NormalizedData { data, mean, std }
    }

    /// Number of data points
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Dimension of data points
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }
}

pub(crate) fn normalize<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> (Array2<F>, Array1<F>, Array1<F>) {
    let x_mean = x.mean_axis(Axis(0)).unwrap();
    let mut x_std = x.std_axis(Axis(0), F::one());
    x_std.mapv_inplace(|v| if v == F::zero() { F::one() } else { v });
    let xnorm = (x - &x_mean) / &x_std;

    (xnorm, x_mean, x_std)
}

/// Computes the matrix of squared Euclidean distances between each row of `x`
/// and each row of `y`, resulting in a (nrows(x), nrows(y)) array.
/// *Panics* if x and y have not the same column numbers
pub fn pairwise_sq_dists<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.ncols() == y.ncols());

    let mut d2 = Array2::zeros((x.nrows(), y.nrows()));
    for (i, xi) in x.rows().into_iter().enumerate() {
        for (j, yj) in y.rows().into_iter().enumerate() {
            let mut acc = F::zero();
            for k in 0..x.ncols() {
                let diff = xi[k] - yj[k];
                acc = acc + diff * diff;
            }
            d2[[i, j]] = acc;
        }
    }
    d2
}

/// Draws a (n, t) matrix of Rademacher probe vectors (iid +/-1 entries)
/// used by stochastic trace estimation.
pub(crate) fn rademacher_probes<F: Float>(
    n: usize,
    t: usize,
    rng: &mut Xoshiro256Plus,
) -> Array2<F> {
    let u = Array2::<f64>::random_using((n, t), Uniform::new(0., 1.), rng);
    u.mapv(|v| if v < 0.5 { -F::one() } else { F::one() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn test_pairwise_sq_dists() {
        let x = array![[0., 0.], [1., 1.]];
        let y = array![[0., 0.], [3., 4.]];
        let d2 = pairwise_sq_dists(&x, &y);
        assert_abs_diff_eq!(array![[0., 25.], [2., 13.]], d2, epsilon = 1e-12);
    }

    #[test]
    fn test_normalized_matrix() {
        let x = array![[1., 2.], [3., 4.]];
        let xnorm = NormalizedData::new(&x);
        assert_eq!(xnorm.ncols(), 2);
        assert_eq!(array![2., 3.], xnorm.mean);
        assert_eq!(array![f64::sqrt(2.), f64::sqrt(2.)], xnorm.std);
    }

    #[test]
    fn test_rademacher_probes() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let z: Array2<f64> = rademacher_probes(100, 4, &mut rng);
        assert!(z.iter().all(|&v| v == 1. || v == -1.));
        // each probe has squared norm exactly n
        for col in z.columns() {
            assert_abs_diff_eq!(col.dot(&col), 100., epsilon = 1e-12);
        }
    }
}
