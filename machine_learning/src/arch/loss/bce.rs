use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

/// Predictions are clipped to `[EPSILON, 1 - EPSILON]` before taking logarithms.
pub const EPSILON: f32 = 1e-7;

/// Binary cross entropy loss function, for predictions in `[0, 1]`.
#[derive(Default, Clone, Copy, Debug)]
pub struct BinaryCrossEntropy;

impl BinaryCrossEntropy {
    /// Returns a new `BinaryCrossEntropy`.
    pub fn new() -> Self {
        Self
    }
}

fn clip(p: f32) -> f32 {
    p.clamp(EPSILON, 1. - EPSILON)
}

impl LossFn for BinaryCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&p, &y| {
                let p = clip(p);
                -(y * p.ln() + (1. - y) * (1. - p).ln())
            })
            .mean()
            .unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.len() as f32;

        Zip::from(&y_pred).and(&y).map_collect(|&p, &y| {
            let p = clip(p);
            (p - y) / (p * (1. - p) * n)
        })
    }
}

/// The fraction of predictions that fall on the same side of `0.5` as their labels.
pub fn binary_accuracy(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
    if y_pred.is_empty() {
        return 0.;
    }

    let hits = Zip::from(&y_pred)
        .and(&y)
        .fold(0usize, |acc, &p, &y| acc + ((p > 0.5) == (y > 0.5)) as usize);

    hits as f32 / y_pred.len() as f32
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn confident_right_answers_cost_little() {
        let bce = BinaryCrossEntropy::new();
        let y = array![[1.], [0.]];

        let good = bce.loss(array![[0.99], [0.01]].view(), y.view());
        let bad = bce.loss(array![[0.01], [0.99]].view(), y.view());

        assert!(good < 0.02);
        assert!(bad > 4.);
    }

    #[test]
    fn saturated_predictions_stay_finite() {
        let bce = BinaryCrossEntropy::new();
        let y_pred = array![[0.], [1.]];
        let y = array![[1.], [0.]];

        assert!(bce.loss(y_pred.view(), y.view()).is_finite());
        assert!(bce.loss_prime(y_pred.view(), y.view()).iter().all(|d| d.is_finite()));
    }

    #[test]
    fn loss_prime_matches_finite_differences() {
        let bce = BinaryCrossEntropy::new();
        let y = array![[1.], [0.], [1.]];
        let y_pred = array![[0.3], [0.6], [0.8]];
        let analytic = bce.loss_prime(y_pred.view(), y.view());

        let h = 1e-3;
        for i in 0..3 {
            let (mut up, mut down) = (y_pred.clone(), y_pred.clone());
            up[[i, 0]] += h;
            down[[i, 0]] -= h;
            let numeric = (bce.loss(up.view(), y.view()) - bce.loss(down.view(), y.view())) / (2. * h);
            assert!((analytic[[i, 0]] - numeric).abs() < 1e-2);
        }
    }

    #[test]
    fn accuracy_thresholds_at_one_half() {
        let y_pred = array![[0.7], [0.2], [0.6], [0.4]];
        let y = array![[1.], [0.], [0.], [0.]];
        assert_eq!(binary_accuracy(y_pred.view(), y.view()), 0.75);
    }
}
