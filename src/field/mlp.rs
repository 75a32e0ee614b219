//! Default field family: a fully connected network with analytic gradients.
//!
//! The network maps R³ → R through softplus hidden layers and a linear
//! output; the unsigned distance is the absolute value of the output.
//! Everything the trainer needs is computed in closed form:
//!
//! - forward:        f(x) = |W_L · φ(... φ(W_0 x + b_0) ...) + b_L|
//! - spatial grad:   reverse accumulation of the scalar output w.r.t. x
//! - param grad:     reverse accumulation of Σ cᵢ f(xᵢ) w.r.t. (W, b)
//!
//! with φ = softplus and φ' = sigmoid. All three are cross-checked against
//! finite differences in the tests below; a silent gradient bug is the one
//! failure mode this file must not have.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{DistanceField, TrainableField};

/// Network shape and initialization seed.
#[derive(Debug, Clone)]
pub struct MlpConfig {
    /// Hidden layer widths, input (3) and output (1) excluded.
    pub hidden: Vec<usize>,
    pub seed: u64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden: vec![64, 64, 64, 64],
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Layer {
    w_off: usize,
    b_off: usize,
    fan_in: usize,
    fan_out: usize,
}

/// Fully connected unsigned-distance network with a flat parameter vector.
///
/// Weights are stored row-major per layer (`w[i * fan_in + j]` is the weight
/// from input j to output i), followed by the biases, so the whole network
/// is one `Vec<f32>` the optimizer can step over.
pub struct MlpField {
    layers: Vec<Layer>,
    hidden: Vec<usize>,
    params: Vec<f32>,
}

/// Numerically stable softplus: ln(1 + e^x).
fn softplus(x: f32) -> f32 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// d softplus / dx = sigmoid(x).
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl MlpField {
    pub fn new(cfg: &MlpConfig) -> Self {
        let (layers, total) = layout(&cfg.hidden);

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut params = vec![0.0f32; total];
        for layer in &layers {
            let bound = 1.0 / (layer.fan_in as f32).sqrt();
            for w in &mut params[layer.w_off..layer.w_off + layer.fan_out * layer.fan_in] {
                *w = rng.gen_range(-bound..bound);
            }
            // Biases start at zero.
        }

        Self {
            layers,
            hidden: cfg.hidden.clone(),
            params,
        }
    }

    /// Rebuild a network from a checkpointed parameter vector.
    ///
    /// Panics if `params` does not match the layout implied by `hidden`;
    /// callers validate lengths when decoding the checkpoint.
    pub fn from_params(hidden: &[usize], params: Vec<f32>) -> Self {
        let (layers, total) = layout(hidden);
        assert_eq!(
            params.len(),
            total,
            "parameter vector does not match network layout"
        );
        Self {
            layers,
            hidden: hidden.to_vec(),
            params,
        }
    }

    pub fn hidden(&self) -> &[usize] {
        &self.hidden
    }

    /// Expected parameter count for a given hidden layout.
    pub fn param_count(hidden: &[usize]) -> usize {
        layout(hidden).1
    }

    /// Forward pass for one point, returning the raw (signed) output and,
    /// when `cache` is set, the pre-activations and activations per layer.
    fn forward(
        &self,
        p: &Vector3<f32>,
        mut cache: Option<&mut Caches>,
    ) -> f32 {
        let mut h = vec![p.x, p.y, p.z];
        if let Some(c) = cache.as_deref_mut() {
            c.acts.clear();
            c.pres.clear();
            c.acts.push(h.clone());
        }

        let last = self.layers.len() - 1;
        for (l, layer) in self.layers.iter().enumerate() {
            let mut s = vec![0.0f32; layer.fan_out];
            for i in 0..layer.fan_out {
                let row = &self.params[layer.w_off + i * layer.fan_in
                    ..layer.w_off + (i + 1) * layer.fan_in];
                let mut acc = self.params[layer.b_off + i];
                for (w, x) in row.iter().zip(h.iter()) {
                    acc += w * x;
                }
                s[i] = acc;
            }

            if let Some(c) = cache.as_deref_mut() {
                c.pres.push(s.clone());
            }

            if l == last {
                return s[0];
            }

            h = s.iter().map(|&v| softplus(v)).collect();
            if let Some(c) = cache.as_deref_mut() {
                c.acts.push(h.clone());
            }
        }
        unreachable!("network has at least one layer");
    }

    /// Reverse pass from an output cotangent down to the input, optionally
    /// scattering parameter gradients along the way.
    ///
    /// Returns dL/d(input). `cache` must come from a `forward` call on the
    /// same point.
    fn backward(
        &self,
        cache: &Caches,
        out_cotangent: f32,
        mut grads: Option<&mut [f32]>,
    ) -> Vector3<f32> {
        let mut d_s = vec![out_cotangent];
        for l in (0..self.layers.len()).rev() {
            let layer = &self.layers[l];
            let h_in = &cache.acts[l];

            if let Some(g) = grads.as_deref_mut() {
                for i in 0..layer.fan_out {
                    let ds = d_s[i];
                    if ds != 0.0 {
                        let row = &mut g[layer.w_off + i * layer.fan_in
                            ..layer.w_off + (i + 1) * layer.fan_in];
                        for (slot, x) in row.iter_mut().zip(h_in.iter()) {
                            *slot += ds * x;
                        }
                        g[layer.b_off + i] += ds;
                    }
                }
            }

            let mut d_prev = vec![0.0f32; layer.fan_in];
            for i in 0..layer.fan_out {
                let ds = d_s[i];
                if ds != 0.0 {
                    let row = &self.params[layer.w_off + i * layer.fan_in
                        ..layer.w_off + (i + 1) * layer.fan_in];
                    for (slot, w) in d_prev.iter_mut().zip(row.iter()) {
                        *slot += ds * w;
                    }
                }
            }

            if l == 0 {
                return Vector3::new(d_prev[0], d_prev[1], d_prev[2]);
            }

            // Chain through the softplus of the previous layer.
            let pre = &cache.pres[l - 1];
            d_s = d_prev
                .iter()
                .zip(pre.iter())
                .map(|(&d, &s)| d * sigmoid(s))
                .collect();
        }
        unreachable!("network has at least one layer");
    }
}

#[derive(Default)]
struct Caches {
    /// Activations entering each layer; acts[0] is the input point.
    acts: Vec<Vec<f32>>,
    /// Pre-activations of each layer.
    pres: Vec<Vec<f32>>,
}

/// Compute per-layer parameter offsets for a hidden layout.
fn layout(hidden: &[usize]) -> (Vec<Layer>, usize) {
    let mut dims = Vec::with_capacity(hidden.len() + 2);
    dims.push(3);
    dims.extend_from_slice(hidden);
    dims.push(1);

    let mut layers = Vec::with_capacity(dims.len() - 1);
    let mut off = 0usize;
    for pair in dims.windows(2) {
        let (fan_in, fan_out) = (pair[0], pair[1]);
        let layer = Layer {
            w_off: off,
            b_off: off + fan_out * fan_in,
            fan_in,
            fan_out,
        };
        off = layer.b_off + fan_out;
        layers.push(layer);
    }
    (layers, off)
}

impl DistanceField for MlpField {
    fn distance(&self, points: &[Vector3<f32>]) -> Vec<f32> {
        points
            .par_iter()
            .map(|p| self.forward(p, None).abs())
            .collect()
    }

    fn gradient(&self, points: &[Vector3<f32>]) -> Vec<Vector3<f32>> {
        points
            .par_iter()
            .map(|p| {
                let mut cache = Caches::default();
                let raw = self.forward(p, Some(&mut cache));
                self.backward(&cache, raw.signum(), None)
            })
            .collect()
    }
}

impl TrainableField for MlpField {
    fn num_params(&self) -> usize {
        self.params.len()
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn accumulate(&self, points: &[Vector3<f32>], cotangents: &[f32], grads: &mut [f32]) {
        assert_eq!(points.len(), cotangents.len());
        assert_eq!(grads.len(), self.params.len());

        let mut cache = Caches::default();
        for (p, &c) in points.iter().zip(cotangents.iter()) {
            if c == 0.0 {
                continue;
            }
            let raw = self.forward(p, Some(&mut cache));
            // d|s|/ds folds into the output cotangent.
            self.backward(&cache, c * raw.signum(), Some(grads));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rel_err(a: f32, b: f32) -> f32 {
        let denom = a.abs().max(b.abs()).max(1e-5);
        (a - b).abs() / denom
    }

    fn small_net(seed: u64) -> MlpField {
        MlpField::new(&MlpConfig {
            hidden: vec![8, 8],
            seed,
        })
    }

    #[test]
    fn test_init_is_deterministic() {
        let a = small_net(42);
        let b = small_net(42);
        assert_eq!(a.params(), b.params());

        let c = small_net(43);
        assert_ne!(a.params(), c.params());
    }

    #[test]
    fn test_param_count_matches_layout() {
        // 3->8: 32, 8->8: 72, 8->1: 9.
        assert_eq!(MlpField::param_count(&[8, 8]), 32 + 72 + 9);
        let net = small_net(0);
        assert_eq!(net.num_params(), 113);
    }

    /// Shift the output-layer bias (the last parameter) so the raw output
    /// sits well clear of the |.| kink at zero.
    fn bias_away_from_kink(net: &mut MlpField) {
        let last = net.num_params() - 1;
        net.params_mut()[last] += 2.0;
    }

    #[test]
    fn test_spatial_gradient_matches_finite_difference() {
        let mut net = small_net(7);
        bias_away_from_kink(&mut net);
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..30 {
            let p = Vector3::new(
                rng.gen_range(-0.5..0.5f32),
                rng.gen_range(-0.5..0.5f32),
                rng.gen_range(-0.5..0.5f32),
            );
            let d = net.distance(&[p])[0];
            // The |.| output has a kink at zero; finite differences are only
            // meaningful away from it.
            if d < 1e-2 {
                continue;
            }

            let ana = net.gradient(&[p])[0];
            let eps = 5e-3f32;
            for axis in 0..3 {
                let mut hi = p;
                let mut lo = p;
                hi[axis] += eps;
                lo[axis] -= eps;
                let num =
                    (net.distance(&[hi])[0] - net.distance(&[lo])[0]) / (2.0 * eps);
                assert!(
                    rel_err(num, ana[axis]) < 2e-2 || (num - ana[axis]).abs() < 1e-4,
                    "spatial grad mismatch axis {axis}: num={num} ana={}",
                    ana[axis]
                );
            }
        }
    }

    #[test]
    fn test_parameter_gradient_matches_finite_difference() {
        let mut net = small_net(11);
        bias_away_from_kink(&mut net);
        // Pick probe points away from the |.| kink so central differences
        // stay one-sided-smooth.
        let pool: Vec<Vector3<f32>> = (0..20)
            .map(|i| {
                let t = i as f32 * 0.41;
                Vector3::new(t.sin() * 0.4, t.cos() * 0.4, (t * 0.6).sin() * 0.4)
            })
            .collect();
        let dists = net.distance(&pool);
        let points: Vec<Vector3<f32>> = pool
            .into_iter()
            .zip(dists.iter())
            .filter(|(_, &d)| d > 0.05)
            .map(|(p, _)| p)
            .take(3)
            .collect();
        assert!(
            points.len() == 3,
            "seed produced too few probe points clear of the zero set"
        );
        let cot = vec![1.0f32, -0.5, 0.7];

        let mut ana = vec![0.0f32; net.num_params()];
        net.accumulate(&points, &cot, &mut ana);

        let objective = |net: &MlpField| -> f32 {
            net.distance(&points)
                .iter()
                .zip(cot.iter())
                .map(|(d, c)| d * c)
                .sum()
        };

        let mut rng = StdRng::seed_from_u64(5);
        let eps = 1e-3f32;
        for _ in 0..40 {
            let k = rng.gen_range(0..net.num_params());
            let orig = net.params()[k];
            net.params_mut()[k] = orig + eps;
            let hi = objective(&net);
            net.params_mut()[k] = orig - eps;
            let lo = objective(&net);
            net.params_mut()[k] = orig;

            let num = (hi - lo) / (2.0 * eps);
            assert!(
                rel_err(num, ana[k]) < 2e-2 || (num - ana[k]).abs() < 1e-4,
                "param grad mismatch at {k}: num={num} ana={}",
                ana[k]
            );
        }
    }

    #[test]
    fn test_accumulate_skips_zero_cotangents() {
        let net = small_net(3);
        let points = vec![Vector3::new(0.1, 0.2, 0.3)];
        let mut grads = vec![0.0f32; net.num_params()];
        net.accumulate(&points, &[0.0], &mut grads);
        assert!(grads.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_distance_is_nonnegative() {
        let net = small_net(21);
        let points: Vec<Vector3<f32>> = (0..50)
            .map(|i| {
                let t = i as f32 * 0.13;
                Vector3::new(t.sin() * 0.5, t.cos() * 0.5, (t * 0.7).sin() * 0.5)
            })
            .collect();
        for d in net.distance(&points) {
            assert!(d >= 0.0);
        }
    }

    #[test]
    fn test_from_params_roundtrip() {
        let net = small_net(17);
        let clone = MlpField::from_params(net.hidden(), net.params().to_vec());
        let p = vec![Vector3::new(0.3, 0.3, -0.3)];
        assert_relative_eq!(net.distance(&p)[0], clone.distance(&p)[0], epsilon = 1e-7);
    }
}
