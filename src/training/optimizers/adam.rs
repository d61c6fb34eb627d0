//! Moment-based optimizers: Adam, Adamax and Nadam
//!
//! All three keep a first-moment estimate `m` with `beta1 = 0.9` and a
//! second-moment (or infinity-norm) estimate with `beta2 = 0.999`.

use candle_core::backprop::GradStore;
use candle_core::Var;

use super::{Optimizer, ParamSet, EPSILON};
use crate::error::Result;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;

/// Adam with the bias correction folded into the step size
pub struct Adam {
    params: ParamSet,
    learning_rate: f64,
    m: Vec<Var>,
    v: Vec<Var>,
    step_count: usize,
}

impl Adam {
    /// Create Adam with `beta1 = 0.9`, `beta2 = 0.999`
    pub fn new(params: ParamSet, learning_rate: f64) -> Result<Self> {
        Ok(Self {
            m: params.zeros_like()?,
            v: params.zeros_like()?,
            params,
            learning_rate,
            step_count: 0,
        })
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        "adam"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        let t = (self.step_count + 1) as i32;
        let lr_t = self.learning_rate * (1.0 - BETA2.powi(t)).sqrt() / (1.0 - BETA1.powi(t));

        for i in 0..self.params.len() {
            let Some(grad) = self.params.gradient(i, gradients)? else {
                continue;
            };
            let (m, v) = (&self.m[i], &self.v[i]);
            let m_t = (m.affine(BETA1, 0.0)? + grad.affine(1.0 - BETA1, 0.0)?)?;
            let v_t = (v.affine(BETA2, 0.0)? + grad.sqr()?.affine(1.0 - BETA2, 0.0)?)?;

            let denom = v_t.sqrt()?.affine(1.0, EPSILON)?;
            let update = (&m_t / denom)?.affine(lr_t, 0.0)?;
            let var = self.params.var(i);
            var.set(&(var.as_tensor() - update)?)?;
            m.set(&m_t)?;
            v.set(&v_t)?;
        }
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }
}

/// Adam variant based on the infinity norm
pub struct Adamax {
    params: ParamSet,
    learning_rate: f64,
    m: Vec<Var>,
    u: Vec<Var>,
    step_count: usize,
}

impl Adamax {
    /// Create Adamax with `beta1 = 0.9`, `beta2 = 0.999`
    pub fn new(params: ParamSet, learning_rate: f64) -> Result<Self> {
        Ok(Self {
            m: params.zeros_like()?,
            u: params.zeros_like()?,
            params,
            learning_rate,
            step_count: 0,
        })
    }
}

impl Optimizer for Adamax {
    fn name(&self) -> &str {
        "adamax"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        let t = (self.step_count + 1) as i32;
        let lr_t = self.learning_rate / (1.0 - BETA1.powi(t));

        for i in 0..self.params.len() {
            let Some(grad) = self.params.gradient(i, gradients)? else {
                continue;
            };
            let (m, u) = (&self.m[i], &self.u[i]);
            let m_t = (m.affine(BETA1, 0.0)? + grad.affine(1.0 - BETA1, 0.0)?)?;
            let u_t = u.affine(BETA2, 0.0)?.maximum(&grad.abs()?)?;

            let update = (&m_t / u_t.affine(1.0, EPSILON)?)?.affine(lr_t, 0.0)?;
            let var = self.params.var(i);
            var.set(&(var.as_tensor() - update)?)?;
            m.set(&m_t)?;
            u.set(&u_t)?;
        }
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }
}

/// Adam with Nesterov momentum and a warming momentum schedule
pub struct Nadam {
    params: ParamSet,
    learning_rate: f64,
    schedule_decay: f64,
    m_schedule: f64,
    m: Vec<Var>,
    v: Vec<Var>,
    step_count: usize,
}

impl Nadam {
    /// Create Nadam with `schedule_decay = 0.004`
    pub fn new(params: ParamSet, learning_rate: f64) -> Result<Self> {
        Ok(Self {
            m: params.zeros_like()?,
            v: params.zeros_like()?,
            params,
            learning_rate,
            schedule_decay: 0.004,
            m_schedule: 1.0,
            step_count: 0,
        })
    }

    fn momentum_cache(&self, t: f64) -> f64 {
        BETA1 * (1.0 - 0.5 * 0.96f64.powf(t * self.schedule_decay))
    }
}

impl Optimizer for Nadam {
    fn name(&self) -> &str {
        "nadam"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        let t = (self.step_count + 1) as f64;
        let cache_t = self.momentum_cache(t);
        let cache_next = self.momentum_cache(t + 1.0);
        let m_schedule_new = self.m_schedule * cache_t;
        let m_schedule_next = m_schedule_new * cache_next;
        let v_correction = 1.0 - BETA2.powf(t);

        for i in 0..self.params.len() {
            let Some(grad) = self.params.gradient(i, gradients)? else {
                continue;
            };
            let (m, v) = (&self.m[i], &self.v[i]);
            let g_prime = grad.affine(1.0 / (1.0 - m_schedule_new), 0.0)?;
            let m_t = (m.affine(BETA1, 0.0)? + grad.affine(1.0 - BETA1, 0.0)?)?;
            let m_prime = m_t.affine(1.0 / (1.0 - m_schedule_next), 0.0)?;
            let v_t = (v.affine(BETA2, 0.0)? + grad.sqr()?.affine(1.0 - BETA2, 0.0)?)?;
            let v_prime = v_t.affine(1.0 / v_correction, 0.0)?;

            let m_bar = (g_prime.affine(1.0 - cache_t, 0.0)? + m_prime.affine(cache_next, 0.0)?)?;
            let denom = v_prime.sqrt()?.affine(1.0, EPSILON)?;
            let update = (m_bar / denom)?.affine(self.learning_rate, 0.0)?;
            let var = self.params.var(i);
            var.set(&(var.as_tensor() - update)?)?;
            m.set(&m_t)?;
            v.set(&v_t)?;
        }
        self.m_schedule = m_schedule_new;
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{Init, VarBuilder, VarMap};

    fn setup() -> (VarMap, Tensor) {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(1, "w", Init::Const(0.0)).unwrap();
        (var_map, w)
    }

    fn first_step(opt: &mut dyn Optimizer, w: &Tensor, slope: f64) -> f32 {
        let grads = w.affine(slope, 0.0).unwrap().sum_all().unwrap().backward().unwrap();
        opt.step(&grads).unwrap();
        w.to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_adam_first_step_is_learning_rate() {
        // the bias-corrected first step has magnitude lr regardless of the gradient scale
        for slope in [0.5, 4.0] {
            let (var_map, w) = setup();
            let mut opt = Adam::new(ParamSet::new(&var_map, 5.0).unwrap(), 0.01).unwrap();
            assert_relative_eq!(first_step(&mut opt, &w, slope), -0.01, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_adamax_first_step_is_learning_rate() {
        let (var_map, w) = setup();
        let mut opt = Adamax::new(ParamSet::new(&var_map, 5.0).unwrap(), 0.002).unwrap();
        assert_relative_eq!(first_step(&mut opt, &w, 3.0), -0.002, epsilon = 1e-6);
    }

    #[test]
    fn test_nadam_tracks_momentum_schedule() {
        let (var_map, w) = setup();
        let mut opt = Nadam::new(ParamSet::new(&var_map, 5.0).unwrap(), 0.002).unwrap();
        let cache_1 = opt.momentum_cache(1.0);
        let position = first_step(&mut opt, &w, 1.0);
        assert!(position < 0.0);
        assert_relative_eq!(opt.m_schedule, cache_1, epsilon = 1e-12);
        assert_eq!(opt.step_count(), 1);
    }
}
