//! Gradient-descent optimizers and learning-rate schedules
//!
//! The supported optimizers form a closed set ([`OptimizerKind`]). Each one
//! follows the classic Keras update rules with `epsilon = 1e-7`, and every
//! gradient is clipped elementwise to `[-clip, clip]` before it is used.

pub mod adam;
pub mod rmsprop;
pub mod schedulers;
pub mod sgd;

pub use adam::{Adam, Adamax, Nadam};
pub use rmsprop::{Adadelta, Adagrad, RmsProp};
pub use schedulers::{PlateauScheduler, Scheduler};
pub use sgd::Sgd;

use std::fmt;
use std::str::FromStr;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fuzz factor added to every denominator
pub const EPSILON: f64 = 1e-7;

/// Trait for optimizers
pub trait Optimizer: Send {
    /// Optimizer name
    fn name(&self) -> &str;

    /// Apply one update from the gradients of the last backward pass
    fn step(&mut self, gradients: &GradStore) -> Result<()>;

    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// Replace the learning rate
    fn set_learning_rate(&mut self, lr: f64);

    /// Number of updates applied so far
    fn step_count(&self) -> usize;

    /// Number of parameter tensors being optimized
    fn parameter_count(&self) -> usize;
}

/// Supported optimizers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OptimizerKind {
    /// Plain stochastic gradient descent
    Sgd,
    /// RMSprop
    #[default]
    RmsProp,
    /// Adagrad
    Adagrad,
    /// Adadelta
    Adadelta,
    /// Adam
    Adam,
    /// Adamax
    Adamax,
    /// Nesterov Adam
    Nadam,
}

impl OptimizerKind {
    /// Every supported kind
    pub const ALL: [OptimizerKind; 7] = [
        OptimizerKind::Sgd,
        OptimizerKind::RmsProp,
        OptimizerKind::Adagrad,
        OptimizerKind::Adadelta,
        OptimizerKind::Adam,
        OptimizerKind::Adamax,
        OptimizerKind::Nadam,
    ];

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::RmsProp => "rmsprop",
            OptimizerKind::Adagrad => "adagrad",
            OptimizerKind::Adadelta => "adadelta",
            OptimizerKind::Adam => "adam",
            OptimizerKind::Adamax => "adamax",
            OptimizerKind::Nadam => "nadam",
        }
    }

    /// Learning rate used when none is configured
    pub fn default_learning_rate(&self) -> f64 {
        match self {
            OptimizerKind::Sgd => 0.01,
            OptimizerKind::RmsProp => 0.001,
            OptimizerKind::Adagrad => 0.01,
            OptimizerKind::Adadelta => 1.0,
            OptimizerKind::Adam => 0.001,
            OptimizerKind::Adamax => 0.002,
            OptimizerKind::Nadam => 0.002,
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        OptimizerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| Error::UnknownOptimizer(s.to_string()))
    }
}

impl TryFrom<String> for OptimizerKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OptimizerKind> for String {
    fn from(kind: OptimizerKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Trainable parameters in a stable order, with gradient clipping
pub struct ParamSet {
    params: Vec<(String, Var)>,
    clip: f64,
}

impl ParamSet {
    /// Collect the trainable variables of `var_map`, sorted by name.
    ///
    /// Batch-norm running statistics are excluded.
    pub fn new(var_map: &VarMap, clip: f64) -> Result<Self> {
        let data = var_map
            .data()
            .lock()
            .map_err(|_| Error::internal("parameter store lock poisoned"))?;
        let mut params: Vec<(String, Var)> = data
            .iter()
            .filter(|(name, _)| !is_running_statistic(name))
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { params, clip })
    }

    /// Number of parameter tensors
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether there is nothing to optimize
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parameter names in update order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(name, _)| name.as_str())
    }

    /// Variable at position `i`
    pub fn var(&self, i: usize) -> &Var {
        &self.params[i].1
    }

    /// Clipped gradient of parameter `i`, or `None` if it took no part in the loss
    pub fn gradient(&self, i: usize, gradients: &GradStore) -> Result<Option<Tensor>> {
        match gradients.get(self.var(i)) {
            Some(g) => Ok(Some(clip_gradient(g, self.clip)?)),
            None => Ok(None),
        }
    }

    /// One zero-filled slot per parameter
    pub fn zeros_like(&self) -> Result<Vec<Var>> {
        self.params
            .iter()
            .map(|(_, var)| Ok(Var::zeros(var.shape(), var.dtype(), var.device())?))
            .collect()
    }
}

fn is_running_statistic(name: &str) -> bool {
    name.ends_with("running_mean") || name.ends_with("running_var")
}

/// Clamp every gradient entry to `[-clip, clip]`
pub fn clip_gradient(grad: &Tensor, clip: f64) -> Result<Tensor> {
    let clip = clip as f32;
    Ok(grad.clamp(-clip, clip)?)
}

/// Build an optimizer over the trainable variables of `var_map`
pub fn create_optimizer(
    kind: OptimizerKind,
    learning_rate: Option<f64>,
    clip: f64,
    var_map: &VarMap,
) -> Result<Box<dyn Optimizer>> {
    let lr = learning_rate.unwrap_or_else(|| kind.default_learning_rate());
    if !lr.is_finite() || lr < 0.0 {
        return Err(Error::config(format!("learning rate must be >= 0, got {}", lr)));
    }
    if clip.is_nan() || clip <= 0.0 {
        return Err(Error::config(format!("clip value must be > 0, got {}", clip)));
    }

    let params = ParamSet::new(var_map, clip)?;
    let optimizer: Box<dyn Optimizer> = match kind {
        OptimizerKind::Sgd => Box::new(Sgd::new(params, lr)),
        OptimizerKind::RmsProp => Box::new(RmsProp::new(params, lr)?),
        OptimizerKind::Adagrad => Box::new(Adagrad::new(params, lr)?),
        OptimizerKind::Adadelta => Box::new(Adadelta::new(params, lr)?),
        OptimizerKind::Adam => Box::new(Adam::new(params, lr)?),
        OptimizerKind::Adamax => Box::new(Adamax::new(params, lr)?),
        OptimizerKind::Nadam => Box::new(Nadam::new(params, lr)?),
    };
    Ok(optimizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};
    use test_case::test_case;

    /// `w` initialized to `start`, stored in a fresh var map
    fn single_param(start: f32) -> (VarMap, Var) {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        vb.get_with_hints(1, "w", Init::Const(start as f64)).unwrap();
        let var = var_map.data().lock().unwrap()["w"].clone();
        (var_map, var)
    }

    fn value(var: &Var) -> f32 {
        var.as_tensor().to_vec1::<f32>().unwrap()[0]
    }

    #[test_case("sgd", OptimizerKind::Sgd)]
    #[test_case("RMSprop", OptimizerKind::RmsProp)]
    #[test_case(" adam ", OptimizerKind::Adam)]
    #[test_case("NADAM", OptimizerKind::Nadam)]
    fn test_parse_names(name: &str, expected: OptimizerKind) {
        assert_eq!(name.parse::<OptimizerKind>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_name_is_typed_error() {
        let err = "lbfgs".parse::<OptimizerKind>().unwrap_err();
        assert!(matches!(err, Error::UnknownOptimizer(ref name) if name == "lbfgs"));

        let err = serde_json::from_str::<OptimizerKind>("\"lbfgs\"").unwrap_err();
        assert!(err.to_string().contains("lbfgs"));
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        for kind in OptimizerKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
            assert_eq!(serde_json::from_str::<OptimizerKind>(&json).unwrap(), kind);
        }
    }

    #[test_case(OptimizerKind::Sgd ; "sgd")]
    #[test_case(OptimizerKind::RmsProp ; "rmsprop")]
    #[test_case(OptimizerKind::Adagrad ; "adagrad")]
    #[test_case(OptimizerKind::Adadelta ; "adadelta")]
    #[test_case(OptimizerKind::Adam ; "adam")]
    #[test_case(OptimizerKind::Adamax ; "adamax")]
    #[test_case(OptimizerKind::Nadam ; "nadam")]
    fn test_minimizes_quadratic(kind: OptimizerKind) {
        // minimize (w - 3)^2 from w = 0
        let (var_map, w) = single_param(0.0);
        let lr = match kind {
            OptimizerKind::Sgd | OptimizerKind::RmsProp => 0.05,
            OptimizerKind::Adagrad => 0.5,
            OptimizerKind::Adadelta => 50.0,
            _ => 0.1,
        };
        let mut opt = create_optimizer(kind, Some(lr), 5.0, &var_map).unwrap();
        let start = (value(&w) - 3.0).abs();
        for _ in 0..300 {
            let loss = w.as_tensor().affine(1.0, -3.0).unwrap().sqr().unwrap().sum_all().unwrap();
            let grads = loss.backward().unwrap();
            opt.step(&grads).unwrap();
        }
        let end = (value(&w) - 3.0).abs();
        assert!(end < start * 0.5, "{} did not converge: {} -> {}", kind, start, end);
        assert_eq!(opt.step_count(), 300);
        assert_eq!(opt.name(), kind.as_str());
    }

    #[test]
    fn test_gradients_are_clipped() {
        let (var_map, w) = single_param(0.0);
        let mut opt = create_optimizer(OptimizerKind::Sgd, Some(1.0), 5.0, &var_map).unwrap();
        let loss = w.as_tensor().affine(1000.0, 0.0).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        opt.step(&grads).unwrap();
        assert!((value(&w) + 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_default_learning_rates() {
        let (var_map, _) = single_param(0.0);
        for kind in OptimizerKind::ALL {
            let opt = create_optimizer(kind, None, 5.0, &var_map).unwrap();
            assert_eq!(opt.learning_rate(), kind.default_learning_rate());
        }
        assert!(create_optimizer(OptimizerKind::Adam, Some(-1.0), 5.0, &var_map).is_err());
        assert!(create_optimizer(OptimizerKind::Adam, None, 0.0, &var_map).is_err());
    }

    #[test]
    fn test_running_statistics_are_not_trainable() {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        candle_nn::batch_norm(4, candle_nn::BatchNormConfig::default(), vb.pp("bn")).unwrap();
        let params = ParamSet::new(&var_map, 1.0).unwrap();
        let names: Vec<&str> = params.names().collect();
        assert_eq!(names, vec!["bn.bias", "bn.weight"]);
    }
}
