// ============================================================
// Layer 5 — Named State Dictionary & Weight Loader
// ============================================================
// Burn records are typed by the module tree, so two different
// architectures cannot share a record. Pretrained ImageNet
// weights, however, are a flat mapping from torchvision names
// to tensors:
//
//   conv1.weight                 [64, 3, 7, 7]
//   bn1.running_mean             [64]
//   layer1.0.conv1.weight        [64, 64, 1, 1]
//   layer1.0.downsample.0.weight [256, 64, 1, 1]
//   fc.weight                    [1000, 2048]
//   ...
//
// NamedParams walks the Hopenet tree under the same names, so
// the model can be exported to and updated from such a mapping.
// Linear weights are stored [out, in] in the mapping (torch
// layout) and [in, out] inside Burn; the walk transposes.
//
// load_filtered_state_dict is the Weight Loader: it keeps only
// the keys the model actually has, so the ImageNet classifier
// (`fc.*`) and bookkeeping entries are dropped and the new
// heads keep their fresh initialisation.

use anyhow::{anyhow, bail, Result};
use burn::{
    module::{Param, ParamId, RunningState},
    nn::{conv::Conv2d, Linear},
    prelude::*,
    tensor::TensorData,
};
use std::collections::BTreeMap;

use crate::ml::model::{Downsample, Hopenet, Norm, ResLayer, ResidualBlock};

/// A host-side tensor: row-major values plus shape.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTensor {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl StateTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    fn from_tensor<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Self> {
        let shape  = t.dims().to_vec();
        let values = t
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("Cannot read tensor data: {e:?}"))?;
        Ok(Self { shape, values })
    }

    fn to_tensor<B: Backend, const D: usize>(
        &self,
        name:     &str,
        expected: [usize; D],
        device:   &B::Device,
    ) -> Result<Tensor<B, D>> {
        if self.shape != expected {
            bail!(
                "Shape mismatch for '{}': model has {:?}, source has {:?}",
                name, expected, self.shape
            );
        }
        Ok(Tensor::from_data(TensorData::new(self.values.clone(), expected), device))
    }
}

/// Parameter name → tensor, ordered by name.
pub type StateDict = BTreeMap<String, StateTensor>;

/// A trainable parameter as seen by the optimizer grouping.
#[derive(Debug, Clone)]
pub struct ParamHandle {
    pub name:  String,
    pub id:    ParamId,
    pub numel: usize,
}

/// Walk a module under torchvision-style names.
pub trait NamedParams: Sized {
    /// Append every tensor (parameters and running statistics).
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()>;

    /// Replace every tensor whose name is in `src`; others are untouched.
    fn import_state(self, prefix: &str, src: &StateDict) -> Result<Self>;

    /// Append every trainable parameter (no running statistics).
    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>);

    fn state_dict(&self) -> Result<StateDict> {
        let mut out = StateDict::new();
        self.export_state("", &mut out)?;
        Ok(out)
    }

    fn all_param_handles(&self) -> Vec<ParamHandle> {
        let mut out = Vec::new();
        self.param_handles("", &mut out);
        out
    }
}

fn key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

// ─── Leaf helpers ─────────────────────────────────────────────────────────────

fn export_param<B: Backend, const D: usize>(
    param: &Param<Tensor<B, D>>,
    name:  String,
    out:   &mut StateDict,
) -> Result<()> {
    out.insert(name, StateTensor::from_tensor(param.val())?);
    Ok(())
}

fn import_param<B: Backend, const D: usize>(
    param: Param<Tensor<B, D>>,
    name:  &str,
    src:   &StateDict,
) -> Result<Param<Tensor<B, D>>> {
    let Some(st) = src.get(name) else { return Ok(param) };
    let current = param.val();
    let value   = st.to_tensor(name, current.dims(), &current.device())?;
    Ok(Param::initialized(param.id, value.require_grad()))
}

fn handle<B: Backend, const D: usize>(param: &Param<Tensor<B, D>>, name: String) -> ParamHandle {
    ParamHandle {
        name,
        id:    param.id,
        numel: param.val().dims().iter().product(),
    }
}

fn export_running<B: Backend>(
    state: &RunningState<Tensor<B, 1>>,
    name:  String,
    out:   &mut StateDict,
) -> Result<()> {
    out.insert(name, StateTensor::from_tensor(state.value())?);
    Ok(())
}

fn import_running<B: Backend>(
    state: RunningState<Tensor<B, 1>>,
    name:  &str,
    src:   &StateDict,
) -> Result<RunningState<Tensor<B, 1>>> {
    let Some(st) = src.get(name) else { return Ok(state) };
    let current = state.value();
    let value   = st.to_tensor(name, current.dims(), &current.device())?;
    Ok(RunningState::new(value))
}

// ─── Framework layers ─────────────────────────────────────────────────────────

impl<B: Backend> NamedParams for Conv2d<B> {
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        export_param(&self.weight, key(prefix, "weight"), out)?;
        if let Some(bias) = &self.bias {
            export_param(bias, key(prefix, "bias"), out)?;
        }
        Ok(())
    }

    fn import_state(mut self, prefix: &str, src: &StateDict) -> Result<Self> {
        self.weight = import_param(self.weight, &key(prefix, "weight"), src)?;
        self.bias = match self.bias {
            Some(b) => Some(import_param(b, &key(prefix, "bias"), src)?),
            None    => None,
        };
        Ok(self)
    }

    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>) {
        out.push(handle(&self.weight, key(prefix, "weight")));
        if let Some(bias) = &self.bias {
            out.push(handle(bias, key(prefix, "bias")));
        }
    }
}

impl<B: Backend> NamedParams for Linear<B> {
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        // Burn [in, out] → torch [out, in]
        out.insert(
            key(prefix, "weight"),
            StateTensor::from_tensor(self.weight.val().transpose())?,
        );
        if let Some(bias) = &self.bias {
            export_param(bias, key(prefix, "bias"), out)?;
        }
        Ok(())
    }

    fn import_state(mut self, prefix: &str, src: &StateDict) -> Result<Self> {
        let name = key(prefix, "weight");
        if let Some(st) = src.get(&name) {
            let current  = self.weight.val();
            let [din, dout] = current.dims();
            let value = st
                .to_tensor::<B, 2>(&name, [dout, din], &current.device())?
                .transpose();
            self.weight = Param::initialized(self.weight.id, value.require_grad());
        }
        self.bias = match self.bias {
            Some(b) => Some(import_param(b, &key(prefix, "bias"), src)?),
            None    => None,
        };
        Ok(self)
    }

    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>) {
        out.push(handle(&self.weight, key(prefix, "weight")));
        if let Some(bias) = &self.bias {
            out.push(handle(bias, key(prefix, "bias")));
        }
    }
}

impl<B: Backend> NamedParams for Norm<B> {
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        export_param(&self.bn.gamma, key(prefix, "weight"), out)?;
        export_param(&self.bn.beta,  key(prefix, "bias"),   out)?;
        export_running(&self.bn.running_mean, key(prefix, "running_mean"), out)?;
        export_running(&self.bn.running_var,  key(prefix, "running_var"),  out)
    }

    fn import_state(mut self, prefix: &str, src: &StateDict) -> Result<Self> {
        self.bn.gamma        = import_param(self.bn.gamma, &key(prefix, "weight"), src)?;
        self.bn.beta         = import_param(self.bn.beta,  &key(prefix, "bias"),   src)?;
        self.bn.running_mean = import_running(self.bn.running_mean, &key(prefix, "running_mean"), src)?;
        self.bn.running_var  = import_running(self.bn.running_var,  &key(prefix, "running_var"),  src)?;
        Ok(self)
    }

    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>) {
        out.push(handle(&self.bn.gamma, key(prefix, "weight")));
        out.push(handle(&self.bn.beta,  key(prefix, "bias")));
    }
}

// ─── Hopenet tree ─────────────────────────────────────────────────────────────

// torchvision: downsample is nn.Sequential(conv, bn) → ".0" / ".1"
impl<B: Backend> NamedParams for Downsample<B> {
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        self.conv.export_state(&key(prefix, "0"), out)?;
        self.norm.export_state(&key(prefix, "1"), out)
    }

    fn import_state(mut self, prefix: &str, src: &StateDict) -> Result<Self> {
        self.conv = self.conv.import_state(&key(prefix, "0"), src)?;
        self.norm = self.norm.import_state(&key(prefix, "1"), src)?;
        Ok(self)
    }

    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>) {
        self.conv.param_handles(&key(prefix, "0"), out);
        self.norm.param_handles(&key(prefix, "1"), out);
    }
}

// convs[i] / norms[i] ↔ conv{i+1} / bn{i+1}
impl<B: Backend> NamedParams for ResidualBlock<B> {
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        for (i, (conv, norm)) in self.convs.iter().zip(&self.norms).enumerate() {
            conv.export_state(&key(prefix, &format!("conv{}", i + 1)), out)?;
            norm.export_state(&key(prefix, &format!("bn{}", i + 1)), out)?;
        }
        if let Some(d) = &self.downsample {
            d.export_state(&key(prefix, "downsample"), out)?;
        }
        Ok(())
    }

    fn import_state(mut self, prefix: &str, src: &StateDict) -> Result<Self> {
        self.convs = self
            .convs
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.import_state(&key(prefix, &format!("conv{}", i + 1)), src))
            .collect::<Result<_>>()?;
        self.norms = self
            .norms
            .into_iter()
            .enumerate()
            .map(|(i, n)| n.import_state(&key(prefix, &format!("bn{}", i + 1)), src))
            .collect::<Result<_>>()?;
        self.downsample = match self.downsample {
            Some(d) => Some(d.import_state(&key(prefix, "downsample"), src)?),
            None    => None,
        };
        Ok(self)
    }

    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>) {
        for (i, (conv, norm)) in self.convs.iter().zip(&self.norms).enumerate() {
            conv.param_handles(&key(prefix, &format!("conv{}", i + 1)), out);
            norm.param_handles(&key(prefix, &format!("bn{}", i + 1)), out);
        }
        if let Some(d) = &self.downsample {
            d.param_handles(&key(prefix, "downsample"), out);
        }
    }
}

impl<B: Backend> NamedParams for ResLayer<B> {
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        for (i, block) in self.blocks.iter().enumerate() {
            block.export_state(&key(prefix, &i.to_string()), out)?;
        }
        Ok(())
    }

    fn import_state(mut self, prefix: &str, src: &StateDict) -> Result<Self> {
        self.blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, b)| b.import_state(&key(prefix, &i.to_string()), src))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>) {
        for (i, block) in self.blocks.iter().enumerate() {
            block.param_handles(&key(prefix, &i.to_string()), out);
        }
    }
}

impl<B: Backend> NamedParams for Hopenet<B> {
    fn export_state(&self, prefix: &str, out: &mut StateDict) -> Result<()> {
        self.conv1.export_state(&key(prefix, "conv1"), out)?;
        self.bn1.export_state(&key(prefix, "bn1"), out)?;
        self.layer1.export_state(&key(prefix, "layer1"), out)?;
        self.layer2.export_state(&key(prefix, "layer2"), out)?;
        self.layer3.export_state(&key(prefix, "layer3"), out)?;
        self.layer4.export_state(&key(prefix, "layer4"), out)?;
        self.fc_yaw.export_state(&key(prefix, "fc_yaw"), out)?;
        self.fc_pitch.export_state(&key(prefix, "fc_pitch"), out)?;
        self.fc_roll.export_state(&key(prefix, "fc_roll"), out)?;
        self.fc_finetune.export_state(&key(prefix, "fc_finetune"), out)
    }

    fn import_state(mut self, prefix: &str, src: &StateDict) -> Result<Self> {
        self.conv1       = self.conv1.import_state(&key(prefix, "conv1"), src)?;
        self.bn1         = self.bn1.import_state(&key(prefix, "bn1"), src)?;
        self.layer1      = self.layer1.import_state(&key(prefix, "layer1"), src)?;
        self.layer2      = self.layer2.import_state(&key(prefix, "layer2"), src)?;
        self.layer3      = self.layer3.import_state(&key(prefix, "layer3"), src)?;
        self.layer4      = self.layer4.import_state(&key(prefix, "layer4"), src)?;
        self.fc_yaw      = self.fc_yaw.import_state(&key(prefix, "fc_yaw"), src)?;
        self.fc_pitch    = self.fc_pitch.import_state(&key(prefix, "fc_pitch"), src)?;
        self.fc_roll     = self.fc_roll.import_state(&key(prefix, "fc_roll"), src)?;
        self.fc_finetune = self.fc_finetune.import_state(&key(prefix, "fc_finetune"), src)?;
        Ok(self)
    }

    fn param_handles(&self, prefix: &str, out: &mut Vec<ParamHandle>) {
        self.conv1.param_handles(&key(prefix, "conv1"), out);
        self.bn1.param_handles(&key(prefix, "bn1"), out);
        self.layer1.param_handles(&key(prefix, "layer1"), out);
        self.layer2.param_handles(&key(prefix, "layer2"), out);
        self.layer3.param_handles(&key(prefix, "layer3"), out);
        self.layer4.param_handles(&key(prefix, "layer4"), out);
        self.fc_yaw.param_handles(&key(prefix, "fc_yaw"), out);
        self.fc_pitch.param_handles(&key(prefix, "fc_pitch"), out);
        self.fc_roll.param_handles(&key(prefix, "fc_roll"), out);
        self.fc_finetune.param_handles(&key(prefix, "fc_finetune"), out);
    }
}

// ─── Weight Loader ────────────────────────────────────────────────────────────

/// What a filtered load did, for logging.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Keys copied from the source
    pub loaded:  usize,
    /// Target keys the source did not provide (left at init)
    pub kept:    usize,
    /// Source keys the model does not have (dropped)
    pub dropped: Vec<String>,
}

/// Overwrite every model tensor whose name also appears in `source`.
///
/// Target-only names keep their current values and source-only
/// names are dropped. A shared name with a different shape is an
/// error.
pub fn load_filtered_state_dict<M: NamedParams>(
    model:  M,
    source: StateDict,
) -> Result<(M, LoadReport)> {
    let target = model.state_dict()?;

    let (filtered, dropped): (StateDict, StateDict) = source
        .into_iter()
        .partition(|(name, _)| target.contains_key(name));

    let report = LoadReport {
        loaded:  filtered.len(),
        kept:    target.len() - filtered.len(),
        dropped: dropped.into_keys().collect(),
    };
    for name in &report.dropped {
        tracing::debug!("Pretrained key '{}' has no counterpart, dropped", name);
    }

    let model = model.import_state("", &filtered)?;
    Ok((model, report))
}
