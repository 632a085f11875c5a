// ============================================================
// Layer 6 — Pretrained Weights
// ============================================================
// Fetches ImageNet weights for the backbone as a flat StateDict.
//
// The torchvision ResNet checkpoints are mirrored on the
// Hugging Face Hub as safetensors (timm's `*.tv_in1k` repos)
// with the original torchvision parameter names, so they merge
// into Hopenet by name. hf-hub caches downloads under
// ~/.cache/huggingface, so only the first run hits the network.

use anyhow::{bail, Context, Result};
use half::{bf16, f16};
use safetensors::{Dtype, SafeTensors};
use std::{fs, path::{Path, PathBuf}};

use crate::domain::traits::WeightSource;
use crate::ml::model::Arch;
use crate::ml::state_dict::{StateDict, StateTensor};

const WEIGHTS_FILE: &str = "model.safetensors";

#[derive(Debug, Clone, PartialEq)]
pub enum PretrainedSource {
    Hub { repo: String, file: String },
    Local(PathBuf),
    None,
}

impl PretrainedSource {
    /// torchvision ImageNet weights for `arch` on the Hub
    pub fn hub_for(arch: Arch) -> Self {
        Self::Hub {
            repo: format!("timm/{arch}.tv_in1k"),
            file: WEIGHTS_FILE.to_string(),
        }
    }

    /// `hub` → Hub weights for `arch`; `none` → no pretraining;
    /// anything else is a path to a safetensors file.
    pub fn parse(spec: &str, arch: Arch) -> Self {
        match spec.trim() {
            "hub"  => Self::hub_for(arch),
            "none" => Self::None,
            path   => Self::Local(PathBuf::from(path)),
        }
    }
}

impl WeightSource<StateDict> for PretrainedSource {
    fn describe(&self) -> String {
        match self {
            Self::Hub { repo, file } => format!("hub:{repo}/{file}"),
            Self::Local(path)        => path.display().to_string(),
            Self::None               => "none".to_string(),
        }
    }

    fn fetch(&self) -> Result<StateDict> {
        match self {
            Self::Hub { repo, file } => {
                tracing::info!("Downloading pretrained weights from Hub: {}", repo);
                let api  = hf_hub::api::sync::Api::new()?;
                let path = api
                    .model(repo.clone())
                    .get(file)
                    .with_context(|| format!("Cannot fetch '{file}' from '{repo}'"))?;
                read_safetensors(&path)
            }
            Self::Local(path) => read_safetensors(path),
            Self::None        => Ok(StateDict::new()),
        }
    }
}

/// Read every floating point tensor of a safetensors file.
/// Integer tensors (e.g. `num_batches_tracked`) are skipped.
pub fn read_safetensors(path: &Path) -> Result<StateDict> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read weights '{}'", path.display()))?;
    let tensors = SafeTensors::deserialize(&bytes)
        .with_context(|| format!("Invalid safetensors file '{}'", path.display()))?;

    let mut out = StateDict::new();
    for (name, view) in tensors.tensors() {
        let values = match decode_floats(view.dtype(), view.data()) {
            Ok(v)  => v,
            Err(e) => {
                tracing::debug!("Skipping '{}': {}", name, e);
                continue;
            }
        };
        out.insert(name, StateTensor::new(view.shape().to_vec(), values));
    }
    tracing::info!("Read {} tensors from '{}'", out.len(), path.display());
    Ok(out)
}

fn decode_floats(dtype: Dtype, data: &[u8]) -> Result<Vec<f32>> {
    Ok(match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => data
            .chunks_exact(8)
            .map(|b| {
                let mut a = [0u8; 8];
                a.copy_from_slice(b);
                f64::from_le_bytes(a) as f32
            })
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        other => bail!("unsupported dtype {other:?}"),
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::{serialize, tensor::TensorView};
    use std::collections::HashMap;

    #[test]
    fn test_parse_source() {
        assert_eq!(
            PretrainedSource::parse("hub", Arch::Resnet50),
            PretrainedSource::Hub {
                repo: "timm/resnet50.tv_in1k".into(),
                file: "model.safetensors".into(),
            }
        );
        assert_eq!(PretrainedSource::parse("none", Arch::Resnet50), PretrainedSource::None);
        assert_eq!(
            PretrainedSource::parse("w/r18.safetensors", Arch::Resnet18),
            PretrainedSource::Local("w/r18.safetensors".into())
        );
        assert!(PretrainedSource::None.fetch().unwrap().is_empty());
    }

    #[test]
    fn test_read_safetensors_skips_integer_tensors() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");

        let weights: Vec<u8> = [1.0f32, -2.0, 0.5, 4.0].iter().flat_map(|f| f.to_le_bytes()).collect();
        let half_w:  Vec<u8> = [f16::from_f32(1.5)].iter().flat_map(|h| h.to_le_bytes()).collect();
        let counter: Vec<u8> = 7i64.to_le_bytes().to_vec();

        let views = HashMap::from([
            ("conv1.weight".to_string(), TensorView::new(Dtype::F32, vec![2, 2], &weights).unwrap()),
            ("bn1.bias".to_string(), TensorView::new(Dtype::F16, vec![1], &half_w).unwrap()),
            ("bn1.num_batches_tracked".to_string(), TensorView::new(Dtype::I64, vec![], &counter).unwrap()),
        ]);
        let bytes = serialize(views.iter().map(|(k, v)| (k.as_str(), v.clone())), &None).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let sd = PretrainedSource::Local(path).fetch().unwrap();
        assert_eq!(sd.len(), 2);
        assert_eq!(sd["conv1.weight"], StateTensor::new(vec![2, 2], vec![1.0, -2.0, 0.5, 4.0]));
        assert_eq!(sd["bn1.bias"].values, vec![1.5]);
    }
}
