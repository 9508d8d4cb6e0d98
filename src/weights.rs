//! SafeTensors checkpoint loading and parameter name normalization.
//!
//! Checkpoints are stored as `<dir>/<step>.safetensors`. Training wraps every
//! model in a data-parallel container whose parameters carry a `_layers.`
//! prefix; loading strips it so names match the bare model layout.

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData as BurnTensorData};
use safetensors::{Dtype, SafeTensors};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::perf::{self, Metric};

/// Prefix added by the data-parallel training wrapper.
pub const WRAPPER_PREFIX: &str = "_layers.";

/// Raw tensor payload extracted from a SafeTensors file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    /// Scalar dtype in the file.
    pub dtype: Dtype,
    /// Shape as a list of dimensions.
    pub shape: Vec<usize>,
    /// Raw byte buffer in row-major order.
    pub data: Vec<u8>,
}

impl ParamTensor {
    /// Create a tensor payload from a safetensors view.
    pub fn from_safetensor(tensor: &safetensors::tensor::TensorView<'_>) -> Self {
        Self {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            data: tensor.data().to_vec(),
        }
    }

    /// Build an `f32` payload from values and a shape.
    pub fn from_f32(values: &[f32], shape: Vec<usize>) -> Self {
        Self {
            dtype: Dtype::F32,
            shape,
            data: values.iter().copied().flat_map(f32::to_le_bytes).collect(),
        }
    }

    /// Decode the payload into `f32` values.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let mut values = Vec::new();
        match self.dtype {
            Dtype::F32 => {
                values.reserve(self.data.len() / 4);
                for chunk in self.data.chunks_exact(4) {
                    values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            Dtype::BF16 => {
                values.reserve(self.data.len() / 2);
                for chunk in self.data.chunks_exact(2) {
                    let bits = u16::from_le_bytes([chunk[0], chunk[1]]) as u32;
                    values.push(f32::from_bits(bits << 16));
                }
            }
            other => anyhow::bail!("Unsupported dtype {:?}", other),
        }
        Ok(values)
    }

    /// Convert into a Burn tensor of rank `D`.
    pub fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Result<Tensor<B, D>> {
        let shape: [usize; D] = self
            .shape
            .clone()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Expected {D}D tensor, got shape {:?}", self.shape))?;
        let values = self.to_f32_vec()?;
        Ok(Tensor::from_data(BurnTensorData::new(values, shape), device))
    }
}

/// Ordered mapping from parameter name to tensor payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    entries: Vec<(String, ParamTensor)>,
}

impl ParamMap {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, replacing an existing entry in place.
    pub fn insert(&mut self, name: String, tensor: ParamTensor) {
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = tensor;
        } else {
            self.entries.push((name, tensor));
        }
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, tensor)| tensor)
    }

    /// Look up a parameter, failing with the missing name.
    pub fn require(&self, name: &str) -> Result<&ParamTensor> {
        self.get(name)
            .ok_or_else(|| anyhow::anyhow!("Missing parameter '{name}' in checkpoint"))
    }

    /// Parameter names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.entries.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ParamTensor)> for ParamMap {
    fn from_iter<I: IntoIterator<Item = (String, ParamTensor)>>(iter: I) -> Self {
        let mut map = ParamMap::new();
        for (name, tensor) in iter {
            map.insert(name, tensor);
        }
        map
    }
}

/// Strip the data-parallel wrapper prefix from a parameter name.
pub fn normalize_param_name(name: &str) -> &str {
    name.strip_prefix(WRAPPER_PREFIX).unwrap_or(name)
}

/// Normalize every name of an ordered parameter sequence, preserving order.
pub fn normalize_param_names<I>(entries: I) -> ParamMap
where
    I: IntoIterator<Item = (String, ParamTensor)>,
{
    entries
        .into_iter()
        .map(|(name, tensor)| (normalize_param_name(&name).to_string(), tensor))
        .collect()
}

/// Path of the checkpoint file for `step` inside `dir`.
pub fn checkpoint_file(dir: impl AsRef<Path>, step: &str) -> PathBuf {
    dir.as_ref().join(format!("{step}.safetensors"))
}

/// Load a checkpoint and normalize its parameter names.
///
/// Entries keep their on-disk order.
pub fn load_checkpoint(dir: impl AsRef<Path>, step: &str) -> Result<ParamMap> {
    let _span = perf::span(Metric::CheckpointLoad);
    let path = checkpoint_file(dir, step);
    let bytes = fs::read(&path)
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let tensors = SafeTensors::deserialize(&bytes)
        .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;

    // TensorViews borrow from `bytes`, so their data addresses give file order.
    let mut views = tensors.tensors();
    views.sort_by_key(|(_, view)| view.data().as_ptr() as usize);

    let params = normalize_param_names(
        views
            .iter()
            .map(|(name, view)| (name.clone(), ParamTensor::from_safetensor(view))),
    );
    debug!(path = %path.display(), params = params.len(), "loaded checkpoint");
    Ok(params)
}
