use crate::core::tensor::Tensor;
use crate::error::{PipelineError, Result};
use ndarray::{Axis, concatenate};
use ndarray_npy::{ReadNpyError, read_npy};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stacked calibration samples, channel-last, concatenated on axis 0.
#[derive(Debug, Clone)]
pub struct CalibrationBatch {
    pub data: Tensor,
    pub sources: Vec<PathBuf>,
}

impl CalibrationBatch {
    pub fn len(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One sample as a rank-4 tensor with batch dimension 1.
    pub fn sample(&self, index: usize) -> Tensor {
        self.data.index_axis(Axis(0), index).insert_axis(Axis(0)).to_owned()
    }
}

/// Loads every `*.npy` file of `dir` in lexicographic order, keeping at most
/// `max_samples`. Channel-first samples (axis 1 of size 1 or 3) are
/// transposed to channel-last before stacking.
pub fn load_batch(dir: &Path, max_samples: Option<usize>) -> Result<CalibrationBatch> {
    let mut files = list_samples(dir)?;
    if let Some(limit) = max_samples {
        files.truncate(limit);
    }
    if files.is_empty() {
        return Err(PipelineError::NoCalibrationData(dir.to_path_buf()));
    }

    let samples: Vec<Tensor> = files.par_iter().map(|f| load_sample(f)).collect::<Result<_>>()?;

    let expected = &samples[0].shape()[1..];
    if let Some((file, sample)) = files.iter().zip(&samples).find(|(_, s)| &s.shape()[1..] != expected) {
        return Err(PipelineError::UnexpectedShape {
            path: file.clone(),
            shape: sample.shape().to_vec(),
            reason: format!("does not match sample layout {:?} of {}", expected, files[0].display()),
        });
    }

    let views: Vec<_> = samples.iter().map(|s| s.view()).collect();
    let data = concatenate(Axis(0), &views).map_err(|e| PipelineError::UnexpectedShape {
        path: dir.to_path_buf(),
        shape: expected.to_vec(),
        reason: e.to_string(),
    })?;

    info!(dir = %dir.display(), samples = files.len(), shape = ?data.shape(), "loaded calibration batch");
    Ok(CalibrationBatch { data, sources: files })
}

fn list_samples(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::NoCalibrationData(dir.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "npy") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_sample(path: &Path) -> Result<Tensor> {
    let array = read_as_f32(path).map_err(|source| PipelineError::CalibrationRead { path: path.to_path_buf(), source })?;
    if array.ndim() != 4 {
        return Err(PipelineError::UnexpectedShape {
            path: path.to_path_buf(),
            shape: array.shape().to_vec(),
            reason: "calibration samples must be rank 4".into(),
        });
    }
    if matches!(array.shape()[1], 1 | 3) {
        debug!(file = %path.display(), "channel-first sample, transposing to channel-last");
        return Ok(array.permuted_axes(vec![0, 2, 3, 1]).as_standard_layout().into_owned());
    }
    Ok(array)
}

/// Reads f32 samples directly; f64 and u8 files are converted.
fn read_as_f32(path: &Path) -> std::result::Result<Tensor, ReadNpyError> {
    match read_npy::<_, Tensor>(path) {
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        other => return other,
    }
    match read_npy::<_, ndarray::ArrayD<f64>>(path) {
        Ok(a) => return Ok(a.mapv(|v| v as f32)),
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        Err(e) => return Err(e),
    }
    read_npy::<_, ndarray::ArrayD<u8>>(path).map(|a| a.mapv(f32::from))
}
