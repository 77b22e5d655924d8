use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use machine_learning::{
    MlErr,
    arch::{Model, Network},
    eval::Evaluator,
};
use safetensors::tensor::{Dtype, TensorView};

use crate::{
    error::{Result, TrainErr},
    telemetry::Telemetry,
};

/// What the end of a run leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffOutcome {
    pub checkpoint: PathBuf,
    /// Missing if the evaluation failed.
    pub metric: Option<f32>,
}

/// Run facts stored next to the parameters.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointMeta {
    pub steps: usize,
    pub world_size: usize,
}

/// Writes every named tensor of `net` into a safetensors file at `path`.
pub fn persist<M: Model>(net: &Network<M>, path: &Path, meta: CheckpointMeta) -> Result<()> {
    let failed = |source: MlErr| TrainErr::Persist {
        path: path.to_path_buf(),
        source,
    };

    let tensors = net.tensors();
    let views = tensors
        .iter()
        .map(|(spec, values)| {
            let bytes: &[u8] = bytemuck::cast_slice(values);
            TensorView::new(Dtype::F32, spec.shape.clone(), bytes)
                .map(|view| (spec.name.as_str(), view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| failed(e.into()))?;

    let metadata = HashMap::from([
        ("steps".to_string(), meta.steps.to_string()),
        ("world_size".to_string(), meta.world_size.to_string()),
    ]);

    let bytes = safetensors::serialize(views, &Some(metadata)).map_err(|e| failed(e.into()))?;
    fs::write(path, bytes).map_err(|e| failed(e.into()))
}

/// Persists the trained network, then scores it.
///
/// A persistence failure is returned, an evaluation failure is only reported through
/// `telemetry` and leaves the metric out.
///
/// # Arguments
/// * `net` - The canonical trained network.
/// * `path` - Where the checkpoint goes.
/// * `meta` - Run facts stored with the checkpoint.
/// * `load_evaluator` - Builds the evaluator, called after the checkpoint is written.
/// * `telemetry` - The run's log sink.
pub fn handoff<M, E, F>(
    mut net: Network<M>,
    path: &Path,
    meta: CheckpointMeta,
    load_evaluator: F,
    telemetry: &mut Telemetry,
) -> Result<HandoffOutcome>
where
    M: Model,
    E: Evaluator,
    F: FnOnce() -> machine_learning::Result<E>,
{
    persist(&net, path, meta)?;
    telemetry.checkpoint(path);

    net.eval();
    telemetry.evaluating();

    let metric = match load_evaluator().and_then(|evaluator| evaluator.evaluate(&mut net)) {
        Ok(metric) => {
            telemetry.metric(metric);
            Some(metric)
        }
        Err(e) => {
            telemetry.eval_failed(&TrainErr::Eval(e));
            None
        }
    };

    Ok(HandoffOutcome {
        checkpoint: path.to_path_buf(),
        metric,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use machine_learning::{
        arch::{Sequential, layers::Layer},
        dataset::Dataset,
        eval::MeanIou,
    };
    use safetensors::SafeTensors;

    use super::*;

    const META: CheckpointMeta = CheckpointMeta {
        steps: 10,
        world_size: 2,
    };

    fn net() -> Network<Sequential> {
        let model = Sequential::new([Layer::dense((2, 2), None)]);
        Network::new(model, vec![1., 0., 0., 1., 0.25, -0.25]).unwrap()
    }

    fn evaluator() -> machine_learning::Result<MeanIou> {
        let ds = Dataset::new(vec![1., 0., 0., 1.], 2, vec![0., 1.], 1)?;
        Ok(MeanIou::new(Arc::new(ds), 2, 4, 255))
    }

    #[test]
    fn checkpoint_holds_every_tensor_and_the_run_facts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_final.safetensors");

        persist(&net(), &path, META).unwrap();

        let bytes = fs::read(&path).unwrap();
        let (_, header) = SafeTensors::read_metadata(&bytes).unwrap();
        let tensors = SafeTensors::deserialize(&bytes).unwrap();

        let weight = tensors.tensor("layers.0.weight").unwrap();
        assert_eq!(weight.shape(), [2, 2]);
        assert_eq!(tensors.tensor("layers.0.bias").unwrap().shape(), [2]);

        let meta = header.metadata().as_ref().unwrap();
        assert_eq!(meta["steps"], "10");
        assert_eq!(meta["world_size"], "2");
    }

    #[test]
    fn handoff_persists_then_scores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_final.safetensors");
        let mut telemetry = Telemetry::new(0, true);

        let outcome = handoff(net(), &path, META, evaluator, &mut telemetry).unwrap();

        assert!(path.exists());
        assert_eq!(outcome.metric, Some(1.0));
    }

    #[test]
    fn evaluation_failure_keeps_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_final.safetensors");
        let mut telemetry = Telemetry::new(0, true);

        let missing_val_set = || -> machine_learning::Result<MeanIou> {
            let ds = Dataset::load("/nonexistent/val.safetensors")?;
            Ok(MeanIou::new(Arc::new(ds), 2, 4, 255))
        };

        let outcome = handoff(net(), &path, META, missing_val_set, &mut telemetry).unwrap();

        assert!(path.exists());
        assert_eq!(outcome.metric, None);
    }

    #[test]
    fn persistence_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("model_final.safetensors");
        let mut telemetry = Telemetry::new(0, true);

        let err = handoff(net(), &path, META, evaluator, &mut telemetry).unwrap_err();

        assert!(matches!(err, TrainErr::Persist { .. }));
    }
}
