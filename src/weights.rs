//! Parameter-level operations shared with the external trainer: pretrained
//! backbone import, checkpoint save/load, parameter enumeration, and
//! backbone freezing.

use crate::{common::*, model::ResNet18Init};

/// Name prefix of every backbone variable in a detector var store.
pub const BACKBONE_PREFIX: &str = "backbone";

// Batch norm running statistics live in the var store but are never
// trainable; freezing must not touch them.
fn is_running_stat(name: &str) -> bool {
    name.ends_with("running_mean") || name.ends_with("running_var")
}

/// Flips the trainability of every backbone parameter, leaving pyramid and
/// head parameters untouched.
pub fn set_backbone_trainable(vs: &nn::VarStore, trainable: bool) {
    let prefix = format!("{}.", BACKBONE_PREFIX);
    let mut count = 0usize;
    for (name, var) in vs.variables() {
        if name.starts_with(&prefix) && !is_running_stat(&name) {
            let _ = var.set_requires_grad(trainable);
            count += 1;
        }
    }
    info!("set {} backbone parameters trainable={}", count, trainable);
}

/// Initializes the backbone from a tch-format ResNet-18 weight file.
///
/// The file is loaded into a scratch store shaped like the bare backbone,
/// then copied tensor by tensor into the detector's `backbone` namespace.
/// Classifier tensors present in the file are ignored; a backbone tensor
/// missing from the file or carrying an unexpected shape is an error.
pub fn load_pretrained_backbone<P>(vs: &nn::VarStore, file: P) -> Result<()>
where
    P: AsRef<Path>,
{
    let file = file.as_ref();

    let mut scratch = nn::VarStore::new(vs.device());
    let _ = ResNet18Init.build(&scratch.root());
    let missing = scratch
        .load_partial(file)
        .with_context(|| format!("failed to load pretrained weights from '{}'", file.display()))?;
    ensure!(
        missing.is_empty(),
        "pretrained weight file '{}' is missing backbone tensors: {:?}",
        file.display(),
        missing
    );

    let mut targets = vs.variables();
    let sources: BTreeMap<_, _> = scratch.variables().into_iter().collect();
    tch::no_grad(|| -> Result<_> {
        for (name, source) in &sources {
            let target_name = format!("{}.{}", BACKBONE_PREFIX, name);
            let target = targets.get_mut(&target_name).ok_or_else(|| {
                format_err!(
                    "pretrained tensor '{}' has no counterpart '{}' in the detector",
                    name,
                    target_name
                )
            })?;
            ensure!(
                target.size() == source.size(),
                "pretrained tensor '{}' has shape {:?}, expected {:?}",
                name,
                source.size(),
                target.size()
            );
            target.copy_(source);
        }
        Ok(())
    })?;

    info!(
        "initialized backbone from {} pretrained tensors in '{}'",
        sources.len(),
        file.display()
    );
    Ok(())
}

/// Complete name-to-parameter mapping in deterministic name order, the
/// checkpoint surface consumed by the external persistence collaborator.
pub fn named_parameters(vs: &nn::VarStore) -> BTreeMap<String, Tensor> {
    vs.variables().into_iter().collect()
}

/// Saves all parameters to a caller-chosen file.
pub fn save_checkpoint<P>(vs: &nn::VarStore, file: P) -> Result<()>
where
    P: AsRef<Path>,
{
    let file = file.as_ref();
    vs.save(file)
        .with_context(|| format!("failed to save checkpoint to '{}'", file.display()))?;
    info!("saved checkpoint to '{}'", file.display());
    Ok(())
}

/// Restores all parameters from a checkpoint file. Every variable of the
/// store must be present in the file.
pub fn load_checkpoint<P>(vs: &mut nn::VarStore, file: P) -> Result<()>
where
    P: AsRef<Path>,
{
    let file = file.as_ref();
    vs.load(file)
        .with_context(|| format!("failed to load checkpoint from '{}'", file.display()))?;
    info!("loaded checkpoint from '{}'", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DetectorConfig, model::PersonDetectorInit};

    fn build_store() -> Result<nn::VarStore> {
        let vs = nn::VarStore::new(Device::Cpu);
        let _ = PersonDetectorInit {
            config: DetectorConfig::default(),
        }
        .build(&vs.root())?;
        Ok(vs)
    }

    #[test]
    fn parameter_names_follow_the_contract() -> Result<()> {
        let vs = build_store()?;
        let params = named_parameters(&vs);
        ensure!(params.contains_key("backbone.conv1.weight"));
        ensure!(params.contains_key("backbone.layer4.1.bn2.bias"));
        ensure!(params.contains_key("backbone.layer2.0.downsample.0.weight"));
        ensure!(params.contains_key("pyramid.lateral_s32.weight"));
        ensure!(params.contains_key("pyramid.smooth_s8.bias"));
        ensure!(params.contains_key("head_s16.conf_conv.bias"));
        ensure!(params.contains_key("head_s8.box_conv.weight"));
        Ok(())
    }

    #[test]
    fn backbone_freeze_is_selective() -> Result<()> {
        let vs = build_store()?;

        set_backbone_trainable(&vs, false);
        for (name, var) in vs.variables() {
            if is_running_stat(&name) {
                continue;
            }
            if name.starts_with("backbone.") {
                ensure!(!var.requires_grad(), "'{}' stayed trainable", name);
            } else {
                ensure!(var.requires_grad(), "'{}' lost trainability", name);
            }
        }

        set_backbone_trainable(&vs, true);
        for (name, var) in vs.variables() {
            if is_running_stat(&name) {
                continue;
            }
            ensure!(var.requires_grad(), "'{}' was not unfrozen", name);
        }
        Ok(())
    }

    #[test]
    fn checkpoint_roundtrip_restores_parameters() -> Result<()> {
        let saved = build_store()?;
        let mut restored = build_store()?;

        let file = std::env::temp_dir().join("person-dl-checkpoint-test.ot");
        save_checkpoint(&saved, &file)?;
        load_checkpoint(&mut restored, &file)?;
        std::fs::remove_file(&file).ok();

        let expected = named_parameters(&saved);
        for (name, actual) in named_parameters(&restored) {
            let expected = &expected[&name];
            ensure!(
                f64::from((actual - expected).abs().max()) == 0.0,
                "'{}' differs after checkpoint roundtrip",
                name
            );
        }
        Ok(())
    }
}
