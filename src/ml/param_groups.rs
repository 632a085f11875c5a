// ============================================================
// Layer 5 — Optimizer Parameter Groups
// ============================================================
// Hopenet trains its parts at different rates:
//
//   group     modules                          lr multiplier
//   ───────── ──────────────────────────────── ─────────────
//   ignored   conv1, bn1, fc_finetune          0 (frozen)
//   backbone  layer1 .. layer4                 1
//   heads     fc_yaw, fc_pitch, fc_roll        2
//
// Burn's optimizers take one learning rate per step, so a
// "multi-group optimizer" is one Adam instance stepped once per
// group with that group's gradients only. Groups with a zero
// multiplier are never stepped.
//
// Freezing the batch norms is a separate, explicit call
// (freeze_norms) — building the groups has no side effects.

use burn::{
    module::ParamId,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::ml::model::Hopenet;
use crate::ml::state_dict::{NamedParams, ParamHandle};

pub const IGNORED_LR_MULT:  f64 = 0.0;
pub const BACKBONE_LR_MULT: f64 = 1.0;
pub const HEADS_LR_MULT:    f64 = 2.0;

#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub name:          &'static str,
    pub lr_multiplier: f64,
    pub params:        Vec<ParamHandle>,
}

impl ParamGroup {
    fn collect<M: NamedParams>(
        name:          &'static str,
        lr_multiplier: f64,
        modules:       &[(&str, &M)],
    ) -> Self {
        let mut params = Vec::new();
        for (prefix, module) in modules {
            module.param_handles(prefix, &mut params);
        }
        Self { name, lr_multiplier, params }
    }

    fn extend<M: NamedParams>(mut self, prefix: &str, module: &M) -> Self {
        module.param_handles(prefix, &mut self.params);
        self
    }

    pub fn ids(&self) -> Vec<ParamId> {
        self.params.iter().map(|p| p.id).collect()
    }

    pub fn numel(&self) -> usize {
        self.params.iter().map(|p| p.numel).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ParamGroups {
    pub ignored:  ParamGroup,
    pub backbone: ParamGroup,
    pub heads:    ParamGroup,
}

impl ParamGroups {
    pub fn from_model<B: Backend>(model: &Hopenet<B>) -> Self {
        let ignored = ParamGroup::collect("ignored", IGNORED_LR_MULT, &[("conv1", &model.conv1)])
            .extend("bn1", &model.bn1)
            .extend("fc_finetune", &model.fc_finetune);

        let backbone = ParamGroup::collect(
            "backbone",
            BACKBONE_LR_MULT,
            &[
                ("layer1", &model.layer1),
                ("layer2", &model.layer2),
                ("layer3", &model.layer3),
                ("layer4", &model.layer4),
            ],
        );

        let heads = ParamGroup::collect(
            "heads",
            HEADS_LR_MULT,
            &[
                ("fc_yaw",   &model.fc_yaw),
                ("fc_pitch", &model.fc_pitch),
                ("fc_roll",  &model.fc_roll),
            ],
        );

        Self { ignored, backbone, heads }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamGroup> {
        [&self.ignored, &self.backbone, &self.heads].into_iter()
    }

    /// Apply one optimizer update per group at `base_lr × multiplier`.
    ///
    /// Each group's gradients are pulled out of `grads` before any
    /// update, so every group sees gradients of the same forward pass.
    pub fn step<B, O>(
        &self,
        model:   Hopenet<B>,
        optim:   &mut O,
        grads:   &mut B::Gradients,
        base_lr: f64,
    ) -> Hopenet<B>
    where
        B: AutodiffBackend,
        O: Optimizer<Hopenet<B>, B>,
    {
        let updates: Vec<(f64, GradientsParams)> = self
            .iter()
            .filter(|g| g.lr_multiplier != 0.0)
            .map(|g| {
                let ids = g.ids();
                (base_lr * g.lr_multiplier, GradientsParams::from_params(grads, &model, &ids))
            })
            .collect();

        updates
            .into_iter()
            .fold(model, |model, (lr, grads)| optim.step(lr, model, grads))
    }
}

/// Switch every batch norm in the ignored and backbone groups to
/// inference mode. The heads contain no norms.
pub fn freeze_norms<B: Backend>(model: Hopenet<B>) -> Hopenet<B> {
    model.freeze_backbone_norms()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tiny_config;
    use burn::{
        backend::{Autodiff, NdArray},
        optim::AdamConfig,
    };
    use std::collections::HashSet;

    type TB = Autodiff<NdArray>;

    #[test]
    fn test_groups_are_disjoint_and_cover_every_parameter() {
        let model: Hopenet<TB> = tiny_config().init(&Default::default());
        let groups = ParamGroups::from_model(&model);

        let mut seen = HashSet::new();
        for group in groups.iter() {
            assert!(!group.params.is_empty(), "group '{}' is empty", group.name);
            for p in &group.params {
                assert!(seen.insert(p.id), "'{}' is in two groups", p.name);
            }
        }

        let all: HashSet<ParamId> = model.all_param_handles().iter().map(|h| h.id).collect();
        assert_eq!(seen, all);

        // Every exported tensor except the running statistics is trainable
        let trainable: usize = model
            .state_dict()
            .unwrap()
            .iter()
            .filter(|(name, _)| !name.contains(".running_"))
            .map(|(_, t)| t.values.len())
            .sum();
        let grouped: usize = groups.iter().map(ParamGroup::numel).sum();
        assert_eq!(grouped, trainable);
    }

    #[test]
    fn test_group_membership() {
        let model: Hopenet<TB> = tiny_config().init(&Default::default());
        let groups = ParamGroups::from_model(&model);

        let names = |g: &ParamGroup| g.params.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        assert!(names(&groups.ignored).contains(&"fc_finetune.weight".to_string()));
        assert!(names(&groups.ignored).contains(&"bn1.weight".to_string()));
        assert!(names(&groups.backbone).iter().all(|n| n.starts_with("layer")));
        assert_eq!(names(&groups.heads).len(), 6);
        assert_eq!(groups.heads.lr_multiplier, 2.0);
    }

    #[test]
    fn test_step_leaves_ignored_group_untouched() {
        let device = Default::default();
        let model: Hopenet<TB> = freeze_norms(tiny_config().init(&device));
        let groups = ParamGroups::from_model(&model);
        let before = model.state_dict().unwrap();

        let mut optim = AdamConfig::new().init::<TB, Hopenet<TB>>();
        let out = model.forward(Tensor::ones([2, 3, 32, 32], &device));
        let loss = out.yaw.sum() + out.angles.sum();
        let mut grads = loss.backward();
        let model = groups.step(model, &mut optim, &mut grads, 0.1);
        let after = model.state_dict().unwrap();

        assert_eq!(before["conv1.weight"], after["conv1.weight"]);
        assert_eq!(before["fc_finetune.weight"], after["fc_finetune.weight"]);
        assert_ne!(before["fc_yaw.weight"], after["fc_yaw.weight"]);
    }

    #[test]
    fn test_frozen_norms_keep_running_statistics() {
        let device = Default::default();
        let model: Hopenet<TB> = freeze_norms(tiny_config().init(&device));
        let before = model.state_dict().unwrap();

        let images = Tensor::<TB, 4>::random([2, 3, 32, 32], burn::tensor::Distribution::Default, &device);
        let _ = model.forward(images);
        let after = model.state_dict().unwrap();

        assert_eq!(before["bn1.running_mean"], after["bn1.running_mean"]);
        assert_eq!(before["layer3.0.bn2.running_var"], after["layer3.0.bn2.running_var"]);
    }
}
