use crate::{
    common::*,
    config::DetectorConfig,
    model::{
        backbone::{ResNet18, ResNet18Init, STRIDES},
        pyramid::{Pyramid, PyramidInit},
    },
    module::{DetectHead2D, DetectHead2DInit},
};

/// Number of predicted locations for a given input resolution, summed over
/// the stride set.
pub fn num_locations(height: i64, width: i64) -> i64 {
    STRIDES
        .iter()
        .map(|stride| (height / stride) * (width / stride))
        .sum()
}

#[derive(Debug, Clone)]
pub struct PersonDetectorInit {
    pub config: DetectorConfig,
}

impl PersonDetectorInit {
    pub fn build<'p, P>(self, path: P) -> Result<PersonDetector>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self { config } = self;
        let DetectorConfig {
            pyramid_channels,
            confidence_prior,
            // Pretrained weights are imported by the caller through
            // `weights::load_pretrained_backbone` once the var store exists.
            pretrained_backbone: _,
        } = config;

        let backbone = ResNet18Init.build(path / "backbone");
        let pyramid = PyramidInit {
            out_c: pyramid_channels,
        }
        .build(path / "pyramid")?;
        let heads = {
            let head = |stride: i64| {
                DetectHead2DInit {
                    confidence_prior: confidence_prior.raw(),
                    ..DetectHead2DInit::new(pyramid_channels)
                }
                .build(path / format!("head_s{}", stride))
            };
            // Coarse to fine, matching the pyramid output order.
            [head(32)?, head(16)?, head(8)?]
        };

        Ok(PersonDetector {
            backbone,
            pyramid,
            heads,
        })
    }
}

/// Single-class anchor-free detector: ResNet-18 trunk, three-level feature
/// pyramid, and per-level box/confidence heads.
#[derive(Debug)]
pub struct PersonDetector {
    backbone: ResNet18,
    pyramid: Pyramid,
    heads: [DetectHead2D; 3],
}

impl PersonDetector {
    /// Runs the detector on a normalized image batch [B, 3, H, W] and
    /// returns predictions [B, N, 5], N = sum over levels of H_l * W_l.
    /// Columns 0..4 hold the sigmoid-squashed box encoding in [0, 1];
    /// column 4 holds the raw confidence logit. Locations are ordered
    /// coarse to fine (stride 32, 16, 8), row-major within a level.
    ///
    /// The decoding of the box columns is fixed by the loss/decoder
    /// contract consuming this tensor, not by the network.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let Self {
            backbone,
            pyramid,
            heads,
        } = self;

        let features = backbone.forward_t(xs, train)?;
        let levels = pyramid.forward(&features)?;

        let mut box_logits = vec![];
        let mut conf_logits = vec![];
        for (head, level) in izip!(heads, &levels) {
            let (boxes, confidences) = head.forward(level)?;
            box_logits.push(boxes);
            conf_logits.push(confidences);
        }

        let boxes = Tensor::cat(&box_logits, 1).sigmoid();
        let confidences = Tensor::cat(&conf_logits, 1);
        let predictions = Tensor::f_cat(&[boxes, confidences], 2)?;
        Ok(predictions)
    }
}
