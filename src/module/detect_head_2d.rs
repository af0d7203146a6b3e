use crate::common::*;

/// Anchor-free prediction head for one pyramid level: independent 1x1 box
/// and confidence projections, one prediction per spatial location.
#[derive(Debug, Clone)]
pub struct DetectHead2DInit {
    pub in_c: usize,
    /// Foreground prior; the confidence bias is set so that
    /// sigmoid(confidence_logit) equals this value right after construction.
    pub confidence_prior: f64,
}

impl DetectHead2DInit {
    pub fn new(in_c: usize) -> Self {
        Self {
            in_c,
            confidence_prior: 0.01,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<DetectHead2D>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            in_c,
            confidence_prior,
        } = self;

        ensure!(
            confidence_prior > 0.0 && confidence_prior < 1.0,
            "confidence prior must lie in (0, 1), got {}",
            confidence_prior
        );
        let confidence_bias = -((1.0 - confidence_prior) / confidence_prior).ln();

        let box_conv = nn::conv2d(path / "box_conv", in_c as i64, 4, 1, Default::default());
        let conf_conv = nn::conv2d(
            path / "conf_conv",
            in_c as i64,
            1,
            1,
            nn::ConvConfig {
                bs_init: nn::Init::Const(confidence_bias),
                ..Default::default()
            },
        );

        Ok(DetectHead2D {
            box_conv,
            conf_conv,
        })
    }
}

#[derive(Debug)]
pub struct DetectHead2D {
    box_conv: nn::Conv2D,
    conf_conv: nn::Conv2D,
}

impl DetectHead2D {
    /// Returns raw box logits [B, H*W, 4] and confidence logits [B, H*W, 1]
    /// in row-major location order.
    pub fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let Self {
            box_conv,
            conf_conv,
        } = self;

        let (b, _c, _h, _w) = xs.size4()?;
        let boxes = xs.apply(box_conv).permute(&[0, 2, 3, 1]).reshape(&[b, -1, 4]);
        let confidences = xs
            .apply(conf_conv)
            .permute(&[0, 2, 3, 1])
            .reshape(&[b, -1, 1]);
        Ok((boxes, confidences))
    }
}
