use crate::{
    common::*,
    model::backbone::{BackboneFeatures, STAGE_CHANNELS, STRIDES},
    module::UpSample2D,
};

/// Stride ratio between adjacent tapped levels. The fusion ladder upsamples
/// by exactly this factor, so the stride set must honor it.
const UPSAMPLE_SCALE: i64 = 2;

/// Three-level top-down feature pyramid: per-level 1x1 lateral projections
/// to a common channel width, coarse-to-fine upsample-and-add fusion, and a
/// per-level 3x3 smoothing conv.
#[derive(Debug, Clone)]
pub struct PyramidInit {
    /// Channel width of every fused level.
    pub out_c: usize,
}

impl PyramidInit {
    pub fn build<'p, P>(self, path: P) -> Result<Pyramid>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self { out_c } = self;

        ensure!(out_c > 0, "pyramid channel width must be positive");
        for (&fine, &coarse) in STRIDES.iter().tuple_windows() {
            ensure!(
                coarse == fine * UPSAMPLE_SCALE,
                "stride pair {}/{} does not match the fixed {}x fusion upsample",
                fine,
                coarse,
                UPSAMPLE_SCALE
            );
        }

        // Stored coarse to fine, matching the fusion and output order.
        let (lateral, smooth): (Vec<_>, Vec<_>) = izip!(&STRIDES, &STAGE_CHANNELS)
            .rev()
            .map(|(&stride, &in_c)| {
                let lateral = nn::conv2d(
                    path / format!("lateral_s{}", stride),
                    in_c,
                    out_c as i64,
                    1,
                    Default::default(),
                );
                let smooth = nn::conv2d(
                    path / format!("smooth_s{}", stride),
                    out_c as i64,
                    out_c as i64,
                    3,
                    nn::ConvConfig {
                        padding: 1,
                        ..Default::default()
                    },
                );
                (lateral, smooth)
            })
            .unzip();

        Ok(Pyramid {
            lateral,
            smooth,
            up_sample: UpSample2D::new(UPSAMPLE_SCALE)?,
        })
    }
}

#[derive(Debug)]
pub struct Pyramid {
    lateral: Vec<nn::Conv2D>,
    smooth: Vec<nn::Conv2D>,
    up_sample: UpSample2D,
}

impl Pyramid {
    /// Fuses the tapped feature maps into three smoothed levels of uniform
    /// channel width, returned coarse to fine (stride 32, 16, 8).
    pub fn forward(&self, features: &BackboneFeatures) -> Result<[Tensor; 3]> {
        let Self {
            lateral,
            smooth,
            up_sample,
        } = self;

        let BackboneFeatures { c3, c4, c5 } = features;

        let p5 = c5.apply(&lateral[0]);
        let p4 = aligned_sum(&c4.apply(&lateral[1]), &up_sample.forward(&p5)?)?;
        let p3 = aligned_sum(&c3.apply(&lateral[2]), &up_sample.forward(&p4)?)?;

        Ok([
            p5.apply(&smooth[0]),
            p4.apply(&smooth[1]),
            p3.apply(&smooth[2]),
        ])
    }
}

// A misaligned fusion add would broadcast or fail far from the cause;
// check the exact shape before summing.
fn aligned_sum(lateral: &Tensor, upsampled: &Tensor) -> Result<Tensor> {
    let lhs = lateral.size4()?;
    let rhs = upsampled.size4()?;
    ensure!(
        lhs == rhs,
        "pyramid fusion misalignment: lateral {:?} vs upsampled {:?}",
        lhs,
        rhs
    );
    let output = lateral.f_add(upsampled)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(batch: i64, h: i64, w: i64) -> BackboneFeatures {
        let options = (Kind::Float, Device::Cpu);
        BackboneFeatures {
            c3: Tensor::rand(&[batch, 128, h / 8, w / 8], options),
            c4: Tensor::rand(&[batch, 256, h / 16, w / 16], options),
            c5: Tensor::rand(&[batch, 512, h / 32, w / 32], options),
        }
    }

    #[test]
    fn uniform_channel_width() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let pyramid = PyramidInit { out_c: 128 }.build(&vs.root() / "pyramid")?;

        let levels = pyramid.forward(&features(2, 320, 320))?;
        ensure!(levels[0].size() == vec![2, 128, 10, 10]);
        ensure!(levels[1].size() == vec![2, 128, 20, 20]);
        ensure!(levels[2].size() == vec![2, 128, 40, 40]);
        Ok(())
    }

    #[test]
    fn narrower_width_is_respected() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let pyramid = PyramidInit { out_c: 64 }.build(&vs.root() / "pyramid")?;

        let levels = pyramid.forward(&features(1, 320, 320))?;
        for level in &levels {
            ensure!(level.size()[1] == 64);
        }
        Ok(())
    }

    #[test]
    fn rejects_misaligned_levels() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let pyramid = PyramidInit { out_c: 128 }.build(&vs.root() / "pyramid")?;

        let options = (Kind::Float, Device::Cpu);
        let skewed = BackboneFeatures {
            c3: Tensor::rand(&[1, 128, 40, 40], options),
            c4: Tensor::rand(&[1, 256, 21, 21], options),
            c5: Tensor::rand(&[1, 512, 10, 10], options),
        };
        ensure!(pyramid.forward(&skewed).is_err());
        Ok(())
    }
}
