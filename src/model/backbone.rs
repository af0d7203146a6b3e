use crate::{
    common::*,
    module::{BasicBlock, BasicBlockInit},
};

/// Strides of the tapped stages relative to the input image, fine to
/// coarse.
pub const STRIDES: [i64; 3] = [8, 16, 32];

/// Channel widths of the tapped stages, fine to coarse.
pub const STAGE_CHANNELS: [i64; 3] = [128, 256, 512];

/// Feature maps tapped from the backbone, fine to coarse.
#[derive(Debug)]
pub struct BackboneFeatures {
    /// Stride 8, 128 channels.
    pub c3: Tensor,
    /// Stride 16, 256 channels.
    pub c4: Tensor,
    /// Stride 32, 512 channels.
    pub c5: Tensor,
}

/// ResNet-18 trunk with the classifier removed and the stages declared
/// explicitly, tapped at strides 8, 16 and 32.
///
/// Variable paths mirror the torchvision layout (`conv1`, `bn1`,
/// `layer1/0/conv1`, ...) so converted ResNet-18 weight files load without
/// renaming.
#[derive(Debug, Clone, Default)]
pub struct ResNet18Init;

impl ResNet18Init {
    pub fn build<'p, P>(self, path: P) -> ResNet18
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let conv1 = nn::conv2d(
            path / "conv1",
            3,
            64,
            7,
            nn::ConvConfig {
                stride: 2,
                padding: 3,
                bias: false,
                ..Default::default()
            },
        );
        let bn1 = nn::batch_norm2d(path / "bn1", 64, Default::default());
        let layer1 = stage(&(path / "layer1"), 64, 64, 1);
        let layer2 = stage(&(path / "layer2"), 64, 128, 2);
        let layer3 = stage(&(path / "layer3"), 128, 256, 2);
        let layer4 = stage(&(path / "layer4"), 256, 512, 2);

        ResNet18 {
            conv1,
            bn1,
            layer1,
            layer2,
            layer3,
            layer4,
        }
    }
}

fn stage(path: &nn::Path, in_c: usize, out_c: usize, s: usize) -> [BasicBlock; 2] {
    [
        BasicBlockInit {
            s,
            ..BasicBlockInit::new(in_c, out_c)
        }
        .build(path / "0"),
        BasicBlockInit::new(out_c, out_c).build(path / "1"),
    ]
}

#[derive(Debug)]
pub struct ResNet18 {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    layer1: [BasicBlock; 2],
    layer2: [BasicBlock; 2],
    layer3: [BasicBlock; 2],
    layer4: [BasicBlock; 2],
}

impl ResNet18 {
    /// Extracts the three tapped feature maps from a normalized image batch
    /// [B, 3, H, W]. H and W must be multiples of the coarsest stride.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<BackboneFeatures> {
        let Self {
            conv1,
            bn1,
            layer1,
            layer2,
            layer3,
            layer4,
        } = self;

        let (_b, in_c, in_h, in_w) = xs
            .size4()
            .context("input must be a [batch, channel, height, width] tensor")?;
        ensure!(in_c == 3, "expected 3 input channels, got {}", in_c);
        let max_stride = STRIDES[STRIDES.len() - 1];
        ensure!(
            in_h % max_stride == 0 && in_w % max_stride == 0,
            "input height and width must be multiples of {}, got {}x{}",
            max_stride,
            in_h,
            in_w
        );

        let run = |input: &Tensor, blocks: &[BasicBlock; 2]| {
            blocks
                .iter()
                .fold(input.shallow_clone(), |xs, block| block.forward_t(&xs, train))
        };

        let trunk = xs
            .apply(conv1)
            .apply_t(bn1, train)
            .relu()
            .max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false);
        let trunk = run(&trunk, layer1);

        let c3 = run(&trunk, layer2);
        let c4 = run(&c3, layer3);
        let c5 = run(&c4, layer4);

        for (tensor, &stride, &channels) in izip!([&c3, &c4, &c5], &STRIDES, &STAGE_CHANNELS) {
            check_stage(tensor, stride, channels, in_h, in_w)?;
        }

        Ok(BackboneFeatures { c3, c4, c5 })
    }
}

// The stride/channel contract of the tapped stages is what the pyramid and
// heads are built against; a substituted backbone that breaks it must fail
// here instead of corrupting the fusion sums downstream.
fn check_stage(tensor: &Tensor, stride: i64, channels: i64, in_h: i64, in_w: i64) -> Result<()> {
    let (_b, c, h, w) = tensor.size4()?;
    ensure!(
        c == channels && h == in_h / stride && w == in_w / stride,
        "backbone stage contract violated: expected [{}, {}, {}] at stride {}, got [{}, {}, {}]",
        channels,
        in_h / stride,
        in_w / stride,
        stride,
        c,
        h,
        w
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tapped_stage_shapes() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let backbone = ResNet18Init.build(&vs.root() / "backbone");

        let input = Tensor::rand(&[1, 3, 320, 320], (Kind::Float, Device::Cpu));
        let BackboneFeatures { c3, c4, c5 } = backbone.forward_t(&input, false)?;
        ensure!(c3.size() == vec![1, 128, 40, 40]);
        ensure!(c4.size() == vec![1, 256, 20, 20]);
        ensure!(c5.size() == vec![1, 512, 10, 10]);
        Ok(())
    }

    #[test]
    fn rejects_bad_input_shapes() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let backbone = ResNet18Init.build(&vs.root() / "backbone");

        let gray = Tensor::rand(&[1, 1, 320, 320], (Kind::Float, Device::Cpu));
        ensure!(backbone.forward_t(&gray, false).is_err());

        let ragged = Tensor::rand(&[1, 3, 320, 300], (Kind::Float, Device::Cpu));
        ensure!(backbone.forward_t(&ragged, false).is_err());
        Ok(())
    }
}
