use crate::common::*;

/// ResNet basic residual block: two 3x3 conv-bn pairs with an identity or
/// 1x1-projected shortcut.
///
/// Variable paths follow the torchvision layout (`conv1`, `bn1`, `conv2`,
/// `bn2`, `downsample/0`, `downsample/1`) so converted ResNet-18 weight
/// files load without renaming.
#[derive(Debug, Clone)]
pub struct BasicBlockInit {
    pub in_c: usize,
    pub out_c: usize,
    pub s: usize,
}

impl BasicBlockInit {
    pub fn new(in_c: usize, out_c: usize) -> Self {
        Self { in_c, out_c, s: 1 }
    }

    pub fn build<'p, P>(self, path: P) -> BasicBlock
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self { in_c, out_c, s } = self;

        let conv1 = nn::conv2d(
            path / "conv1",
            in_c as i64,
            out_c as i64,
            3,
            nn::ConvConfig {
                stride: s as i64,
                padding: 1,
                bias: false,
                ..Default::default()
            },
        );
        let bn1 = nn::batch_norm2d(path / "bn1", out_c as i64, Default::default());
        let conv2 = nn::conv2d(
            path / "conv2",
            out_c as i64,
            out_c as i64,
            3,
            nn::ConvConfig {
                padding: 1,
                bias: false,
                ..Default::default()
            },
        );
        let bn2 = nn::batch_norm2d(path / "bn2", out_c as i64, Default::default());

        let downsample = (s != 1 || in_c != out_c).then(|| {
            let path = path / "downsample";
            let conv = nn::conv2d(
                &path / "0",
                in_c as i64,
                out_c as i64,
                1,
                nn::ConvConfig {
                    stride: s as i64,
                    bias: false,
                    ..Default::default()
                },
            );
            let bn = nn::batch_norm2d(&path / "1", out_c as i64, Default::default());
            (conv, bn)
        });

        BasicBlock {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
        }
    }
}

#[derive(Debug)]
pub struct BasicBlock {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    downsample: Option<(nn::Conv2D, nn::BatchNorm)>,
}

impl nn::ModuleT for BasicBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let Self {
            conv1,
            bn1,
            conv2,
            bn2,
            downsample,
        } = self;

        let ys = xs
            .apply(conv1)
            .apply_t(bn1, train)
            .relu()
            .apply(conv2)
            .apply_t(bn2, train);
        let shortcut = match downsample {
            Some((conv, bn)) => xs.apply(conv).apply_t(bn, train),
            None => xs.shallow_clone(),
        };
        (ys + shortcut).relu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_block_shapes() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let identity = BasicBlockInit::new(16, 16).build(&root / "identity");
        let strided = BasicBlockInit {
            s: 2,
            ..BasicBlockInit::new(16, 32)
        }
        .build(&root / "strided");

        let input = Tensor::rand(&[1, 16, 8, 8], (Kind::Float, Device::Cpu));
        ensure!(identity.forward_t(&input, false).size() == vec![1, 16, 8, 8]);
        ensure!(strided.forward_t(&input, false).size() == vec![1, 32, 4, 4]);
        Ok(())
    }
}
