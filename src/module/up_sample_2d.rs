use crate::common::*;

/// Nearest-neighbor spatial upsampling by an integer factor.
#[derive(Debug, Clone)]
pub struct UpSample2D {
    scale: i64,
}

impl UpSample2D {
    pub fn new(scale: i64) -> Result<Self> {
        ensure!(scale >= 1, "invalid scale value {}", scale);
        Ok(Self { scale })
    }

    pub fn scale(&self) -> i64 {
        self.scale
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let Self { scale } = *self;
        let (_b, _c, in_h, in_w) = input.size4()?;
        let output = input.upsample_nearest2d(&[in_h * scale, in_w * scale], None, None);
        Ok(output)
    }
}
