//! Detector construction configuration.

use crate::common::*;

/// Construction-time detector options.
///
/// This is the entire configurable surface of the network. The stride set
/// and the tapped backbone channel widths are structural constants that get
/// validated at construction and forward time rather than configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Channel width shared by every pyramid level.
    #[serde(default = "default_pyramid_channels")]
    pub pyramid_channels: usize,
    /// Foreground prior used to bias the confidence heads so that
    /// sigmoid(confidence_logit) starts near this value everywhere.
    #[serde(default = "default_confidence_prior")]
    pub confidence_prior: R64,
    /// Optional tch-format ResNet-18 weight file for backbone
    /// initialization.
    #[serde(default)]
    pub pretrained_backbone: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pyramid_channels: default_pyramid_channels(),
            confidence_prior: default_confidence_prior(),
            pretrained_backbone: None,
        }
    }
}

impl DetectorConfig {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

fn default_pyramid_channels() -> usize {
    128
}

fn default_confidence_prior() -> R64 {
    r64(0.01)
}
