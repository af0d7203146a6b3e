mod backbone;
mod detector;
mod pyramid;

pub use backbone::*;
pub use detector::*;
pub use pyramid::*;
