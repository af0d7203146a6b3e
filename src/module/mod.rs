mod basic_block;
mod detect_head_2d;
mod up_sample_2d;

pub use basic_block::*;
pub use detect_head_2d::*;
pub use up_sample_2d::*;
