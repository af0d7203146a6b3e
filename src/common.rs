//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use itertools::{izip, Itertools};
pub use log::{info, warn};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::BTreeMap,
    path::{Path, PathBuf},
};
pub use tch::{
    nn::{self, ModuleT as _, OptimizerConfig as _},
    Device, IndexOp, Kind, Tensor,
};
