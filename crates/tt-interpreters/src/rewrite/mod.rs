//! Rewrite stages run as the first pass of the standard pipeline:
//! desugar → canonicalize → optimize.

mod canonicalize;
mod desugar;
mod optimize;
mod path;

pub use canonicalize::canonicalize_stage;
pub use desugar::desugar_stage;
pub use optimize::{CostModel, optimize_stage};
pub use path::greedy_path;
