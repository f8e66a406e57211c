//! Data structures for compositional correlation analysis.

mod component_matrix;
mod count_matrix;

pub use component_matrix::ComponentMatrix;
pub use count_matrix::CountMatrix;
