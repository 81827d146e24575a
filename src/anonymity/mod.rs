pub mod path_selection;

pub use path_selection::{FixedPathSelector, PathSelector, RandomPathSelector};
