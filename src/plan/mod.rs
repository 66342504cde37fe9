pub mod builder;
pub mod iter;

pub use builder::build;
pub use iter::PlanIter;
