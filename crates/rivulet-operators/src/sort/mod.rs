//! Group-local sorting under a memory budget.

pub mod external;
pub mod run;
pub mod within_groups;

pub use external::ExternalSorter;
pub use within_groups::SortWithinGroups;
