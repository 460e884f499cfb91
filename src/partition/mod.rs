//! Identity-consistent dataset partitioning.
//!
//! Each identity's crops are split independently into three disjoint subsets:
//! a held-out fraction is drawn with a seeded RNG, a share of it becomes the
//! gallery (`bounding_box_test`), the rest of it the `query` set, and the
//! remaining crops the training set (`bounding_box_train`).
//!
//! - `plan` - Pure assignment of crop names to splits
//! - `apply` - Idempotent file moves realizing a plan on disk

mod apply;
mod plan;

pub use apply::{ApplySummary, Partitioner, RESERVED_DIRS};
pub use plan::{partition_identity, split_counts, IdentityAssignment, PartitionPlan};
pub(crate) use plan::ceil_fraction;

/// The three ReID subsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Split {
    Train,
    Query,
    Gallery,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Query, Split::Gallery];

    /// Directory name in the Market-1501 layout.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "bounding_box_train",
            Split::Query => "query",
            Split::Gallery => "bounding_box_test",
        }
    }
}
