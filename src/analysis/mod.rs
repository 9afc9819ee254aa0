//! Whole-volume operations built on the directory walker.

pub mod chains;
pub mod extract;
pub mod fix;
pub mod list;
pub mod search;
pub mod walk;

pub use chains::{ChainAnalysis, ChainExtent, ClusterChain};
pub use extract::{extract_tree, ExtractStats, ExtractVisitor};
pub use fix::{fix_chain, fix_volume, FixOutcome, FixStats, FixVisitor};
pub use list::{list_entries, list_tree, EntryKind, ListEntry, ListVisitor};
pub use search::{search_cluster, SearchHit, SearchVisitor};
pub use walk::{walk, WalkPolicy, WalkVisitor};
