//! Table-to-table pipeline stages. Each stage reads whole input tables,
//! computes a derived table in memory, and writes or replaces its output.

pub mod alt_match;
pub mod distribute;
pub mod merge;
pub mod metadata;
pub mod reorder;
pub mod resizer;
pub mod rotate;
pub mod structure;
pub mod video;
