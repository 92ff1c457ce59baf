//! External sorting collections.
//!
//! Signature and index records are accumulated during the first two passes of
//! the pipeline into collections that hold a bounded number of records in
//! memory, spill sorted runs to temporary files, and on iteration yield a
//! k-way merged sorted stream.

pub mod external;
pub mod index;

pub use external::{SortingCollection, SpillCodec};
pub use index::SortingLongCollection;
