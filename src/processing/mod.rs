//! Wire decoding and record aging

pub mod lifecycle;
pub mod parser;

pub use lifecycle::{
    advance, check_invariants, classify, combine_edge_state, LifecycleManager, LifecycleReport, Timeouts,
};
pub use parser::{ParseError, ParsedBatch, PayloadParser, RejectedElement};
