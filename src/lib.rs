//! aerograph - batched lazy execution of graph queries
//!
//! Many concurrent read queries over the same scan are grouped into
//! batches; one member pulls the shared scan and the others read the
//! cached value. A stride-fair scheduler keeps older batches ahead of
//! younger ones.

pub mod cli;
pub mod graph;
pub mod lazy;
pub mod observability;
pub mod pipeline;
