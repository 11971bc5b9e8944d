//! Protocol nodes that sit in the stream pipeline

pub mod batcher;
