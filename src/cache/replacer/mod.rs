//! Round-robin eviction walker: picks victims across one or more trees,
//! favoring low read-generation and high memory footprint.

mod walker;

pub use walker::EvictionWalker;
