mod node_cache;

pub use node_cache::*;
