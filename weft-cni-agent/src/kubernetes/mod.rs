pub mod node;

pub use node::{LocalNode, local_node};
