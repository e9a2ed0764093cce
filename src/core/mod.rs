pub mod graph;
pub mod op;
pub mod tensor;
pub mod types;
