pub mod chunker;
pub mod source;
pub mod walker;
