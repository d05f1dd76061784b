pub mod ast;
pub mod lookup;
pub mod compiler;
