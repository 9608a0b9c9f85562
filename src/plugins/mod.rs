//! Builtin plugin adapters layered on the pipeline surface.

pub mod compiler;
pub mod copy;

pub use compiler::{compiler_plugin, CompiledOutput, Compiler, CompilerPluginOptions};
pub use copy::{copy_plugin, CopyPluginOptions, CopyTarget};
