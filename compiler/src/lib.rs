//! tlvgen-compiler
//!
//! This crate implements:
//!  1) A line normalizer + parser for `.rpc` schema files,
//!  2) A field resolver and schema verifier (duplicate tags, unresolved structs, etc.),
//!  3) Code generation for C (`compile_schema_to_c`) and Rust (`compile_schema_to_rust`),
//!  4) The `SchemaError` type every stage reports.

pub mod error;
pub mod types;
pub mod utils;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod verifier;
pub mod compiler;
pub mod gen_c;
pub mod gen_rust;

pub use compiler::{compile_reader, compile_schema, generate, output_paths, schema_to_json};
pub use compiler::{GenerateOptions, Generated, Target};
pub use error::SchemaError;
pub use gen_c::compile_schema_to_c;
pub use gen_rust::compile_schema_to_rust;
pub use parser::parse_schema;
