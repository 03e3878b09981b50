//! tlvgen
//!
//! Front door to the schema compiler and its runtime.
//!
//! - The compiler entry points (re-exported from `tlvgen-compiler`)
//! - `build::compile_to_dir` for build scripts
//! - `dump_to_json` for inspecting marshalled data

pub use tlvgen_compiler::{compile_schema, generate, GenerateOptions, Generated, SchemaError, Target};
pub use tlvgen_runtime::{ByteBuffer, ByteBufferMut, Message, Record, TlvError};

use serde_json::{json, Value};

/// Nested payloads deeper than this are reported as plain bytes.
const MAX_DUMP_DEPTH: usize = 32;

/// Decodes a run of tagged records into a pretty-printed JSON array.
///
/// Records carry no schema, so every plausible reading of a payload is
/// reported: the raw bytes as hex, and where they decode, an integer, UTF-8
/// text and nested records.
pub fn dump_to_json(buffer: &[u8]) -> Result<String, TlvError> {
    let records = Record::decode_all(buffer)?;
    let value = Value::Array(records.iter().map(|record| record_to_json(record, 0)).collect());
    Ok(format!("{:#}", value))
}

fn record_to_json(record: &Record<'_>, depth: usize) -> Value {
    let hex: String = record.payload.iter().map(|byte| format!("{:02x}", byte)).collect();
    let mut value = json!({
        "tag":    record.tag,
        "length": record.payload.len(),
        "hex":    hex,
    });

    if let Ok(int) = record.as_int() {
        value["int"] = json!(int);
    }
    if let Ok(text) = std::str::from_utf8(record.payload) {
        if !text.is_empty() {
            value["text"] = json!(text);
        }
    }
    if depth < MAX_DUMP_DEPTH {
        if let Ok(children) = record.children() {
            if !children.is_empty() {
                value["records"] = Value::Array(children.iter().map(|c| record_to_json(c, depth + 1)).collect());
            }
        }
    }
    value
}

pub mod build {
    //! Helpers for `build.rs` scripts.

    use std::{
        fs,
        io::BufReader,
        path::{Path, PathBuf},
    };
    use tlvgen_compiler::{compile_reader, generate, output_paths, GenerateOptions, SchemaError, Target};
    use tracing::info;

    /// Compiles the schema at `input` and writes both generated files into
    /// `out_dir`. Returns the declarations and implementation paths.
    pub fn compile_to_dir(input: &Path, out_dir: &Path, target: Target) -> Result<(PathBuf, PathBuf), SchemaError> {
        let (declarations_path, implementation_path) = output_paths(input, Some(out_dir), target)?;

        info!("Reading \"{}\"", input.display());
        let schema = compile_reader(BufReader::new(fs::File::open(input)?))?;

        let source_name = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let generated = generate(&schema, &GenerateOptions { target, source_name })?;

        fs::create_dir_all(out_dir)?;
        info!("... creating \"{}\"", declarations_path.display());
        fs::write(&declarations_path, generated.declarations)?;
        info!("... creating \"{}\"", implementation_path.display());
        fs::write(&implementation_path, generated.implementation)?;

        Ok((declarations_path, implementation_path))
    }
}
