use crate::{
    error::SchemaError,
    gen_c::compile_schema_to_c,
    gen_rust::compile_schema_to_rust,
    parser::{parse_reader, parse_schema},
    types::Schema,
    verifier::verify_schema,
};
use serde::Serialize;
use std::{
    io::BufRead,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

/// Parses and verifies a schema held in memory.
/// Returns `Err(SchemaError)` if parsing or verification fails.
pub fn compile_schema(text: &str) -> Result<Schema, SchemaError> {
    let schema = parse_schema(text)?;
    verify_schema(&schema)?;
    debug!("verified {} structs", schema.structs.len());
    Ok(schema)
}

/// Parses and verifies a schema read line by line from `reader`.
pub fn compile_reader<R: BufRead>(reader: R) -> Result<Schema, SchemaError> {
    let schema = parse_reader(reader)?;
    verify_schema(&schema)?;
    debug!("verified {} structs", schema.structs.len());
    Ok(schema)
}

/// Language the generated code is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// libevent-compatible header and implementation.
    #[default]
    C,
    /// Rust declarations and implementation built on `tlvgen-runtime`.
    Rust,
}

impl Target {
    /// File suffixes for the declarations and implementation outputs.
    pub fn extensions(self) -> (&'static str, &'static str) {
        match self {
            Target::C => ("gen.h", "gen.c"),
            Target::Rust => ("gen.rs", "impl.rs"),
        }
    }
}

impl FromStr for Target {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Target::C),
            "rust" | "rs" => Ok(Target::Rust),
            other => Err(SchemaError::Generation(format!("unknown target \"{}\"", other))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub target:      Target,
    /// Name of the schema source as it should appear in banners and guards.
    pub source_name: String,
}

/// The two files one generation run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    /// Header (`.gen.h`) or declarations (`.gen.rs`).
    pub declarations:   String,
    /// Implementation (`.gen.c` or `.impl.rs`).
    pub implementation: String,
}

/// Generates code for a verified schema.
pub fn generate(schema: &Schema, options: &GenerateOptions) -> Result<Generated, SchemaError> {
    debug!("generating {:?} code for {}", options.target, options.source_name);
    match options.target {
        Target::C => Ok(compile_schema_to_c(schema, &options.source_name)),
        Target::Rust => compile_schema_to_rust(schema, &options.source_name),
    }
}

/// Where `gen` writes its output for `input`: next to the input unless
/// `out_dir` is given. Only `.rpc` inputs are accepted.
pub fn output_paths(input: &Path, out_dir: Option<&Path>, target: Target) -> Result<(PathBuf, PathBuf), SchemaError> {
    let extension = input.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
    if extension != "rpc" {
        return Err(SchemaError::UnsupportedExtension(extension.to_string()));
    }
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| SchemaError::UnsupportedExtension(input.display().to_string()))?;

    let dir = match out_dir {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let (declarations, implementation) = target.extensions();
    let paths = (
        dir.join(format!("{}.{}", stem, declarations)),
        dir.join(format!("{}.{}", stem, implementation)),
    );
    info!("output files {} and {}", paths.0.display(), paths.1.display());
    Ok(paths)
}

/// Renders the verified IR as pretty-printed JSON.
pub fn schema_to_json(schema: &Schema) -> Result<String, SchemaError> {
    serde_json::to_string_pretty(schema).map_err(|e| SchemaError::Generation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_str() {
        assert_eq!("c".parse::<Target>().unwrap(), Target::C);
        assert_eq!("Rust".parse::<Target>().unwrap(), Target::Rust);
        assert!("go".parse::<Target>().is_err());
    }

    #[test]
    fn test_output_paths() {
        let (h, c) = output_paths(Path::new("proto/msg.rpc"), None, Target::C).unwrap();
        assert_eq!(h, Path::new("proto/msg.gen.h"));
        assert_eq!(c, Path::new("proto/msg.gen.c"));

        let (d, i) = output_paths(Path::new("msg.rpc"), Some(Path::new("out")), Target::Rust).unwrap();
        assert_eq!(d, Path::new("out/msg.gen.rs"));
        assert_eq!(i, Path::new("out/msg.impl.rs"));
    }

    #[test]
    fn test_output_paths_rejects_extension() {
        let err = output_paths(Path::new("msg.proto"), None, Target::C).unwrap_err();
        assert_eq!(err.to_string(), "Unrecognized file extension: \"proto\"");
        assert!(output_paths(Path::new("msg"), None, Target::C).is_err());
    }

    #[test]
    fn test_schema_to_json() {
        let schema = compile_schema("struct msg { optional bytes digest[2] = 1; }").unwrap();
        let json: serde_json::Value = serde_json::from_str(&schema_to_json(&schema).unwrap()).unwrap();
        let entry = &json["structs"][0]["entries"][0];
        assert_eq!(entry["name"], "digest");
        assert_eq!(entry["kind"]["type"], "fixed_bytes");
        assert_eq!(entry["kind"]["length"], 2);
        assert_eq!(entry["optional"], true);
    }

    #[test]
    fn test_compile_reader_matches_text() {
        let text = "struct msg {\n int id = 1;\n}\n";
        assert_eq!(compile_reader(text.as_bytes()).unwrap(), compile_schema(text).unwrap());
    }
}
