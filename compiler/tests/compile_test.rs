#![cfg(test)]

use std::fs;
use tlvgen_compiler::{
    compile_reader, compile_schema, generate, output_paths,
    types::{EntryKind, Ownership},
    GenerateOptions, SchemaError, Target,
};

const REGRESS: &str = r#"
#include <sys/types.h>

/* Tests that the generator handles forward references,
 * nested structs and arrays. */
struct msg {
  string from_name = 1;
  string to_name = 2;
  optional struct[kill] attack = 3;
  array struct[run] run = 4;
}

struct kill {
  string weapon = 0x1;
  string action = 2;
  optional int how_often = 3;
}
"#;

const RUN: &str = r#"
struct msg {
  string from_name = 1;
  string to_name = 2;
  optional struct[kill] attack = 3;
  array struct[run] run = 4;
}

struct kill {
  string weapon = 1;
  string action = 2;
  optional int how_often = 3;
}

struct run {
  string how = 1;
  optional bytes some_bytes = 2;
  bytes fixed_bytes[24] = 3;
}
"#;

#[test]
fn test_compile_schema() {
    let schema = compile_schema(RUN).expect("compile_schema failed");
    assert_eq!(schema.structs.len(), 3);

    let msg = schema.find_struct("msg").expect("msg is missing");
    assert_eq!(msg.entries.len(), 4);
    assert_eq!(msg.entries[2].kind.struct_target(), Some("kill"));
    assert!(msg.entries[3].is_array());
    assert_eq!(msg.entries[3].kind.ownership(), Ownership::Sequence);

    let run = schema.find_struct("run").expect("run is missing");
    assert_eq!(run.entries[2].kind, EntryKind::FixedBytes { length: 24 });
    assert_eq!(run.entries[1].kind.ownership(), Ownership::Buffer);
}

#[test]
fn test_hex_tag_is_rejected() {
    let err = compile_schema(REGRESS).unwrap_err();
    assert!(matches!(err, SchemaError::StructSyntax { line: 14, .. }), "unexpected error {:?}", err);
}

#[test]
fn test_sentinel_exceeds_every_tag() {
    let schema = compile_schema("struct sparse {\n int a = 9;\n int b = 2;\n int c = 40;\n}").unwrap();
    let sparse = &schema.structs[0];
    for entry in &sparse.entries {
        assert!(sparse.max_tags() > entry.tag);
    }
    assert_eq!(sparse.max_tags(), 41);

    let header = generate(&schema, &GenerateOptions::default()).unwrap().declarations;
    assert!(header.contains("  SPARSE_A=9,\n  SPARSE_B=2,\n  SPARSE_C=40,\n  SPARSE_MAX_TAGS=41\n"));
}

#[test]
fn test_duplicate_tag_fails_before_emission() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("dup.rpc");
    fs::write(&input, "struct msg {\n  int a = 3;\n  string b = 3;\n}\n").unwrap();

    let reader = std::io::BufReader::new(fs::File::open(&input).unwrap());
    let err = compile_reader(reader).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("\"a\"") && text.contains("\"b\"") && text.contains("line 3"), "{}", text);

    let (header, body) = output_paths(&input, None, Target::C).unwrap();
    assert!(!header.exists());
    assert!(!body.exists());
}

#[test]
fn test_both_targets_generate() {
    let schema = compile_schema(RUN).unwrap();
    for target in [Target::C, Target::Rust] {
        let options = GenerateOptions {
            target,
            source_name: "run.rpc".to_string(),
        };
        let generated = generate(&schema, &options).unwrap();
        assert!(generated.declarations.contains("run.rpc"));
        assert!(generated.implementation.contains("evtag_unmarshal_run"));
        assert!(generated.implementation.contains("evtag_marshal_kill"));
    }
}

#[test]
fn test_empty_schema_generates_preambles() {
    let schema = compile_schema("").unwrap();
    let generated = generate(&schema, &GenerateOptions {
        target:      Target::C,
        source_name: "empty.rpc".to_string(),
    })
    .unwrap();
    assert!(generated.declarations.contains("#ifndef _EMPTY_RPC_"));
    assert!(generated.implementation.contains("#include \"empty.gen.h\""));
}
