use crate::utils::quote;
use thiserror::Error;

/// Every failure the compiler can report. All of them are fatal to a run.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unterminated block comment opened around line {line}")]
    Lex { line: usize },

    #[error("{msg} around line {line}")]
    StructSyntax { msg: String, line: usize },

    #[error("{msg} around line {line}")]
    Type { msg: String, line: usize },

    #[error(
        "Entry {} duplicates tag number {tag} from {} around line {line}",
        quote(.name),
        quote(.previous)
    )]
    DuplicateTag {
        name:     String,
        tag:      u32,
        previous: String,
        line:     usize,
    },

    #[error("Entry {} does not know which struct it belongs to around line {line}", quote(.name))]
    Association { name: String, line: usize },

    #[error("Entry {} is declared twice in struct {} around line {line}", quote(.name), quote(.owner))]
    DuplicateEntry {
        owner: String,
        name:  String,
        line:  usize,
    },

    #[error("Struct {} is defined twice around line {line}", quote(.name))]
    DuplicateStruct { name: String, line: usize },

    #[error(
        "Entry {} of struct {} references undefined struct {} around line {line}",
        quote(.name),
        quote(.owner),
        quote(.target)
    )]
    UnresolvedStruct {
        owner:  String,
        name:   String,
        target: String,
        line:   usize,
    },

    #[error(
        "Tag constant {constant} is generated by both {first} and {second} around line {line}"
    )]
    NameCollision {
        constant: String,
        first:    String,
        second:   String,
        line:     usize,
    },

    #[error("Unrecognized file extension: {}", quote(.0))]
    UnsupportedExtension(String),

    #[error("Code generation failed: {0}")]
    Generation(String),
}

impl SchemaError {
    /// Source line the error refers to, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            SchemaError::Lex { line }
            | SchemaError::StructSyntax { line, .. }
            | SchemaError::Type { line, .. }
            | SchemaError::DuplicateTag { line, .. }
            | SchemaError::Association { line, .. }
            | SchemaError::DuplicateEntry { line, .. }
            | SchemaError::DuplicateStruct { line, .. }
            | SchemaError::UnresolvedStruct { line, .. }
            | SchemaError::NameCollision { line, .. } => Some(*line),
            SchemaError::Io(_) | SchemaError::UnsupportedExtension(_) | SchemaError::Generation(_) => None,
        }
    }
}
