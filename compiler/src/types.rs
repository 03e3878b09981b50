use crate::{
    error::SchemaError,
    utils::{quote, type_error},
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Everything parsed from one schema source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    /// `#include` and conditional-compilation lines found outside structs,
    /// in input order.
    pub directives: Vec<String>,
    pub structs:    Vec<Struct>,
}

impl Schema {
    pub fn find_struct(&self, name: &str) -> Option<&Struct> {
        self.structs.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Struct {
    pub name:    String,
    pub line:    usize,
    pub entries: Vec<Entry>,
    #[serde(skip)]
    tags:        BTreeMap<u32, String>,
}

impl Struct {
    pub fn new(name: &str, line: usize) -> Self {
        debug!("created struct {}", name);
        Struct {
            name: name.to_string(),
            line,
            entries: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Appends `entry`, rejecting a tag or a name that is already taken.
    pub fn add_entry(&mut self, entry: Entry) -> Result<(), SchemaError> {
        if let Some(previous) = self.tags.get(&entry.tag) {
            return Err(SchemaError::DuplicateTag {
                name:     entry.name,
                tag:      entry.tag,
                previous: previous.clone(),
                line:     entry.line,
            });
        }
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(SchemaError::DuplicateEntry {
                owner: self.name.clone(),
                name:  entry.name,
                line:  entry.line,
            });
        }
        debug!("added entry {}.{} = {}", self.name, entry.name, entry.tag);
        self.tags.insert(entry.tag, entry.name.clone());
        self.entries.push(entry);
        Ok(())
    }

    /// Name of the entry that owns `tag`.
    pub fn tag_owner(&self, tag: u32) -> Option<&str> {
        self.tags.get(&tag).map(String::as_str)
    }

    /// Name of the generated tag constant for `entry`.
    pub fn tag_name(&self, entry: &Entry) -> String {
        format!("{}_{}", self.name, entry.name).to_uppercase()
    }

    /// Name of the sentinel constant that follows the tag constants.
    pub fn max_tags_name(&self) -> String {
        format!("{}_MAX_TAGS", self.name.to_uppercase())
    }

    /// One more than the largest tag, or 0 for a struct without entries.
    pub fn max_tags(&self) -> u32 {
        self.tags.keys().next_back().map_or(0, |tag| tag.saturating_add(1))
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub name:     String,
    pub tag:      u32,
    pub kind:     EntryKind,
    pub optional: bool,
    pub line:     usize,
    /// Name of the struct the entry was declared in.
    pub owner:    Option<String>,
}

impl Entry {
    pub fn is_array(&self) -> bool {
        matches!(self.kind, EntryKind::Array { .. })
    }

    /// Completeness requires every entry that is neither optional nor an array.
    pub fn is_required(&self) -> bool {
        !self.optional && !self.is_array()
    }

    /// Checks the kind's own preconditions, then the ones every entry shares.
    pub fn verify(&self) -> Result<(), SchemaError> {
        if let EntryKind::FixedBytes { length: 0 } = self.kind.element() {
            return Err(type_error(format!("Entry {} needs a length", quote(&self.name)), self.line));
        }
        if let EntryKind::Array { element } = &self.kind {
            if !element.is_array_capable() {
                return Err(type_error(
                    format!("Entry {} cannot be created as an array", quote(&self.name)),
                    self.line,
                ));
            }
        }
        if self.owner.is_none() {
            return Err(SchemaError::Association {
                name: self.name.clone(),
                line: self.line,
            });
        }
        if self.optional && self.is_array() {
            return Err(type_error(
                format!("Entry {} has illegal combination of optional and array", quote(&self.name)),
                self.line,
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    FixedBytes { length: usize },
    VarBytes,
    Int,
    Text,
    StructRef { target: String },
    Array { element: Box<EntryKind> },
}

/// How a generated instance holds a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ownership {
    /// Stored in place; clearing resets it to zero.
    Inline,
    /// Owned byte buffer.
    Buffer,
    /// Owned string.
    Text,
    /// Owned nested instance, created on demand.
    Struct,
    /// Owned sequence of nested instances.
    Sequence,
}

impl EntryKind {
    /// Only struct references may be repeated.
    pub fn is_array_capable(&self) -> bool {
        matches!(self, EntryKind::StructRef { .. })
    }

    /// The repeated kind for arrays, `self` otherwise.
    pub fn element(&self) -> &EntryKind {
        match self {
            EntryKind::Array { element } => element.as_ref(),
            other => other,
        }
    }

    /// The struct this kind refers to, directly or through an array.
    pub fn struct_target(&self) -> Option<&str> {
        match self.element() {
            EntryKind::StructRef { target } => Some(target.as_str()),
            _ => None,
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            EntryKind::FixedBytes { .. } | EntryKind::Int => Ownership::Inline,
            EntryKind::VarBytes => Ownership::Buffer,
            EntryKind::Text => Ownership::Text,
            EntryKind::StructRef { .. } => Ownership::Struct,
            EntryKind::Array { .. } => Ownership::Sequence,
        }
    }
}
