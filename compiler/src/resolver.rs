use crate::{
    error::SchemaError,
    types::{Entry, EntryKind, Struct},
    utils::{quote, syntax_error, type_error},
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NAME:        Regex = Regex::new(r"^([^\[\]]+)(?:\[([^\[\]]*)\])?$").unwrap();
    static ref IDENTIFIER:  Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref NUMBER:      Regex = Regex::new(r"^[0-9]+$").unwrap();
    static ref STRUCT_TYPE: Regex = Regex::new(r"(?i)^struct\[([a-z][a-z_0-9]*)\]$").unwrap();
}

/// The pieces of one field declaration before its kind is resolved.
#[derive(Debug, Default)]
struct Declaration<'a> {
    optional: bool,
    array:    bool,
    type_:    &'a str,
    name:     &'a str,
    length:   Option<&'a str>,
    tag:      u32,
}

/// Resolves one normalized field declaration and appends it to `owner`.
pub fn resolve_entry(owner: &mut Struct, decl: &str, line: usize) -> Result<(), SchemaError> {
    let entry = build_entry(&owner.name, decl, line)?;
    owner.add_entry(entry)
}

/// Resolves one normalized field declaration into a verified entry.
pub fn build_entry(owner: &str, decl: &str, line: usize) -> Result<Entry, SchemaError> {
    let parsed = split_declaration(decl, line)?;
    let element = resolve_kind(&parsed, decl, line)?;
    let kind = if parsed.array {
        EntryKind::Array { element: Box::new(element) }
    } else {
        element
    };

    let entry = Entry {
        name: parsed.name.to_string(),
        tag: parsed.tag,
        kind,
        optional: parsed.optional,
        line,
        owner: Some(owner.to_string()),
    };
    entry.verify()?;
    Ok(entry)
}

fn split_declaration(decl: &str, line: usize) -> Result<Declaration<'_>, SchemaError> {
    let mut parsed = Declaration::default();
    let mut tokens = decl.split_whitespace().peekable();

    // Modifiers come first, in any order.
    while let Some(&token) = tokens.peek() {
        let flag = match token {
            "optional" => &mut parsed.optional,
            "array" => &mut parsed.array,
            _ => break,
        };
        if *flag {
            return Err(syntax_error(format!("Duplicate modifier {} in {}", quote(token), quote(decl)), line));
        }
        *flag = true;
        tokens.next();
    }

    parsed.type_ = tokens
        .next()
        .ok_or_else(|| syntax_error(format!("Missing type in {}", quote(decl)), line))?;

    let name_token = tokens
        .next()
        .ok_or_else(|| syntax_error(format!("Missing name in {}", quote(decl)), line))?;
    let captures = NAME
        .captures(name_token)
        .ok_or_else(|| syntax_error(format!("Cannot parse name: {}", quote(decl)), line))?;
    let name = captures.get(1).map_or("", |m| m.as_str());
    if !IDENTIFIER.is_match(name) {
        return Err(syntax_error(format!("Cannot parse name: {}", quote(decl)), line));
    }
    parsed.name = name;
    parsed.length = captures.get(2).map(|m| m.as_str());

    match tokens.next() {
        Some("=") => {}
        Some(other) => {
            return Err(syntax_error(
                format!("Expected \"=\" after name {} got {}", quote(name), quote(other)),
                line,
            ))
        }
        None => return Err(syntax_error(format!("Need tag number: {}", quote(decl)), line)),
    }

    let tag = tokens
        .next()
        .ok_or_else(|| syntax_error(format!("Need tag number: {}", quote(decl)), line))?;
    if !NUMBER.is_match(tag) {
        return Err(syntax_error(format!("Expected tag number: {}", quote(decl)), line));
    }
    parsed.tag = match tag.parse::<u32>() {
        Ok(tag) if tag < u32::MAX => tag,
        _ => return Err(syntax_error(format!("Tag number {} is out of range", tag), line)),
    };

    if tokens.next().is_some() {
        return Err(syntax_error(format!("Cannot parse {}", quote(decl)), line));
    }
    Ok(parsed)
}

fn resolve_kind(parsed: &Declaration<'_>, decl: &str, line: usize) -> Result<EntryKind, SchemaError> {
    let length = match parsed.length {
        None => None,
        Some(text) if NUMBER.is_match(text) => Some(
            text.parse::<usize>()
                .map_err(|_| syntax_error(format!("Length {} is out of range", quote(text)), line))?,
        ),
        Some(_) => return Err(syntax_error(format!("Cannot parse name: {}", quote(decl)), line)),
    };

    let kind = match (parsed.type_, length) {
        ("bytes", Some(length)) => EntryKind::FixedBytes { length },
        ("bytes", None) => EntryKind::VarBytes,
        ("int", None) => EntryKind::Int,
        ("string", None) => EntryKind::Text,
        (type_, length) => match STRUCT_TYPE.captures(type_) {
            Some(captures) if length.is_none() => EntryKind::StructRef {
                target: captures[1].to_string(),
            },
            Some(_) | None if length.is_some() => {
                return Err(type_error(
                    format!("Entry {} of type {} cannot have a fixed length", quote(parsed.name), quote(type_)),
                    line,
                ))
            }
            _ => return Err(type_error(format!("Bad type: {} in {}", quote(type_), quote(decl)), line)),
        },
    };
    Ok(kind)
}
