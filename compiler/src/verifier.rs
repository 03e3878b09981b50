use crate::{error::SchemaError, types::Schema};
use std::collections::HashMap;

/// Checks what can only be checked once every struct is known: struct names
/// are unique, every struct reference resolves, and no two entries generate
/// the same tag constant.
pub fn verify_schema(schema: &Schema) -> Result<(), SchemaError> {
    // 1) Check duplicate struct names
    let mut defined: HashMap<&str, usize> = HashMap::new();
    for strukt in &schema.structs {
        if defined.insert(&strukt.name, strukt.line).is_some() {
            return Err(SchemaError::DuplicateStruct {
                name: strukt.name.clone(),
                line: strukt.line,
            });
        }
    }

    // 2) Check that every referenced struct is defined
    for strukt in &schema.structs {
        for entry in &strukt.entries {
            if let Some(target) = entry.kind.struct_target() {
                if !defined.contains_key(target) {
                    return Err(SchemaError::UnresolvedStruct {
                        owner:  strukt.name.clone(),
                        name:   entry.name.clone(),
                        target: target.to_string(),
                        line:   entry.line,
                    });
                }
            }
        }
    }

    // 3) Check that generated tag constants do not collide
    let mut constants: HashMap<String, String> = HashMap::new();
    for strukt in &schema.structs {
        let sentinel = (strukt.max_tags_name(), format!("{}.MAX_TAGS", strukt.name), strukt.line);
        let tags = strukt
            .entries
            .iter()
            .map(|entry| (strukt.tag_name(entry), format!("{}.{}", strukt.name, entry.name), entry.line));

        for (constant, origin, line) in tags.chain(std::iter::once(sentinel)) {
            if let Some(first) = constants.get(&constant) {
                return Err(SchemaError::NameCollision {
                    constant,
                    first: first.clone(),
                    second: origin,
                    line,
                });
            }
            constants.insert(constant, origin);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn verify(text: &str) -> Result<(), SchemaError> {
        verify_schema(&parse_schema(text).unwrap())
    }

    #[test]
    fn test_forward_and_self_references() {
        let input = "
        struct msg { array struct[item] items = 1; }
        struct item { int qty = 1; optional struct[item] next = 2; }
        ";
        assert!(verify(input).is_ok());
    }

    #[test]
    fn test_unresolved_struct() {
        let err = verify("struct msg {\n struct[missing] m = 1;\n}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Entry \"m\" of struct \"msg\" references undefined struct \"missing\" around line 2"
        );
    }

    #[test]
    fn test_duplicate_struct() {
        let err = verify("struct a { int x = 1; }\nstruct a { int y = 1; }").unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateStruct { line: 2, .. }), "unexpected error {:?}", err);
    }

    #[test]
    fn test_tag_constant_collisions() {
        let err = verify("struct a_b { int c = 1; }\nstruct a { int b_c = 1; }").unwrap_err();
        assert!(
            matches!(&err, SchemaError::NameCollision { constant, .. } if constant == "A_B_C"),
            "unexpected error {:?}",
            err
        );

        let err = verify("struct a { int max_tags = 1; }").unwrap_err();
        assert!(matches!(err, SchemaError::NameCollision { .. }), "unexpected error {:?}", err);
    }
}
