use crate::{
    compiler::Generated,
    error::SchemaError,
    types::{Entry, EntryKind, Schema, Struct},
    utils::{escape_rust_keyword, indent, to_pascal_case},
};
use std::collections::HashMap;

const RESULT: &str = "::core::result::Result<(), ::tlvgen_runtime::TlvError>";
const TLV_ERROR: &str = "::tlvgen_runtime::TlvError";
const READER: &str = "::tlvgen_runtime::ByteBuffer<'_>";
const WRITER: &str = "::tlvgen_runtime::ByteBufferMut";

/// Rust type name for a schema struct, e.g. `run_stats` → `RunStats`.
pub fn rust_type_name(name: &str) -> String {
    escape_rust_keyword(&to_pascal_case(name))
}

/// Compiles the schema into a declarations file (`.gen.rs`) and an
/// implementation file (`.impl.rs`). Both are meant to be `include!`d into
/// the same module, so neither carries `use` items.
pub fn compile_schema_to_rust(schema: &Schema, source_name: &str) -> Result<Generated, SchemaError> {
    let types = type_names(schema)?;

    let mut declarations: Vec<String> = Vec::new();
    let mut implementation: Vec<String> = Vec::new();
    let banner = format!(
        "// Automatically generated from {} by tlvgen/{}.\n// DO NOT EDIT THIS FILE.\n",
        source_name,
        env!("CARGO_PKG_VERSION")
    );
    declarations.push(banner.clone());
    implementation.push(banner);

    for strukt in &schema.structs {
        let gen = RustStruct::new(strukt, &types)?;
        declarations.push(gen.tag_constants());
        declarations.push(gen.declaration());
        implementation.push(gen.implementation());
    }

    Ok(Generated {
        declarations:   declarations.join("\n"),
        implementation: implementation.join("\n"),
    })
}

/// Maps every struct name to its Rust type name, rejecting names that
/// collapse onto the same type or wrapper function.
fn type_names(schema: &Schema) -> Result<HashMap<&str, String>, SchemaError> {
    let mut types = HashMap::new();
    let mut seen: HashMap<String, &str> = HashMap::new();
    for strukt in &schema.structs {
        let type_name = rust_type_name(&strukt.name);
        for generated in [type_name.clone(), format!("evtag_marshal_{}", strukt.name.to_lowercase())] {
            if let Some(first) = seen.insert(generated.clone(), &strukt.name) {
                return Err(SchemaError::Generation(format!(
                    "structs \"{}\" and \"{}\" both generate `{}`",
                    first, strukt.name, generated
                )));
            }
        }
        types.insert(strukt.name.as_str(), type_name);
    }
    Ok(types)
}

struct RustStruct<'a> {
    strukt:    &'a Struct,
    type_name: &'a str,
    entries:   Vec<RustEntry<'a>>,
}

impl<'a> RustStruct<'a> {
    fn new(strukt: &'a Struct, types: &'a HashMap<&str, String>) -> Result<Self, SchemaError> {
        let type_name = types
            .get(strukt.name.as_str())
            .ok_or_else(|| SchemaError::Generation(format!("no type name for struct \"{}\"", strukt.name)))?;

        let mut entries = Vec::with_capacity(strukt.entries.len());
        for entry in &strukt.entries {
            let target = match entry.kind.struct_target() {
                Some(target) => Some(types.get(target).ok_or_else(|| {
                    SchemaError::Generation(format!("struct \"{}\" is not defined", target))
                })?),
                None => None,
            };
            entries.push(RustEntry {
                entry,
                target: target.map(|t| t.as_str()),
            });
        }

        Ok(RustStruct {
            strukt,
            type_name,
            entries,
        })
    }

    fn tag_constants(&self) -> String {
        let mut out = format!("// Tag definition for {}\n", self.strukt.name);
        for entry in &self.strukt.entries {
            out.push_str(&format!("pub const {}: u32 = {};\n", self.strukt.tag_name(entry), entry.tag));
        }
        out.push_str(&format!(
            "pub const {}: u32 = {};\n",
            self.strukt.max_tags_name(),
            self.strukt.max_tags()
        ));
        out
    }

    fn declaration(&self) -> String {
        let mut fields = String::new();
        for gen in &self.entries {
            fields.push_str(&format!("{}_data: {},\n", gen.entry.name, gen.storage_type()));
        }
        for gen in &self.entries {
            fields.push_str(&format!("{}_set: bool,\n", gen.entry.name));
        }
        format!(
            "// Structure declaration for {}
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq)]
pub struct {} {{
{}}}
",
            self.strukt.name,
            self.type_name,
            indent(&fields, "    ")
        )
    }

    fn implementation(&self) -> String {
        let name = &self.strukt.name;
        let ty = self.type_name;
        let lower = name.to_lowercase();

        let mut methods: Vec<String> = Vec::new();
        methods.push(self.code_new());
        for gen in &self.entries {
            methods.push(gen.code_accessors());
        }
        methods.push(self.code_clear());
        methods.push(self.code_marshal());
        methods.push(self.code_unmarshal());
        methods.push(self.code_complete());

        format!(
            "// Implementation of {name}
#[allow(non_snake_case, unused_variables)]
impl {ty} {{
{methods}}}

impl ::std::default::Default for {ty} {{
    fn default() -> Self {{
        {ty}::new()
    }}
}}

impl ::tlvgen_runtime::Message for {ty} {{
    const NAME: &'static str = \"{name}\";

    fn marshal(&self, buf: &mut {WRITER}) -> {RESULT} {{
        {ty}::marshal(self, buf)
    }}

    fn unmarshal(&mut self, buf: &mut {READER}) -> {RESULT} {{
        {ty}::unmarshal(self, buf)
    }}

    fn complete(&self) -> {RESULT} {{
        {ty}::complete(self)
    }}

    fn clear(&mut self) {{
        {ty}::clear(self)
    }}
}}

/// Marshals `msg` as one record carrying `tag`.
pub fn evtag_marshal_{lower}(buf: &mut {WRITER}, tag: u32, msg: &{ty}) -> {RESULT} {{
    ::tlvgen_runtime::evtag_marshal(buf, tag, msg)
}}

/// Unmarshals one record carrying `need_tag` into `msg`.
pub fn evtag_unmarshal_{lower}(buf: &mut {READER}, need_tag: u32, msg: &mut {ty}) -> {RESULT} {{
    ::tlvgen_runtime::evtag_unmarshal(buf, need_tag, msg)
}}
",
            methods = indent(&methods.join("\n"), "    ")
        )
    }

    fn code_new(&self) -> String {
        let mut fields = String::new();
        for gen in &self.entries {
            fields.push_str(&format!("{}_data: {},\n", gen.entry.name, gen.empty_value()));
        }
        for gen in &self.entries {
            fields.push_str(&format!("{}_set: false,\n", gen.entry.name));
        }
        format!(
            "pub fn new() -> Self {{
    Self {{
{}    }}
}}
",
            indent(&fields, "        ")
        )
    }

    fn code_clear(&self) -> String {
        let mut body = String::new();
        for gen in &self.entries {
            body.push_str(&format!(
                "self.{n}_data = {};\nself.{n}_set = false;\n",
                gen.empty_value(),
                n = gen.entry.name
            ));
        }
        format!("/// Resets every field to unset.\npub fn clear(&mut self) {{\n{}}}\n", indent(&body, "    "))
    }

    fn code_marshal(&self) -> String {
        let mut body = String::new();
        for gen in &self.entries {
            let n = &gen.entry.name;
            let code = gen.code_marshal(&self.strukt.tag_name(gen.entry));
            if gen.entry.optional {
                body.push_str(&format!("if self.{n}_set {{\n{}}}\n", indent(&code, "    ")));
            } else {
                if gen.entry.is_required() {
                    body.push_str(&format!(
                        "if !self.{n}_set {{\n    return Err({TLV_ERROR}::Unset(\"{n}\"));\n}}\n"
                    ));
                }
                body.push_str(&code);
            }
        }
        body.push_str("Ok(())\n");
        format!(
            "/// Appends one record per set field to `buf`.\npub fn marshal(&self, buf: &mut {WRITER}) -> {RESULT} {{\n{}}}\n",
            indent(&body, "    ")
        )
    }

    fn code_unmarshal(&self) -> String {
        let mut arms = String::new();
        for gen in &self.entries {
            let n = &gen.entry.name;
            let tag = self.strukt.tag_name(gen.entry);
            let mut arm = String::new();
            if !gen.entry.is_array() {
                arm.push_str(&format!(
                    "if self.{n}_set {{\n    return Err({TLV_ERROR}::DuplicateField(\"{n}\"));\n}}\n"
                ));
            }
            arm.push_str(&gen.code_unmarshal(&tag));
            arms.push_str(&format!("{tag} => {{\n{}}}\n", indent(&arm, "    ")));
        }
        arms.push_str(&format!("tag => return Err({TLV_ERROR}::UnknownTag(tag)),\n"));

        format!(
            "/// Decodes records until `buf` is exhausted, then checks completeness.
pub fn unmarshal(&mut self, buf: &mut {READER}) -> {RESULT} {{
    while !buf.is_empty() {{
        match buf.peek_tag()? {{
{}        }}
    }}
    self.complete()
}}
",
            indent(&arms, "            ")
        )
    }

    fn code_complete(&self) -> String {
        let mut body = String::new();
        for gen in &self.entries {
            body.push_str(&gen.code_complete(&self.strukt.name));
        }
        body.push_str("Ok(())\n");
        format!(
            "/// Fails unless every required field, recursively, is set.\npub fn complete(&self) -> {RESULT} {{\n{}}}\n",
            indent(&body, "    ")
        )
    }
}

/// One entry as seen by the Rust emitter.
struct RustEntry<'a> {
    entry:  &'a Entry,
    /// Rust type of the referenced struct, for struct and array entries.
    target: Option<&'a str>,
}

impl<'a> RustEntry<'a> {
    fn target(&self) -> &'a str {
        self.target.unwrap_or_default()
    }

    fn target_fn(&self) -> String {
        self.entry.kind.struct_target().unwrap_or_default().to_lowercase()
    }

    fn storage_type(&self) -> String {
        match &self.entry.kind {
            EntryKind::FixedBytes { length } => format!("[u8; {length}]"),
            EntryKind::VarBytes => "::std::vec::Vec<u8>".to_string(),
            EntryKind::Int => "u32".to_string(),
            EntryKind::Text => "::std::string::String".to_string(),
            EntryKind::StructRef { .. } => {
                format!("::core::option::Option<::std::boxed::Box<{}>>", self.target())
            }
            EntryKind::Array { .. } => format!("::std::vec::Vec<{}>", self.target()),
        }
    }

    fn empty_value(&self) -> String {
        match &self.entry.kind {
            EntryKind::FixedBytes { length } => format!("[0; {length}]"),
            EntryKind::VarBytes | EntryKind::Array { .. } => "::std::vec::Vec::new()".to_string(),
            EntryKind::Int => "0".to_string(),
            EntryKind::Text => "::std::string::String::new()".to_string(),
            EntryKind::StructRef { .. } => "None".to_string(),
        }
    }

    fn code_accessors(&self) -> String {
        let n = &self.entry.name;
        let t = self.target();
        let mut out = format!("pub fn {n}_is_set(&self) -> bool {{\n    self.{n}_set\n}}\n\n");

        let accessors = match &self.entry.kind {
            EntryKind::Int => format!(
                "pub fn {n}_assign(&mut self, value: u32) -> {RESULT} {{
    self.{n}_data = value;
    self.{n}_set = true;
    Ok(())
}}

pub fn {n}_get(&self) -> ::core::option::Option<u32> {{
    self.{n}_set.then_some(self.{n}_data)
}}
"
            ),
            EntryKind::FixedBytes { length } => format!(
                "pub fn {n}_assign(&mut self, value: &[u8; {length}]) -> {RESULT} {{
    self.{n}_data = *value;
    self.{n}_set = true;
    Ok(())
}}

pub fn {n}_get(&self) -> ::core::option::Option<&[u8; {length}]> {{
    self.{n}_set.then_some(&self.{n}_data)
}}
"
            ),
            EntryKind::VarBytes => format!(
                "pub fn {n}_assign(&mut self, value: &[u8]) -> {RESULT} {{
    let mut data = ::std::vec::Vec::new();
    data.try_reserve_exact(value.len())?;
    data.extend_from_slice(value);
    self.{n}_data = data;
    self.{n}_set = true;
    Ok(())
}}

pub fn {n}_get(&self) -> ::core::option::Option<&[u8]> {{
    self.{n}_set.then_some(self.{n}_data.as_slice())
}}
"
            ),
            EntryKind::Text => format!(
                "pub fn {n}_assign(&mut self, value: &str) -> {RESULT} {{
    let mut data = ::std::string::String::new();
    data.try_reserve_exact(value.len())?;
    data.push_str(value);
    self.{n}_data = data;
    self.{n}_set = true;
    Ok(())
}}

pub fn {n}_get(&self) -> ::core::option::Option<&str> {{
    self.{n}_set.then_some(self.{n}_data.as_str())
}}
"
            ),
            EntryKind::StructRef { .. } => format!(
                "/// Replaces the nested value with a copy of `value`. On failure the
/// field is left unset.
pub fn {n}_assign(&mut self, value: &{t}) -> {RESULT} {{
    let mut data = self.{n}_data.take().unwrap_or_default();
    self.{n}_set = false;
    data.clear();
    let mut scratch = {WRITER}::new();
    value.marshal(&mut scratch)?;
    data.unmarshal(&mut ::tlvgen_runtime::ByteBuffer::new(scratch.data()))?;
    self.{n}_data = Some(data);
    self.{n}_set = true;
    Ok(())
}}

pub fn {n}_get(&self) -> ::core::option::Option<&{t}> {{
    if self.{n}_set {{
        self.{n}_data.as_deref()
    }} else {{
        None
    }}
}}

/// Returns the nested value, creating an empty one first if unset.
pub fn {n}_get_mut(&mut self) -> &mut {t} {{
    self.{n}_set = true;
    self.{n}_data.get_or_insert_with(::std::boxed::Box::default)
}}
"
            ),
            EntryKind::Array { .. } => format!(
                "/// Appends an empty element and returns it for filling in.
pub fn {n}_add(&mut self) -> ::core::result::Result<&mut {t}, {TLV_ERROR}> {{
    self.{n}_data.try_reserve(1)?;
    let index = self.{n}_data.len();
    self.{n}_data.push({t}::new());
    self.{n}_set = true;
    Ok(&mut self.{n}_data[index])
}}

/// Replaces the element at `offset` with a copy of `value`. On failure the
/// element is left cleared.
pub fn {n}_assign(&mut self, offset: usize, value: &{t}) -> {RESULT} {{
    let len = self.{n}_data.len();
    let data = self.{n}_data.get_mut(offset).ok_or({TLV_ERROR}::OutOfBounds {{
        field: \"{n}\",
        index: offset,
        len,
    }})?;
    data.clear();
    let mut scratch = {WRITER}::new();
    let copied = value
        .marshal(&mut scratch)
        .and_then(|()| data.unmarshal(&mut ::tlvgen_runtime::ByteBuffer::new(scratch.data())));
    if let Err(err) = copied {{
        data.clear();
        return Err(err);
    }}
    Ok(())
}}

pub fn {n}_get(&self, offset: usize) -> ::core::option::Option<&{t}> {{
    self.{n}_data.get(offset)
}}

pub fn {n}_get_mut(&mut self, offset: usize) -> ::core::option::Option<&mut {t}> {{
    self.{n}_data.get_mut(offset)
}}

pub fn {n}_len(&self) -> usize {{
    self.{n}_data.len()
}}
"
            ),
        };
        out.push_str(&accessors);
        out
    }

    fn code_marshal(&self, tag: &str) -> String {
        let n = &self.entry.name;
        let f = self.target_fn();
        match &self.entry.kind {
            EntryKind::Int => format!("buf.marshal_int({tag}, self.{n}_data)?;\n"),
            EntryKind::FixedBytes { .. } | EntryKind::VarBytes => format!("buf.marshal({tag}, &self.{n}_data)?;\n"),
            EntryKind::Text => format!("buf.marshal_string({tag}, &self.{n}_data)?;\n"),
            EntryKind::StructRef { .. } => format!(
                "let data = self.{n}_data.as_deref().ok_or({TLV_ERROR}::Unset(\"{n}\"))?;\nevtag_marshal_{f}(buf, {tag}, data)?;\n"
            ),
            EntryKind::Array { .. } => {
                format!("for data in &self.{n}_data {{\n    evtag_marshal_{f}(buf, {tag}, data)?;\n}}\n")
            }
        }
    }

    fn code_unmarshal(&self, tag: &str) -> String {
        let n = &self.entry.name;
        let t = self.target();
        let f = self.target_fn();
        let context = format!(".map_err(|e| e.in_field(\"{n}\"))?");
        match &self.entry.kind {
            EntryKind::Int => format!("self.{n}_data = buf.unmarshal_int({tag}){context};\nself.{n}_set = true;\n"),
            EntryKind::FixedBytes { .. } => {
                format!("buf.unmarshal_fixed({tag}, &mut self.{n}_data){context};\nself.{n}_set = true;\n")
            }
            EntryKind::VarBytes => format!(
                "let data = buf.unmarshal_bytes({tag}){context};\nself.{n}_assign(data){context};\n"
            ),
            EntryKind::Text => {
                format!("self.{n}_data = buf.unmarshal_string({tag}){context};\nself.{n}_set = true;\n")
            }
            EntryKind::StructRef { .. } => format!(
                "let mut data = ::std::boxed::Box::new({t}::new());
evtag_unmarshal_{f}(buf, {tag}, &mut data){context};
self.{n}_data = Some(data);
self.{n}_set = true;
"
            ),
            EntryKind::Array { .. } => format!(
                "let data = self.{n}_add(){context};
if let Err(err) = evtag_unmarshal_{f}(buf, {tag}, data) {{
    self.{n}_data.pop();
    return Err(err.in_field(\"{n}\"));
}}
"
            ),
        }
    }

    fn code_complete(&self, message: &str) -> String {
        let n = &self.entry.name;
        let mut code = String::new();
        if self.entry.is_required() {
            code.push_str(&format!(
                "if !self.{n}_set {{\n    return Err({TLV_ERROR}::Incomplete {{\n        message: \"{message}\",\n        field:   \"{n}\",\n    }});\n}}\n"
            ));
        }
        match &self.entry.kind {
            EntryKind::StructRef { .. } => code.push_str(&format!(
                "if let (true, Some(data)) = (self.{n}_set, self.{n}_data.as_deref()) {{\n    data.complete().map_err(|e| e.in_field(\"{n}\"))?;\n}}\n"
            )),
            EntryKind::Array { .. } => code.push_str(&format!(
                "for data in &self.{n}_data {{\n    data.complete().map_err(|e| e.in_field(\"{n}\"))?;\n}}\n"
            )),
            _ => {}
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_schema;

    const SCHEMA: &str = "
    struct msg {
      int id = 1;
      optional string note = 2;
      array struct[item] items = 3;
    }
    struct item {
      int qty = 1;
      bytes digest[4] = 2;
      optional bytes blob = 3;
      optional struct[item] next = 4;
    }
    ";

    fn generated() -> Generated {
        compile_schema_to_rust(&compile_schema(SCHEMA).unwrap(), "demo.rpc").unwrap()
    }

    #[test]
    fn test_tag_constants() {
        let decls = generated().declarations;
        assert!(decls.contains(
            "// Tag definition for msg\npub const MSG_ID: u32 = 1;\npub const MSG_NOTE: u32 = 2;\npub const MSG_ITEMS: u32 = 3;\npub const MSG_MAX_TAGS: u32 = 4;\n"
        ));
        assert!(decls.contains("pub const ITEM_MAX_TAGS: u32 = 5;\n"));
    }

    #[test]
    fn test_struct_declaration() {
        let decls = generated().declarations;
        assert!(decls.contains("pub struct Msg {\n"));
        assert!(decls.contains("    items_data: ::std::vec::Vec<Item>,\n"));
        assert!(decls.contains("    digest_data: [u8; 4],\n"));
        assert!(decls.contains("    next_data: ::core::option::Option<::std::boxed::Box<Item>>,\n"));
        assert!(decls.contains("    note_set: bool,\n"));
        assert!(!decls.contains("use "));
    }

    #[test]
    fn test_implementation() {
        let body = generated().implementation;
        assert!(body.contains("impl Msg {\n"));
        assert!(body.contains("impl ::tlvgen_runtime::Message for Item {\n    const NAME: &'static str = \"item\";"));
        assert!(body.contains("    pub fn items_add(&mut self) -> ::core::result::Result<&mut Item, ::tlvgen_runtime::TlvError> {"));
        assert!(body.contains("        if self.note_set {\n            buf.marshal_string(MSG_NOTE, &self.note_data)?;\n        }\n"));
        assert!(body.contains("                MSG_ITEMS => {\n                    let data = self.items_add()"));
        assert!(body.contains("pub fn evtag_unmarshal_msg(buf: &mut ::tlvgen_runtime::ByteBuffer<'_>, need_tag: u32, msg: &mut Msg)"));
    }

    #[test]
    fn test_duplicate_check_only_for_scalars() {
        let body = generated().implementation;
        assert!(body.contains("MSG_ID => {\n                    if self.id_set {"));
        assert!(!body.contains("MSG_ITEMS => {\n                    if self.items_set {"));
    }

    #[test]
    fn test_required_fields_checked() {
        let body = generated().implementation;
        assert!(body.contains("if !self.id_set {\n            return Err(::tlvgen_runtime::TlvError::Incomplete {"));
        assert!(!body.contains("if !self.note_set {"));
        assert!(!body.contains("if !self.items_set {"));
    }

    #[test]
    fn test_type_name_collision() {
        let schema = compile_schema("struct foo_bar { int a = 1; }\nstruct foo__bar { int b = 1; }").unwrap();
        let err = compile_schema_to_rust(&schema, "x.rpc").unwrap_err();
        assert!(matches!(err, SchemaError::Generation(_)), "unexpected error {:?}", err);
    }

    #[test]
    fn test_accessor_names_do_not_clash() {
        let schema = compile_schema("struct a { int x = 1; int x_is = 2; array struct[a] x_get = 3; }").unwrap();
        assert!(compile_schema_to_rust(&schema, "x.rpc").is_ok());
    }

    #[test]
    fn test_keyword_names() {
        assert_eq!(rust_type_name("self"), "Self_");
        assert_eq!(rust_type_name("run_stats"), "RunStats");
    }
}
