use crate::error::SchemaError;

/// Quotes `text` as a JSON string, for use inside diagnostics.
pub fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

pub fn syntax_error(msg: impl Into<String>, line: usize) -> SchemaError {
    SchemaError::StructSyntax { msg: msg.into(), line }
}

pub fn type_error(msg: impl Into<String>, line: usize) -> SchemaError {
    SchemaError::Type { msg: msg.into(), line }
}

/// Converts a schema name to PascalCase.
/// - If the string contains underscores, it splits on underscores and capitalizes each word,
///   lowercasing the rest.
/// - If the string is fully uppercase, only the first letter stays uppercase.
/// - Otherwise only the first letter is changed.
pub fn to_pascal_case(s: &str) -> String {
    fn capitalize(word: &str, lower_rest: bool) -> String {
        let mut chars = word.chars();
        match chars.next() {
            None => String::new(),
            Some(first) if lower_rest => first.to_uppercase().to_string() + &chars.as_str().to_lowercase(),
            Some(first) => first.to_uppercase().to_string() + chars.as_str(),
        }
    }

    if s.contains('_') {
        s.split('_').filter(|word| !word.is_empty()).map(|word| capitalize(word, true)).collect()
    } else {
        capitalize(s, s == s.to_uppercase())
    }
}

/// Escapes Rust reserved keywords by suffixing with an underscore.
pub fn escape_rust_keyword(s: &str) -> String {
    let keywords = [
        "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else",
        "enum", "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop",
        "match", "mod", "move", "mut", "pub", "ref", "return", "self", "Self",
        "static", "struct", "super", "trait", "true", "try", "type", "unsafe",
        "use", "where", "while",
    ];
    if keywords.contains(&s) {
        format!("{}_", s)
    } else {
        s.to_string()
    }
}

/// Prefixes every non-empty line of `code` with `prefix`.
pub fn indent(code: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for line in code.lines() {
        if !line.is_empty() {
            out.push_str(prefix);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Builds an include guard from a source file name, e.g. `msg.rpc` → `_MSG_RPC_`.
pub fn guard_name(source: &str) -> String {
    let body: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("_{}_", body)
}
