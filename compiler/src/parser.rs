use crate::{
    error::SchemaError,
    lexer::{collapse, Normalizer},
    resolver::resolve_entry,
    types::{Schema, Struct},
    utils::{quote, syntax_error},
};
use lazy_static::lazy_static;
use regex::Regex;
use std::{io::BufRead, mem};
use tracing::debug;

lazy_static! {
    static ref INCLUDE:     Regex = Regex::new(r#"^#include ["<].*[>"]"#).unwrap();
    static ref CONDITIONAL: Regex = Regex::new(r"^#(if|ifdef|ifndef|else|elif|endif)\b").unwrap();
    static ref STRUCT_OPEN: Regex = Regex::new(r"(?i)^struct ([a-z][a-z_0-9]*) ?\{(.*)$").unwrap();
}

/// Parses schema text that is already in memory.
pub fn parse_schema(text: &str) -> Result<Schema, SchemaError> {
    parse_reader(text.as_bytes())
}

/// Parses a schema line by line from `reader`.
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Schema, SchemaError> {
    let mut parser = Parser::new();
    for line in reader.lines() {
        parser.feed_line(&line?)?;
    }
    parser.finish()
}

/// A struct whose closing brace has not been seen yet.
#[derive(Debug)]
struct OpenStruct {
    strukt: Struct,
    /// Normalized body text, one fragment per input line.
    body:   Vec<(usize, String)>,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Outside,
    InsideStruct(OpenStruct),
}

/// State of one parsing run.
///
/// Structs are resolved as soon as their closing brace is read, so the
/// first error inside a struct ends the run before later structs are seen.
#[derive(Debug, Default)]
pub struct Parser {
    normalizer: Normalizer,
    state:      State,
    directives: Vec<String>,
    structs:    Vec<Struct>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw input line, without its line terminator.
    pub fn feed_line(&mut self, raw: &str) -> Result<(), SchemaError> {
        let text = self.normalizer.normalize(raw);
        if text.is_empty() {
            return Ok(());
        }
        let line = self.normalizer.line();

        match mem::take(&mut self.state) {
            State::Outside => self.outside(text, line),
            State::InsideStruct(open) => self.inside(open, &text, line),
        }
    }

    /// Ends the run and hands over everything parsed.
    pub fn finish(self) -> Result<Schema, SchemaError> {
        self.normalizer.finish()?;
        if let State::InsideStruct(open) = self.state {
            return Err(syntax_error(
                format!("Unterminated struct {}", quote(&open.strukt.name)),
                open.strukt.line,
            ));
        }
        Ok(Schema {
            directives: self.directives,
            structs:    self.structs,
        })
    }

    fn outside(&mut self, text: String, line: usize) -> Result<(), SchemaError> {
        if INCLUDE.is_match(&text) || CONDITIONAL.is_match(&text) {
            debug!("passthrough directive {}", text);
            self.directives.push(text);
            return Ok(());
        }

        let captures = STRUCT_OPEN
            .captures(&text)
            .ok_or_else(|| syntax_error(format!("Missing struct: {}", quote(&text)), line))?;
        let open = OpenStruct {
            strukt: Struct::new(&captures[1], line),
            body:   Vec::new(),
        };
        let rest = captures.get(2).map_or("", |m| m.as_str());
        self.inside(open, rest, line)
    }

    fn inside(&mut self, mut open: OpenStruct, text: &str, line: usize) -> Result<(), SchemaError> {
        match text.split_once('}') {
            None => {
                open.body.push((line, text.to_string()));
                self.state = State::InsideStruct(open);
                Ok(())
            }
            Some((before, after)) => {
                if !after.trim().is_empty() {
                    return Err(syntax_error("Trailing garbage after struct", line));
                }
                open.body.push((line, before.to_string()));
                let strukt = close_struct(open)?;
                self.structs.push(strukt);
                Ok(())
            }
        }
    }
}

/// Splits the accumulated body on `;` and resolves every declaration in
/// order. Each declaration is reported at the line it starts on.
fn close_struct(open: OpenStruct) -> Result<Struct, SchemaError> {
    let OpenStruct { mut strukt, body } = open;
    let mut pending = String::new();
    let mut pending_line = 0;

    for (line, fragment) in &body {
        for (index, piece) in fragment.split(';').enumerate() {
            if index > 0 {
                flush(&mut strukt, &mut pending, pending_line)?;
            }
            if piece.trim().is_empty() {
                continue;
            }
            if pending.is_empty() {
                pending_line = *line;
            }
            pending.push(' ');
            pending.push_str(piece);
        }
    }
    flush(&mut strukt, &mut pending, pending_line)?;
    Ok(strukt)
}

fn flush(strukt: &mut Struct, pending: &mut String, line: usize) -> Result<(), SchemaError> {
    let decl = collapse(pending);
    pending.clear();
    if decl.is_empty() {
        return Ok(());
    }
    resolve_entry(strukt, &decl, line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;

    #[test]
    fn test_parse_schema() {
        let input = r#"
        #include <sys/queue.h>
        /* The message that carries items.
         * Spans several lines. */
        struct msg {
          int id = 1;
          optional string note = 2; // free text
          array struct[item] items = 3;
        }

        #ifdef HAVE_ITEMS
        struct item {
          int qty = 1;
        }
        #endif
        "#;

        let schema = parse_schema(input).unwrap();
        assert_eq!(schema.directives, ["#include <sys/queue.h>", "#ifdef HAVE_ITEMS", "#endif"]);
        assert_eq!(schema.structs.len(), 2);

        let msg = &schema.structs[0];
        assert_eq!(msg.name, "msg");
        assert_eq!(msg.line, 5);
        let names: Vec<_> = msg.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["id", "note", "items"]);
        assert_eq!(msg.entries[1].line, 7);
        assert!(msg.entries[1].optional);
        assert_eq!(msg.entries[2].kind.struct_target(), Some("item"));

        let item = &schema.structs[1];
        assert_eq!(item.entries[0].kind, EntryKind::Int);
    }

    #[test]
    fn test_empty_schema() {
        let schema = parse_schema("// nothing here\n\n").unwrap();
        assert!(schema.structs.is_empty());
        assert!(schema.directives.is_empty());
    }

    #[test]
    fn test_one_line_struct() {
        let schema = parse_schema("struct point { int x = 1; int y = 2; }").unwrap();
        assert_eq!(schema.structs[0].entries.len(), 2);

        let schema = parse_schema("struct empty {}").unwrap();
        assert!(schema.structs[0].entries.is_empty());
    }

    #[test]
    fn test_declaration_spanning_lines() {
        let schema = parse_schema("struct msg {\n  int\n  id\n  = 1; int b = 2\n}").unwrap();
        let msg = &schema.structs[0];
        assert_eq!(msg.entries[0].name, "id");
        assert_eq!(msg.entries[0].line, 2);
        assert_eq!(msg.entries[1].name, "b");
        assert_eq!(msg.entries[1].line, 4);
    }

    #[test]
    fn test_missing_struct() {
        let err = parse_schema("int id = 1;").unwrap_err();
        assert!(matches!(err, SchemaError::StructSyntax { line: 1, .. }), "unexpected error {:?}", err);
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse_schema("struct msg {\n int id = 1;\n} extra").unwrap_err();
        assert_eq!(err.to_string(), "Trailing garbage after struct around line 3");
    }

    #[test]
    fn test_unterminated_struct() {
        let err = parse_schema("struct msg {\n int id = 1;\n").unwrap_err();
        assert!(matches!(err, SchemaError::StructSyntax { line: 1, .. }), "unexpected error {:?}", err);
    }

    #[test]
    fn test_unterminated_comment() {
        let err = parse_schema("struct msg {\n int id = 1;\n}\n/* open").unwrap_err();
        assert!(matches!(err, SchemaError::Lex { line: 4 }), "unexpected error {:?}", err);
    }

    #[test]
    fn test_duplicate_tag_names_both_entries() {
        let err = parse_schema("struct msg {\n int a = 3;\n string b = 3;\n}").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("\"a\"") && text.contains("\"b\""), "{}", text);
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_first_error_wins() {
        let err = parse_schema("struct msg {\n float a = 1;\n int b = 1;\n int c = 1;\n}").unwrap_err();
        assert!(matches!(err, SchemaError::Type { line: 2, .. }), "unexpected error {:?}", err);
    }

    #[test]
    fn test_runs_are_independent() {
        let first = parse_schema("#include \"a.h\"\nstruct a { int x = 1; }").unwrap();
        let second = parse_schema("struct b { int y = 1; }").unwrap();
        assert_eq!(first.directives.len(), 1);
        assert!(second.directives.is_empty());
        assert_eq!(second.structs[0].entries[0].line, 1);
    }
}
