use crate::error::SchemaError;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Strips comments from raw schema lines and collapses their whitespace.
///
/// Block comments may span lines, so the normalizer remembers whether the
/// previous line ended inside one. It also counts the lines it has seen;
/// the count is only used for diagnostics.
#[derive(Debug, Default)]
pub struct Normalizer {
    line:          usize,
    in_comment:    bool,
    comment_start: usize,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines normalized so far.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Normalizes one raw input line. Returns an empty string when nothing
    /// but comments and whitespace remain.
    pub fn normalize(&mut self, raw: &str) -> String {
        self.line += 1;
        let stripped = self.strip_comments(raw);
        collapse(&stripped)
    }

    /// Fails if the input ended inside a block comment.
    pub fn finish(&self) -> Result<(), SchemaError> {
        if self.in_comment {
            return Err(SchemaError::Lex { line: self.comment_start });
        }
        Ok(())
    }

    fn strip_comments(&mut self, raw: &str) -> String {
        let mut kept = String::new();
        let mut rest = raw;
        loop {
            if self.in_comment {
                match rest.find("*/") {
                    Some(end) => {
                        rest = &rest[end + 2..];
                        self.in_comment = false;
                    }
                    None => return kept,
                }
            }

            match (rest.find("/*"), rest.find("//")) {
                (Some(block), Some(line)) if line < block => {
                    kept.push_str(&rest[..line]);
                    return kept;
                }
                (Some(block), _) => {
                    kept.push_str(&rest[..block]);
                    kept.push(' ');
                    rest = &rest[block + 2..];
                    self.in_comment = true;
                    self.comment_start = self.line;
                }
                (None, Some(line)) => {
                    kept.push_str(&rest[..line]);
                    return kept;
                }
                (None, None) => {
                    kept.push_str(rest);
                    return kept;
                }
            }
        }
    }
}

/// Trims `text` and collapses every internal whitespace run to one space.
pub fn collapse(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        let mut normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("  int \t id   =  1 ;  "), "int id = 1 ;");
        assert_eq!(normalizer.normalize("   "), "");
        assert_eq!(normalizer.line(), 2);
    }

    #[test]
    fn test_strip_line_comment() {
        let mut normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("int id = 1; // the id"), "int id = 1;");
        assert_eq!(normalizer.normalize("// only a comment"), "");
    }

    #[test]
    fn test_strip_block_comments() {
        let mut normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("int /* inline */ id = 1;"), "int id = 1;");
        assert_eq!(normalizer.normalize("struct msg { /* starts"), "struct msg {");
        assert_eq!(normalizer.normalize("still inside // not a line comment"), "");
        assert_eq!(normalizer.normalize("ends */ int id = 1;"), "int id = 1;");
        assert!(normalizer.finish().is_ok());
    }

    #[test]
    fn test_line_comment_inside_block_comment() {
        let mut normalizer = Normalizer::new();
        assert_eq!(normalizer.normalize("a /* // */ b"), "a b");
        assert_eq!(normalizer.normalize("a // /* b"), "a");
        assert!(normalizer.finish().is_ok());
    }

    #[test]
    fn test_unterminated_block_comment() {
        let mut normalizer = Normalizer::new();
        normalizer.normalize("int id = 1;");
        normalizer.normalize("/* never closed");
        normalizer.normalize("int x = 2;");
        let err = normalizer.finish().unwrap_err();
        assert!(matches!(err, SchemaError::Lex { line: 2 }), "unexpected error {:?}", err);
    }
}
