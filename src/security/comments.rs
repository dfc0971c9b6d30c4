//! Comment stripping ahead of pattern matching
//!
//! Comment text is replaced by spaces and newlines are kept, so offsets, line
//! numbers and columns in the stripped text match the original file.

/// Comment syntax of a file type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `//` and `/* */`
    CLike,
    /// `#` to end of line
    Hash,
    /// `<!-- -->`
    Markup,
    /// No comment syntax; content is scanned as-is
    Plain,
}

impl CommentStyle {
    /// Pick the style from a lowercase file extension or dotfile name
    pub fn for_extension(extension: Option<&str>) -> Self {
        match extension {
            Some(
                "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "vue" | "go" | "rs" | "java" | "kt"
                | "cs" | "c" | "h" | "cpp" | "swift" | "scss" | "css" | "php",
            ) => Self::CLike,
            Some(
                "py" | "rb" | "sh" | "bash" | "yml" | "yaml" | "toml" | "ini" | "conf" | "cfg"
                | "env" | "properties" | "npmrc",
            ) => Self::Hash,
            Some("html" | "htm" | "xml" | "svg") => Self::Markup,
            _ => Self::Plain,
        }
    }
}

/// Blank out comments, keeping string literals and line structure intact
pub fn strip_comments(content: &str, style: CommentStyle) -> String {
    match style {
        CommentStyle::CLike => strip_c_like(content),
        CommentStyle::Hash => strip_hash(content),
        CommentStyle::Markup => strip_markup(content),
        CommentStyle::Plain => content.to_string(),
    }
}

fn blank(c: char) -> char {
    if c == '\n' {
        '\n'
    } else {
        ' '
    }
}

fn strip_c_like(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut i = 0;
    let mut quote: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            // Single and double quoted strings cannot span lines
            if c == q || (c == '\n' && q != '`') {
                quote = None;
            }
            i += 1;
            continue;
        }

        match (c, chars.get(i + 1)) {
            ('"' | '\'' | '`', _) => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                out.push_str("  ");
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    out.push(blank(chars[i]));
                    i += 1;
                }
                if i < chars.len() {
                    out.push_str("  ");
                    i += 2;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn strip_hash(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for (index, line) in content.split('\n').enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let mut quote: Option<char> = None;
        let mut previous: Option<char> = None;
        let mut cut = None;
        for (offset, c) in line.char_indices() {
            match quote {
                Some(q) if c == q && previous != Some('\\') => quote = None,
                Some(_) => {}
                None if c == '"' || c == '\'' => quote = Some(c),
                // `#` only opens a comment at line start or after whitespace
                None if c == '#' && previous.map_or(true, char::is_whitespace) => {
                    cut = Some(offset);
                    break;
                }
                None => {}
            }
            previous = Some(c);
        }
        match cut {
            Some(offset) => {
                out.push_str(&line[..offset]);
                out.extend(line[offset..].chars().map(blank));
            }
            None => out.push_str(line),
        }
    }
    out
}

fn strip_markup(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let end = after.find("-->").map_or(after.len(), |e| e + 3);
        out.extend(after[..end].chars().map(blank));
        rest = &after[end..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_comments_are_blanked() {
        let stripped = strip_comments("a();\n// eval(x)\nb(); // tail\n", CommentStyle::CLike);
        assert_eq!(stripped.lines().count(), 3);
        assert!(!stripped.contains("eval"));
        assert!(!stripped.contains("tail"));
        assert_eq!(stripped.len(), "a();\n// eval(x)\nb(); // tail\n".len());
    }

    #[test]
    fn test_block_comments_keep_newlines() {
        let source = "x /* one\ntwo */ y";
        let stripped = strip_comments(source, CommentStyle::CLike);
        assert_eq!(stripped, "x       \n       y");
    }

    #[test]
    fn test_strings_are_not_comments() {
        let source = r#"const url = "http://example.com"; // note"#;
        let stripped = strip_comments(source, CommentStyle::CLike);
        assert!(stripped.contains("http://example.com"));
        assert!(!stripped.contains("note"));
    }

    #[test]
    fn test_hash_comments() {
        let source = "password: \"a#b\" # real comment\n#whole line\nurl: x#y";
        let stripped = strip_comments(source, CommentStyle::Hash);
        assert!(stripped.contains("\"a#b\""));
        assert!(!stripped.contains("real comment"));
        assert!(!stripped.contains("whole line"));
        assert!(stripped.contains("x#y"));
    }

    #[test]
    fn test_markup_comments() {
        let stripped = strip_comments("<p>a</p><!-- <script>x</script> --><b>", CommentStyle::Markup);
        assert!(!stripped.contains("script"));
        assert!(stripped.ends_with("<b>"));
    }

    #[test]
    fn test_style_selection() {
        assert_eq!(CommentStyle::for_extension(Some("ts")), CommentStyle::CLike);
        assert_eq!(CommentStyle::for_extension(Some("env")), CommentStyle::Hash);
        assert_eq!(CommentStyle::for_extension(None), CommentStyle::Plain);
    }
}
