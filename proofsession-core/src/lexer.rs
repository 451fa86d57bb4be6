//! Line-oriented lexing for Lean source.
//!
//! This is a lightweight lexer, not a Lean parser. It knows just enough to
//! keep `sorry` tokens inside comments and string literals from being treated
//! as placeholders:
//! - line comments (`-- ...`)
//! - block comments (`/- ... -/`, nested)
//! - string literals (`"..."`, with escapes)

/// Result of scanning one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineScan {
    /// Byte offsets of `sorry` tokens that sit in code.
    pub sorries: Vec<usize>,
    /// Byte offset where a trailing line comment starts (or the line length).
    pub code_end: usize,
    /// Whether any non-whitespace byte lies outside comments.
    pub has_code: bool,
    /// Block-comment nesting depth at the end of the line.
    pub block_depth: usize,
}

const SORRY: &[u8] = b"sorry";

pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\'' || c == '.'
}

/// Scan a single line, starting inside `block_depth_in` nested block comments.
pub fn scan_line(line: &str, block_depth_in: usize) -> LineScan {
    let bs = line.as_bytes();
    let mut i = 0usize;
    let mut block_depth = block_depth_in;
    let mut in_string = false;
    let mut escaped = false;
    let mut out = LineScan {
        code_end: bs.len(),
        ..LineScan::default()
    };

    while i < bs.len() {
        if in_string {
            let b = bs[i];
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if block_depth > 0 {
            if bs[i..].starts_with(b"/-") {
                block_depth += 1;
                i += 2;
                continue;
            }
            if bs[i..].starts_with(b"-/") {
                block_depth -= 1;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        if bs[i..].starts_with(b"--") {
            out.code_end = i;
            break;
        }
        if bs[i..].starts_with(b"/-") {
            block_depth = 1;
            i += 2;
            continue;
        }
        if bs[i] == b'"' {
            out.has_code = true;
            in_string = true;
            i += 1;
            continue;
        }
        if !bs[i].is_ascii_whitespace() {
            out.has_code = true;
        }

        if bs[i..].starts_with(SORRY) {
            let prev = line[..i].chars().next_back();
            let next = line[i + SORRY.len()..].chars().next();
            let left_ok = prev.map(|c| !is_ident_char(c)).unwrap_or(true);
            let right_ok = next.map(|c| !is_ident_char(c)).unwrap_or(true);
            if left_ok && right_ok {
                out.sorries.push(i);
                i += SORRY.len();
                continue;
            }
        }

        i += 1;
    }

    out.block_depth = block_depth;
    out
}

/// All `sorry` tokens in `text` that sit in code, as `(line, byte column)`, both 0-based.
pub fn sorry_positions(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    for (i, line) in text.split('\n').enumerate() {
        let scan = scan_line(line, depth);
        depth = scan.block_depth;
        out.extend(scan.sorries.into_iter().map(|col| (i, col)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_inline_sorry() {
        let s = scan_line("theorem t : True := by sorry", 0);
        assert_eq!(s.sorries, vec![23]);
        assert!(s.has_code);
        assert_eq!(s.block_depth, 0);
    }

    #[test]
    fn ignores_sorry_in_comments_and_strings() {
        let s = scan_line(r#"  exact "sorry" -- sorry"#, 0);
        assert!(s.sorries.is_empty());
        assert_eq!(s.code_end, 16);
    }

    #[test]
    fn ignores_identifiers_containing_sorry() {
        let s = scan_line("  exact sorryAx _ h.sorry", 0);
        assert!(s.sorries.is_empty());
    }

    #[test]
    fn tracks_nested_block_comments_across_lines() {
        let text = "/- outer /- inner -/\nsorry still comment -/\n  sorry";
        assert_eq!(sorry_positions(text), vec![(2, 2)]);
    }

    #[test]
    fn comment_only_line_has_no_code() {
        assert!(!scan_line("   -- just talk", 0).has_code);
        assert!(!scan_line("/- doc -/", 0).has_code);
        assert!(!scan_line("", 0).has_code);
    }
}
