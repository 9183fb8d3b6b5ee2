//! Glob-pattern path matching for reservation conflict detection.
//!
//! Patterns use `*` (matches one path segment), `**` (matches any number of
//! segments, including zero), and exact segments otherwise. There is no
//! dedicated glob crate anywhere in this corpus; pattern matching is
//! implemented by compiling each pattern to a `regex::Regex`, reusing the
//! `regex` dependency the teacher already carries for its own text matching.

use regex::Regex;

/// True if `path` is matched by `pattern` under glob semantics, or if the
/// two are exactly equal (the common case, and the only one that needs no
/// regex compilation).
pub fn matches(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    match compile(pattern) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}

/// Compile a glob pattern into an anchored regex.
pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&to_regex_str(pattern))
}

fn to_regex_str(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '*' && chars.get(i + 1) == Some(&'*') {
            let prev_slash = i == 0 || chars[i - 1] == '/';
            let next_slash = chars.get(i + 2) == Some(&'/');
            if prev_slash && next_slash {
                // "**/" — matches any number of leading directories, including none.
                out.push_str("(?:.*/)?");
                i += 3;
            } else {
                // bare "**" — matches anything, including path separators.
                out.push_str(".*");
                i += 2;
            }
            continue;
        }
        if c == '*' {
            out.push_str("[^/]*");
            i += 1;
            continue;
        }
        if matches!(c, '.' | '+' | '(' | ')' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\') {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
        i += 1;
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("src/file.ts", "src/file.ts"));
        assert!(!matches("src/file.ts", "src/other.ts"));
    }

    #[test]
    fn test_trailing_doublestar_matches_any_suffix() {
        assert!(matches("src/**", "src/file.ts"));
        assert!(matches("src/**", "src/nested/deep/file.ts"));
        assert!(!matches("src/**", "lib/file.ts"));
    }

    #[test]
    fn test_leading_doublestar_matches_any_prefix() {
        assert!(matches("**/foo.ts", "foo.ts"));
        assert!(matches("**/foo.ts", "a/b/foo.ts"));
        assert!(!matches("**/foo.ts", "foo.tsx"));
    }

    #[test]
    fn test_single_star_matches_one_segment() {
        assert!(matches("src/*.ts", "src/file.ts"));
        assert!(!matches("src/*.ts", "src/nested/file.ts"));
    }
}
