//! Glob pattern matching.
//!
//! One matcher backs KEYS, SCAN, HSCAN MATCH, PSUBSCRIBE and
//! PUBSUB CHANNELS. Supported syntax: `*` (any sequence), `?` (one byte),
//! `[abc]` / `[^abc]` / `[a-z]` character classes, and `\` escapes.
//!
//! The implementation is iterative with single-star backtracking, so deeply
//! nested patterns cannot blow the stack.

/// Match `text` against a glob `pattern`.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut px = 0;
    let mut tx = 0;
    let mut star_px = usize::MAX;
    let mut star_tx = 0;

    while tx < text.len() || px < pattern.len() {
        if px < pattern.len() {
            match pattern[px] {
                b'*' => {
                    star_px = px;
                    star_tx = tx;
                    px += 1;
                    continue;
                }
                b'?' if tx < text.len() => {
                    px += 1;
                    tx += 1;
                    continue;
                }
                b'[' if tx < text.len() => {
                    if let Some((matched, width)) = match_class(&pattern[px..], text[tx]) {
                        if matched {
                            px += width;
                            tx += 1;
                            continue;
                        }
                    }
                }
                b'\\' if px + 1 < pattern.len() && tx < text.len() => {
                    if pattern[px + 1] == text[tx] {
                        px += 2;
                        tx += 1;
                        continue;
                    }
                }
                c if tx < text.len() && c == text[tx] => {
                    px += 1;
                    tx += 1;
                    continue;
                }
                _ => {}
            }
        }

        // Dead end: give the most recent star one more byte of text.
        if star_px != usize::MAX && star_tx < text.len() {
            px = star_px + 1;
            star_tx += 1;
            tx = star_tx;
            continue;
        }

        return false;
    }

    true
}

/// Match a `[...]` class against one byte.
///
/// Returns `(matched, width)` where `width` spans the class including the
/// closing bracket, or `None` when the class is unterminated.
fn match_class(pattern: &[u8], ch: u8) -> Option<(bool, usize)> {
    debug_assert_eq!(pattern.first(), Some(&b'['));

    let mut i = 1;
    let negate = if pattern.get(i) == Some(&b'^') {
        i += 1;
        true
    } else {
        false
    };

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            if pattern[i] <= ch && ch <= pattern[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if pattern[i] == ch {
                matched = true;
            }
            i += 1;
        }
    }

    if i < pattern.len() && pattern[i] == b']' {
        Some((matched != negate, i + 1))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(glob_match(b"hello", b"hello"));
        assert!(!glob_match(b"hello", b"world"));
        assert!(!glob_match(b"hello", b"hell"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h*", b"hello"));
        assert!(glob_match(b"*o", b"hello"));
        assert!(glob_match(b"h*o", b"hello"));
        assert!(glob_match(b"news.*", b"news.tech"));
        assert!(!glob_match(b"news.*", b"sports.tech"));
    }

    #[test]
    fn test_question() {
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h?llo", b"hallo"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(!glob_match(b"f?o", b"fooo"));
    }

    #[test]
    fn test_class() {
        assert!(glob_match(b"h[ae]llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[a-z]llo", b"hello"));
        assert!(!glob_match(b"h[a-z]llo", b"h1llo"));
        assert!(glob_match(b"h[^0-9]llo", b"hello"));
        assert!(!glob_match(b"h[^0-9]llo", b"h5llo"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
    }

    #[test]
    fn test_multiple_stars() {
        assert!(glob_match(b"*a*b*", b"xxaxxbxx"));
        assert!(!glob_match(b"*a*b*", b"xxbxxaxx"));
    }
}
