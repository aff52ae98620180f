//! LIKE-pattern lowering.
//!
//! A SQL `LIKE` pattern compiles to an anchored regular expression:
//! `_` becomes `.`, `%` becomes `.*`, and regex metacharacters are escaped.
//! An optional single-character escape marks a literal `%` or `_`; anywhere
//! else the escape character is an ordinary character.

/// Compiles a LIKE pattern to an anchored regex source string.
#[must_use]
pub(crate) fn regex_for_like(pattern: &str, escape: Option<char>) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if escape == Some(c) {
            match chars.peek() {
                Some(&next @ ('%' | '_')) => {
                    chars.next();
                    push_literal(&mut out, next);
                }
                // The escape character only escapes `%` and `_`.
                _ => push_literal(&mut out, c),
            }
        } else if c == '_' {
            out.push('.');
        } else if c == '%' {
            out.push_str(".*");
        } else {
            push_literal(&mut out, c);
        }
    }
    out.push('$');
    out
}

fn push_literal(out: &mut String, c: char) {
    if matches!(c, '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | '{') {
        out.push('\\');
    }
    out.push(c);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use regex::Regex;

    /// Reference LIKE matcher with the same escape semantics.
    fn like_matches(pattern: &str, escape: Option<char>, input: &str) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Tok {
            Lit(char),
            AnyOne,
            AnyMany,
        }

        let mut toks = Vec::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if escape == Some(c) {
                match chars.peek() {
                    Some(&next @ ('%' | '_')) => {
                        chars.next();
                        toks.push(Tok::Lit(next));
                    }
                    _ => toks.push(Tok::Lit(c)),
                }
            } else if c == '_' {
                toks.push(Tok::AnyOne);
            } else if c == '%' {
                toks.push(Tok::AnyMany);
            } else {
                toks.push(Tok::Lit(c));
            }
        }

        fn go(toks: &[Tok], input: &[char]) -> bool {
            match toks.split_first() {
                None => input.is_empty(),
                Some((Tok::Lit(c), rest)) => {
                    input.first() == Some(c) && go(rest, &input[1..])
                }
                Some((Tok::AnyOne, rest)) => !input.is_empty() && go(rest, &input[1..]),
                Some((Tok::AnyMany, rest)) => {
                    (0..=input.len()).any(|k| go(rest, &input[k..]))
                }
            }
        }

        let input: Vec<char> = input.chars().collect();
        go(&toks, &input)
    }

    #[test]
    fn plain_wildcards() {
        assert_eq!(regex_for_like("A%", None), "^A.*$");
        assert_eq!(regex_for_like("A_C", None), "^A.C$");
        assert_eq!(regex_for_like("100%", None), "^100.*$");
    }

    #[test]
    fn metacharacters_are_escaped() {
        assert_eq!(regex_for_like("a.b", None), "^a\\.b$");
        assert_eq!(regex_for_like("(x)", None), "^\\(x\\)$");
        assert_eq!(regex_for_like("a+b*", None), "^a\\+b\\*$");
    }

    #[test]
    fn escape_before_wildcards_only() {
        // Escaped underscore stays literal.
        assert_eq!(regex_for_like("A\\_%", Some('\\')), "^A_.*$");
        assert_eq!(regex_for_like("50\\%", Some('\\')), "^50%$");
        // Outside % and _, the escape character is an ordinary character.
        assert_eq!(regex_for_like("a\\b", Some('\\')), "^a\\\\b$");
        // A trailing escape is an ordinary character too.
        assert_eq!(regex_for_like("a\\", Some('\\')), "^a\\\\$");
    }

    #[test]
    fn compiled_regex_agrees_on_examples() {
        let re = Regex::new(&regex_for_like("A\\_%", Some('\\'))).unwrap();
        assert!(re.is_match("A_city"));
        assert!(!re.is_match("AXcity"));

        let re = Regex::new(&regex_for_like("_oo%", None)).unwrap();
        assert!(re.is_match("food"));
        assert!(re.is_match("zoo"));
        assert!(!re.is_match("oof"));
    }

    proptest! {
        #[test]
        fn regex_agrees_with_reference_matcher(
            pattern in "[abc%_.(\\\\]{0,8}",
            input in "[abc._(]{0,8}",
        ) {
            let source = regex_for_like(&pattern, Some('\\'));
            let re = Regex::new(&source).unwrap();
            prop_assert_eq!(
                re.is_match(&input),
                like_matches(&pattern, Some('\\'), &input),
                "pattern {:?} compiled to {:?}", pattern, source
            );
        }
    }
}
