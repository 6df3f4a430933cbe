//! Glob patterns as understood by `SCAN ... MATCH`.
//!
//! Supports `*`, `?`, bracket classes (`[abc]`, `[a-z]`, `[^x]`) and `\`
//! escapes. An unterminated `[` matches itself literally.

/// Characters with special meaning in a scan pattern.
const GLOB_META: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Escape `literal` so it only matches itself inside a pattern.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if GLOB_META.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Whether `text` matches `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    // Position of the last `*` seen and the text index it is currently absorbing up to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        let step = if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => Some(pi + 1),
                '[' => match_class(&p, pi, t[ti]),
                '\\' if pi + 1 < p.len() => (p[pi + 1] == t[ti]).then_some(pi + 2),
                c => (c == t[ti]).then_some(pi + 1),
            }
        } else {
            None
        };

        if let Some(next) = step {
            pi = next;
            ti += 1;
            continue;
        }

        match star {
            Some((star_pi, star_ti)) => {
                pi = star_pi + 1;
                ti = star_ti + 1;
                star = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match `c` against the bracket class starting at `p[start] == '['`.
///
/// Returns the pattern index just past the class when it matches.
fn match_class(p: &[char], start: usize, c: char) -> Option<usize> {
    let mut i = start + 1;
    let negate = i < p.len() && p[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        if i >= p.len() {
            // unterminated class
            return (c == '[').then_some(start + 1);
        }
        match p[i] {
            ']' => break,
            '\\' if i + 1 < p.len() => {
                if p[i + 1] == c {
                    matched = true;
                }
                i += 2;
            }
            lo if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' => {
                let hi = p[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                if lo <= c && c <= hi {
                    matched = true;
                }
                i += 3;
            }
            other => {
                if other == c {
                    matched = true;
                }
                i += 1;
            }
        }
    }

    (matched != negate).then_some(i + 1)
}
