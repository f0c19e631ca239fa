//! Placeholder grammar:
//!
//! ```text
//! placeholder := "{{{" digits ( "[" key_path "]" )? "}}}"
//! key_path    := segment ( "." segment )*
//! segment     := ( name | quoted ) index*  |  index+
//! index       := "[" ( digits | quoted ) "]"
//! quoted      := '"' ... '"'  |  "'" ... "'"      (backslash escapes)
//! ```
//!
//! Anything that does not match is literal text. Parsing never fails; the
//! segments always concatenate back to the input.

const OPEN: &str = "{{{";
const CLOSE: &str = "}}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    /// Exact source text, braces included.
    pub raw: &'a str,
    /// 1-based step number as written.
    pub step_number: usize,
    pub key_path: Option<Vec<PathSegment>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder(Placeholder<'a>),
}

impl Segment<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Text(t) => t,
            Segment::Placeholder(p) => p.raw,
        }
    }
}

pub fn parse(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(OPEN) {
        let start = pos + offset;
        match parse_placeholder(&text[start..]) {
            Some((placeholder, len)) => {
                if literal_start < start {
                    out.push(Segment::Text(&text[literal_start..start]));
                }
                out.push(Segment::Placeholder(placeholder));
                pos = start + len;
                literal_start = pos;
            }
            // "{{{{1}}}" still contains a placeholder one brace later.
            None => pos = start + 1,
        }
    }

    if literal_start < text.len() {
        out.push(Segment::Text(&text[literal_start..]));
    }
    out
}

/// Parses a placeholder at the start of `s`; returns it with its byte length.
fn parse_placeholder(s: &str) -> Option<(Placeholder<'_>, usize)> {
    let rest = s.strip_prefix(OPEN)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let step_number: usize = rest[..digits].parse().ok()?;
    let mut cursor = OPEN.len() + digits;

    let key_path = if s[cursor..].starts_with('[') {
        let inner_len = bracket_body_len(&s[cursor + 1..])?;
        let inner = &s[cursor + 1..cursor + 1 + inner_len];
        cursor += inner_len + 2;
        Some(parse_key_path(inner)?)
    } else {
        None
    };

    if !s[cursor..].starts_with(CLOSE) {
        return None;
    }
    cursor += CLOSE.len();

    Some((Placeholder { raw: &s[..cursor], step_number, key_path }, cursor))
}

/// Length of the text up to the `]` that balances an already-consumed `[`.
/// Brackets inside quotes do not count. A quote only opens a quoted key at
/// the start of a segment, so `it's` is a plain key.
fn bracket_body_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut segment_start = true;
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' | '\'' if segment_start => {
                skip_quoted(&mut chars, c)?;
                segment_start = false;
            }
            '[' => {
                depth += 1;
                segment_start = true;
            }
            ']' if depth == 0 => return Some(i),
            ']' => {
                depth -= 1;
                segment_start = false;
            }
            '.' => segment_start = true,
            '}' if s[i..].starts_with(CLOSE) => return None,
            c if c.is_whitespace() => {}
            _ => segment_start = false,
        }
    }
    None
}

fn skip_quoted(chars: &mut std::str::CharIndices<'_>, quote: char) -> Option<()> {
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next()?;
            }
            c if c == quote => return Some(()),
            _ => {}
        }
    }
    None
}

pub fn parse_key_path(s: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut chars = s.trim().chars().peekable();
    let mut expect_segment = true;

    while chars.peek().is_some() {
        if !expect_segment {
            // After a segment only "." may follow.
            if chars.next()? != '.' {
                return None;
            }
            expect_segment = true;
            continue;
        }

        let before = segments.len();
        match chars.peek().copied()? {
            '"' | '\'' => {
                let quote = chars.next()?;
                segments.push(PathSegment::Key(read_quoted(&mut chars, quote)?));
            }
            '[' => {}
            '.' | ']' => return None,
            _ => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if matches!(c, '.' | '[' | ']') {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                segments.push(PathSegment::Key(name.to_string()));
            }
        }

        while chars.peek() == Some(&'[') {
            chars.next();
            segments.push(read_index(&mut chars)?);
        }

        if segments.len() == before {
            return None;
        }
        expect_segment = false;
    }

    if expect_segment {
        // Empty path or trailing ".".
        return None;
    }
    Some(segments)
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) -> Option<String> {
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => out.push(chars.next()?),
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
}

/// Reads `digits]` or `"key"]` after an opening `[`.
fn read_index(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<PathSegment> {
    let segment = match chars.peek().copied()? {
        '"' | '\'' => {
            let quote = chars.next()?;
            PathSegment::Key(read_quoted(chars, quote)?)
        }
        _ => {
            let mut digits = String::new();
            while let Some(&c) = chars.peek() {
                if c == ']' {
                    break;
                }
                digits.push(c);
                chars.next();
            }
            PathSegment::Index(digits.trim().parse().ok()?)
        }
    };
    (chars.next()? == ']').then_some(segment)
}
