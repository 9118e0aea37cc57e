//! JSON Repair
//!
//! Best-effort fix-up of almost-JSON produced by language models. A single
//! string-aware pass rewrites the common slips:
//!
//! - trailing commas before `}` / `]`, and doubled commas
//! - typographic double quotes used as string delimiters
//! - Python literals `True` / `False` / `None`
//! - unquoted object keys
//! - raw newlines, tabs and other control characters inside strings
//! - missing commas between adjacent values and missing colons after keys
//! - an unterminated string and unclosed brackets at end of input
//!
//! The output is not guaranteed to be valid JSON; callers still parse it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the scanner expects next outside of a string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    Key,
    Colon,
    AfterValue,
}

const SMART_QUOTES: &[char] = &['\u{201C}', '\u{201D}', '\u{201E}', '\u{201F}'];

struct Scanner {
    out: String,
    stack: Vec<Container>,
    expect: Expect,
}

impl Scanner {
    fn new(capacity: usize) -> Self {
        Self {
            out: String::with_capacity(capacity + 16),
            stack: Vec::new(),
            expect: Expect::Value,
        }
    }

    fn top(&self) -> Option<Container> {
        self.stack.last().copied()
    }

    /// State after a comma inside the current container
    fn after_comma(&self) -> Expect {
        match self.top() {
            Some(Container::Object) => Expect::Key,
            _ => Expect::Value,
        }
    }

    /// Called before any value or key starts. Inserts a missing comma or
    /// colon and returns whether the upcoming token is an object key.
    fn begin_token(&mut self) -> bool {
        if self.stack.is_empty() {
            return false;
        }
        match self.expect {
            Expect::AfterValue => {
                self.out.push(',');
                self.expect = self.after_comma();
            }
            Expect::Colon => {
                self.out.push(':');
                self.expect = Expect::Value;
            }
            _ => {}
        }
        self.expect == Expect::Key
    }

    fn end_value(&mut self) {
        self.expect = Expect::AfterValue;
    }

    fn strip_trailing_comma(&mut self) {
        let trimmed_len = self.out.trim_end().len();
        if self.out[..trimmed_len].ends_with(',') {
            self.out.remove(trimmed_len - 1);
        }
    }

    fn close(&mut self, container: Container) {
        if !self.stack.contains(&container) {
            // Stray closer with nothing to close
            return;
        }
        while let Some(top) = self.stack.pop() {
            self.close_one(top);
            if top == container {
                break;
            }
        }
        self.end_value();
    }

    fn close_one(&mut self, container: Container) {
        self.strip_trailing_comma();
        if container == Container::Object {
            match self.expect {
                Expect::Colon => self.out.push_str(":null"),
                Expect::Value if !self.out.trim_end().ends_with('{') => self.out.push_str("null"),
                _ => {}
            }
        }
        self.out.push(match container {
            Container::Object => '}',
            Container::Array => ']',
        });
        self.expect = Expect::AfterValue;
    }

    fn push_literal(&mut self, token: &str) {
        let is_key = self.begin_token();
        if is_key {
            self.out.push('"');
            self.out.push_str(token);
            self.out.push('"');
            self.expect = Expect::Colon;
            return;
        }
        let normalized = match token {
            "True" => "true",
            "False" => "false",
            "None" | "undefined" => "null",
            other => other,
        };
        self.out.push_str(normalized);
        self.end_value();
    }
}

fn is_literal_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.')
}

fn push_escaped_control(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        other => out.push_str(&format!("\\u{:04x}", other as u32)),
    }
}

/// Repair common JSON slips. Valid JSON passes through unchanged apart
/// from whitespace.
pub fn repair_json(input: &str) -> String {
    let mut scanner = Scanner::new(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => scan_string(&mut scanner, &mut chars, false),
            c if SMART_QUOTES.contains(&c) => scan_string(&mut scanner, &mut chars, true),
            '{' | '[' => {
                scanner.begin_token();
                scanner.out.push(c);
                if c == '{' {
                    scanner.stack.push(Container::Object);
                    scanner.expect = Expect::Key;
                } else {
                    scanner.stack.push(Container::Array);
                    scanner.expect = Expect::Value;
                }
            }
            '}' => scanner.close(Container::Object),
            ']' => scanner.close(Container::Array),
            ':' => {
                scanner.out.push(':');
                scanner.expect = Expect::Value;
            }
            ',' => {
                // Doubled or leading commas are dropped
                if scanner.expect == Expect::AfterValue {
                    scanner.out.push(',');
                    scanner.expect = scanner.after_comma();
                }
            }
            c if c.is_whitespace() => scanner.out.push(c),
            c if is_literal_char(c) => {
                let mut token = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !is_literal_char(next) {
                        break;
                    }
                    token.push(next);
                    chars.next();
                }
                scanner.push_literal(&token);
            }
            other => scanner.out.push(other),
        }
    }

    while let Some(container) = scanner.stack.pop() {
        scanner.close_one(container);
    }

    scanner.out
}

fn scan_string(
    scanner: &mut Scanner,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    smart: bool,
) {
    let is_key = scanner.begin_token();
    scanner.out.push('"');

    let mut escaped = false;
    let mut terminated = false;
    for c in chars.by_ref() {
        if escaped {
            scanner.out.push(c);
            escaped = false;
            continue;
        }
        let closes = if smart {
            SMART_QUOTES.contains(&c) || c == '"'
        } else {
            c == '"'
        };
        if closes {
            terminated = true;
            break;
        }
        match c {
            '\\' => {
                scanner.out.push(c);
                escaped = true;
            }
            c if (c as u32) < 0x20 => push_escaped_control(&mut scanner.out, c),
            c => scanner.out.push(c),
        }
    }

    if !terminated && escaped {
        // A dangling backslash would escape the closing quote
        scanner.out.pop();
    }
    scanner.out.push('"');

    if is_key {
        scanner.expect = Expect::Colon;
    } else {
        scanner.end_value();
    }
}
