//! Token-level JavaScript scanner.
//!
//! Produces just enough structure to find `require` calls, `exports`
//! assignments and module syntax without a full parse: comments are
//! dropped, strings are decoded, regex literals and template text are
//! opaque, and `${}` expressions inside templates are tokenized normally.

/// A scanned token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    /// Decoded string literal.
    Str(String),
    Punct(&'static str),
    Number,
    /// Template text (between backticks and `${}` holes).
    Template,
    Regex,
}

impl Token {
    #[must_use]
    pub fn is_ident(&self, name: &str) -> bool {
        matches!(self, Self::Ident(ident) if ident == name)
    }

    #[must_use]
    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(self, Self::Punct(p) if *p == punct)
    }
}

/// Keywords after which a `/` starts a regex literal.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Tokenize `source`.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut tokens: Vec<Token> = Vec::new();
    // true when a brace opened a template `${` hole
    let mut braces: Vec<bool> = Vec::new();
    let mut i = 0;

    // Hashbang
    if chars.starts_with(&['#', '!']) {
        while i < len && chars[i] != '\n' {
            i += 1;
        }
    }

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Skip single-line comments
        if c == '/' && i + 1 < len && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        // Skip block comments
        if c == '/' && i + 1 < len && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }

        if c == '/' && regex_allowed(tokens.last()) {
            if let Some(end) = scan_regex(&chars, i) {
                tokens.push(Token::Regex);
                i = end;
                continue;
            }
        }

        if c == '"' || c == '\'' {
            let (value, end) = scan_string(&chars, i);
            tokens.push(Token::Str(value));
            i = end;
            continue;
        }

        if c == '`' {
            i = scan_template(&chars, i + 1, &mut tokens, &mut braces);
            continue;
        }

        if c == '{' {
            braces.push(false);
            tokens.push(Token::Punct("{"));
            i += 1;
            continue;
        }

        if c == '}' {
            if braces.pop() == Some(true) {
                i = scan_template(&chars, i + 1, &mut tokens, &mut braces);
            } else {
                tokens.push(Token::Punct("}"));
                i += 1;
            }
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < len && is_ident_part(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && i + 1 < len && chars[i + 1].is_ascii_digit()) {
            while i < len && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_')
            {
                i += 1;
            }
            tokens.push(Token::Number);
            continue;
        }

        let (punct, width) = scan_punct(&chars, i);
        tokens.push(Token::Punct(punct));
        i += width;
    }

    tokens
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn regex_allowed(last: Option<&Token>) -> bool {
    match last {
        None => true,
        Some(Token::Punct(p)) => *p != ")" && *p != "]",
        Some(Token::Ident(word)) => REGEX_PRECEDING_KEYWORDS.contains(&word.as_str()),
        Some(_) => false,
    }
}

/// Returns the index after the regex flags, or `None` if the literal
/// runs into a line break (then it was a division after all).
fn scan_regex(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut in_class = false;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '\n' => return None,
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                i += 1;
                while i < chars.len() && is_ident_part(chars[i]) {
                    i += 1;
                }
                return Some(i);
            }
            _ => {}
        }
        i += 1;
    }

    None
}

/// Scan a quoted string starting at `start`, decoding common escapes.
fn scan_string(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return (value, i + 1);
        }
        if c == '\n' {
            // Unterminated string
            return (value, i);
        }
        if c == '\\' && i + 1 < chars.len() {
            i += 1;
            match chars[i] {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'v' => value.push('\u{b}'),
                '0' => value.push('\0'),
                '\n' => {}
                'x' => {
                    let hex: String = chars.iter().skip(i + 1).take(2).collect();
                    if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                    {
                        value.push(decoded);
                        i += 2;
                    } else {
                        value.push('x');
                    }
                }
                'u' => {
                    let (decoded, consumed) = decode_unicode_escape(&chars[i + 1..]);
                    match decoded {
                        Some(ch) => value.push(ch),
                        None => value.push('u'),
                    }
                    i += consumed;
                }
                other => value.push(other),
            }
            i += 1;
            continue;
        }
        value.push(c);
        i += 1;
    }

    (value, i)
}

/// Decode the part of a `\u` escape after the `u`.
fn decode_unicode_escape(rest: &[char]) -> (Option<char>, usize) {
    if rest.first() == Some(&'{') {
        let Some(close) = rest.iter().position(|&c| c == '}') else {
            return (None, 0);
        };
        let hex: String = rest[1..close].iter().collect();
        let decoded = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
        return (decoded, close + 1);
    }

    if rest.len() < 4 {
        return (None, 0);
    }
    let hex: String = rest[..4].iter().collect();
    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
        Some(ch) => (Some(ch), 4),
        None => (None, 0),
    }
}

/// Scan template text from `start` up to the closing backtick or the next
/// `${` hole. Pushes a [`Token::Template`] and returns the next index.
fn scan_template(
    chars: &[char],
    start: usize,
    tokens: &mut Vec<Token>,
    braces: &mut Vec<bool>,
) -> usize {
    let mut i = start;
    tokens.push(Token::Template);

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '`' => return i + 1,
            '$' if chars.get(i + 1) == Some(&'{') => {
                braces.push(true);
                return i + 2;
            }
            _ => i += 1,
        }
    }

    i
}

fn scan_punct(chars: &[char], i: usize) -> (&'static str, usize) {
    let next = chars.get(i + 1).copied();
    let after = chars.get(i + 2).copied();

    match (chars[i], next, after) {
        ('.', Some('.'), Some('.')) => ("...", 3),
        ('?', Some('.'), after) if !after.is_some_and(|c| c.is_ascii_digit()) => ("?.", 2),
        ('=', Some('='), Some('=')) => ("===", 3),
        ('=', Some('='), _) => ("==", 2),
        ('=', Some('>'), _) => ("=>", 2),
        ('!', Some('='), Some('=')) => ("!==", 3),
        ('!', Some('='), _) => ("!=", 2),
        ('(', ..) => ("(", 1),
        (')', ..) => (")", 1),
        ('[', ..) => ("[", 1),
        (']', ..) => ("]", 1),
        (';', ..) => (";", 1),
        (',', ..) => (",", 1),
        ('.', ..) => (".", 1),
        (':', ..) => (":", 1),
        ('?', ..) => ("?", 1),
        ('=', ..) => ("=", 1),
        ('!', ..) => ("!", 1),
        ('+', ..) => ("+", 1),
        ('-', ..) => ("-", 1),
        ('*', ..) => ("*", 1),
        ('/', ..) => ("/", 1),
        ('%', ..) => ("%", 1),
        ('&', ..) => ("&", 1),
        ('|', ..) => ("|", 1),
        ('^', ..) => ("^", 1),
        ('~', ..) => ("~", 1),
        ('<', ..) => ("<", 1),
        ('>', ..) => (">", 1),
        ('@', ..) => ("@", 1),
        ('#', ..) => ("#", 1),
        _ => ("", 1),
    }
}

/// Does the source use `import`/`export` module syntax?
///
/// `import(...)` and `import x = require()` / `export =` (TypeScript's
/// CommonJS forms) don't count; `import.meta` does.
#[must_use]
pub fn has_module_syntax(source: &str) -> bool {
    let tokens = tokenize(source);

    tokens.iter().enumerate().any(|(i, token)| {
        let after_dot = i > 0 && (tokens[i - 1].is_punct(".") || tokens[i - 1].is_punct("?."));
        if after_dot {
            return false;
        }
        let next = tokens.get(i + 1);
        if next.is_some_and(|t| t.is_punct(":")) {
            return false;
        }

        match token {
            Token::Ident(word) if word == "import" => match next {
                Some(Token::Punct("(")) | None => false,
                Some(Token::Ident(_)) => !tokens.get(i + 2).is_some_and(|t| t.is_punct("=")),
                Some(_) => true,
            },
            Token::Ident(word) if word == "export" => {
                next.is_some_and(|t| !t.is_punct("="))
            }
            _ => false,
        }
    })
}
