//! Byte-oriented lexer for the XKB text grammar.
//!
//! Works over a borrowed buffer (typically a mapped file) and produces
//! tokens carrying line/column locations for diagnostics. The first
//! grammar-relevant byte must be ASCII; an optional UTF-8 BOM is
//! consumed.

use xkb_core::message::MessageCode;
use xkb_core::{log_warn, Atom, CompileError, Context};

/// Reserved identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    XkbKeymap,
    XkbKeycodes,
    XkbTypes,
    XkbCompatmap,
    XkbSymbols,
    XkbGeometry,
    XkbSemantics,
    XkbLayout,
    Include,
    Override,
    Augment,
    Replace,
    Alternate,
    Alias,
    Key,
    Keys,
    ModifierMap,
    Indicator,
    Virtual,
    Type,
    VirtualModifiers,
    Interpret,
    Action,
    Group,
    Partial,
    Default,
    Hidden,
    AlphanumericKeys,
    ModifierKeys,
    KeypadKeys,
    FunctionKeys,
    AlternateGroup,
}

impl Keyword {
    fn from_ident(s: &str) -> Option<Keyword> {
        Some(match s {
            "xkb_keymap" => Keyword::XkbKeymap,
            "xkb_keycodes" => Keyword::XkbKeycodes,
            "xkb_types" => Keyword::XkbTypes,
            "xkb_compat" | "xkb_compat_map" | "xkb_compatibility" | "xkb_compatibility_map" => {
                Keyword::XkbCompatmap
            }
            "xkb_symbols" => Keyword::XkbSymbols,
            "xkb_geometry" => Keyword::XkbGeometry,
            "xkb_semantics" => Keyword::XkbSemantics,
            "xkb_layout" => Keyword::XkbLayout,
            "include" => Keyword::Include,
            "override" => Keyword::Override,
            "augment" => Keyword::Augment,
            "replace" => Keyword::Replace,
            "alternate" => Keyword::Alternate,
            "alias" => Keyword::Alias,
            "key" => Keyword::Key,
            "keys" => Keyword::Keys,
            "modifier_map" | "mod_map" | "modmap" => Keyword::ModifierMap,
            "indicator" => Keyword::Indicator,
            "virtual" => Keyword::Virtual,
            "type" => Keyword::Type,
            "virtual_modifiers" => Keyword::VirtualModifiers,
            "interpret" => Keyword::Interpret,
            "action" => Keyword::Action,
            "group" => Keyword::Group,
            "partial" => Keyword::Partial,
            "default" => Keyword::Default,
            "hidden" => Keyword::Hidden,
            "alphanumeric_keys" => Keyword::AlphanumericKeys,
            "modifier_keys" => Keyword::ModifierKeys,
            "keypad_keys" => Keyword::KeypadKeys,
            "function_keys" => Keyword::FunctionKeys,
            "alternate_group" => Keyword::AlternateGroup,
            _ => return None,
        })
    }

    /// The source spelling, for use where a keyword appears in an
    /// identifier position (e.g. `type[Group1]= ...`).
    pub fn lexeme(self) -> &'static str {
        match self {
            Keyword::XkbKeymap => "xkb_keymap",
            Keyword::XkbKeycodes => "xkb_keycodes",
            Keyword::XkbTypes => "xkb_types",
            Keyword::XkbCompatmap => "xkb_compatibility_map",
            Keyword::XkbSymbols => "xkb_symbols",
            Keyword::XkbGeometry => "xkb_geometry",
            Keyword::XkbSemantics => "xkb_semantics",
            Keyword::XkbLayout => "xkb_layout",
            Keyword::Include => "include",
            Keyword::Override => "override",
            Keyword::Augment => "augment",
            Keyword::Replace => "replace",
            Keyword::Alternate => "alternate",
            Keyword::Alias => "alias",
            Keyword::Key => "key",
            Keyword::Keys => "keys",
            Keyword::ModifierMap => "modifier_map",
            Keyword::Indicator => "indicator",
            Keyword::Virtual => "virtual",
            Keyword::Type => "type",
            Keyword::VirtualModifiers => "virtual_modifiers",
            Keyword::Interpret => "interpret",
            Keyword::Action => "action",
            Keyword::Group => "group",
            Keyword::Partial => "partial",
            Keyword::Default => "default",
            Keyword::Hidden => "hidden",
            Keyword::AlphanumericKeys => "alphanumeric_keys",
            Keyword::ModifierKeys => "modifier_keys",
            Keyword::KeypadKeys => "keypad_keys",
            Keyword::FunctionKeys => "function_keys",
            Keyword::AlternateGroup => "alternate_group",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    End,
    Semi,
    OBrace,
    CBrace,
    Equals,
    OBracket,
    CBracket,
    OParen,
    CParen,
    Dot,
    Comma,
    Plus,
    Minus,
    Times,
    Divide,
    Exclam,
    Invert,
    Ident(String),
    Keyword(Keyword),
    String(String),
    KeyName(Atom),
    Integer(i64),
    Float,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)
}

fn is_graph(b: u8) -> bool {
    (0x21..=0x7e).contains(&b)
}

pub struct Scanner<'a> {
    ctx: Context,
    s: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
    token_line: usize,
    token_column: usize,
    file_name: String,
}

impl<'a> Scanner<'a> {
    pub fn new(ctx: &Context, input: &'a [u8], file_name: &str) -> Self {
        let mut scanner = Self {
            ctx: ctx.clone(),
            s: input,
            pos: 0,
            line: 1,
            column: 1,
            token_line: 1,
            token_column: 1,
            file_name: file_name.to_owned(),
        };
        // Skip a UTF-8 BOM.
        if scanner.s.starts_with(&[0xef, 0xbb, 0xbf]) {
            scanner.pos = 3;
        }
        scanner
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Location of the token last returned.
    pub fn token_location(&self) -> (usize, usize) {
        (self.token_line, self.token_column)
    }

    /// The first grammar-relevant byte must be ASCII; UTF-16, UTF-32 and
    /// EBCDIC-style encodings fail here.
    pub fn check_supported_encoding(&self) -> bool {
        match self.s.get(self.pos) {
            Some(&b) => b != 0 && b.is_ascii(),
            None => true,
        }
    }

    fn peek(&self) -> u8 {
        self.s.get(self.pos).copied().unwrap_or(0)
    }

    fn eof(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn eol(&self) -> bool {
        self.peek() == b'\n'
    }

    fn next_byte(&mut self) -> u8 {
        let b = self.peek();
        if !self.eof() {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        b
    }

    fn chr(&mut self, c: u8) -> bool {
        if self.peek() == c {
            self.next_byte();
            true
        } else {
            false
        }
    }

    fn lit(&mut self, s: &str) -> bool {
        if self.s[self.pos..].starts_with(s.as_bytes()) {
            for _ in 0..s.len() {
                self.next_byte();
            }
            true
        } else {
            false
        }
    }

    fn skip_to_eol(&mut self) {
        while !self.eof() && !self.eol() {
            self.next_byte();
        }
    }

    /// Up to three octal digits; `None` when the next byte is not an
    /// octal digit.
    fn oct(&mut self) -> Option<u8> {
        if !(b'0'..=b'7').contains(&self.peek()) {
            return None;
        }
        let mut value: u32 = 0;
        for _ in 0..3 {
            if (b'0'..=b'7').contains(&self.peek()) {
                value = value * 8 + u32::from(self.next_byte() - b'0');
            } else {
                break;
            }
        }
        u8::try_from(value).ok()
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            file: self.file_name.clone(),
            line: self.token_line,
            column: self.token_column,
            message: message.into(),
        }
    }

    fn hex_int(&mut self) -> Option<i64> {
        let start = self.pos;
        let mut value: u64 = 0;
        while self.peek().is_ascii_hexdigit() {
            let d = self.next_byte();
            let d = match d {
                b'0'..=b'9' => d - b'0',
                b'a'..=b'f' => d - b'a' + 10,
                _ => d - b'A' + 10,
            };
            value = value.checked_mul(16)?.checked_add(u64::from(d))?;
        }
        if self.pos == start {
            return None;
        }
        i64::try_from(value).ok()
    }

    fn dec_int(&mut self) -> Option<i64> {
        let start = self.pos;
        let mut value: u64 = 0;
        while self.peek().is_ascii_digit() {
            let d = self.next_byte() - b'0';
            value = value.checked_mul(10)?.checked_add(u64::from(d))?;
        }
        if self.pos == start {
            return None;
        }
        i64::try_from(value).ok()
    }

    /// Produces the next token. Lexical errors are fatal.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        loop {
            while is_space(self.peek()) && !self.eof() {
                self.next_byte();
            }
            if self.lit("//") || self.chr(b'#') {
                self.skip_to_eol();
                continue;
            }
            break;
        }

        if self.eof() {
            return Ok(Token::End);
        }

        self.token_line = self.line;
        self.token_column = self.column;

        // String literal.
        if self.chr(b'"') {
            let mut buf = String::new();
            while !self.eof() && !self.eol() && self.peek() != b'"' {
                if self.chr(b'\\') {
                    let escape_start = self.pos;
                    if self.chr(b'\\') {
                        buf.push('\\');
                    } else if self.chr(b'n') {
                        buf.push('\n');
                    } else if self.chr(b't') {
                        buf.push('\t');
                    } else if self.chr(b'r') {
                        buf.push('\r');
                    } else if self.chr(b'b') {
                        buf.push('\u{8}');
                    } else if self.chr(b'f') {
                        buf.push('\u{c}');
                    } else if self.chr(b'v') {
                        buf.push('\u{b}');
                    } else if self.chr(b'e') {
                        buf.push('\u{1b}');
                    } else if let Some(o) = self.oct() {
                        if o != 0 && o.is_ascii() {
                            buf.push(char::from(o));
                        } else {
                            log_warn!(
                                self.ctx,
                                Some(MessageCode::InvalidEscapeSequence),
                                "{}:{}: invalid octal escape sequence in string literal",
                                self.file_name,
                                self.token_line
                            );
                        }
                    } else if self.pos > escape_start {
                        log_warn!(
                            self.ctx,
                            Some(MessageCode::InvalidEscapeSequence),
                            "{}:{}: invalid octal escape sequence in string literal",
                            self.file_name,
                            self.token_line
                        );
                    } else {
                        log_warn!(
                            self.ctx,
                            Some(MessageCode::UnknownCharEscapeSequence),
                            "{}:{}: unknown escape sequence (\\{}) in string literal",
                            self.file_name,
                            self.token_line,
                            char::from(self.peek())
                        );
                        // Emit the escaped character literally.
                        if !self.eof() && !self.eol() {
                            buf.push(char::from(self.next_byte()));
                        }
                    }
                } else {
                    buf.push(char::from(self.next_byte()));
                }
            }
            if !self.chr(b'"') {
                return Err(self.err("unterminated string literal"));
            }
            return Ok(Token::String(buf));
        }

        // Key name literal; empty names are allowed.
        if self.chr(b'<') {
            let start = self.pos;
            while is_graph(self.peek()) && self.peek() != b'>' {
                self.next_byte();
            }
            let end = self.pos;
            if !self.chr(b'>') {
                return Err(self.err("unterminated key name literal"));
            }
            let name = String::from_utf8_lossy(&self.s[start..end]).into_owned();
            return Ok(Token::KeyName(self.ctx.atom_intern(&name)));
        }

        // Operators and punctuation.
        if self.chr(b';') {
            return Ok(Token::Semi);
        }
        if self.chr(b'{') {
            return Ok(Token::OBrace);
        }
        if self.chr(b'}') {
            return Ok(Token::CBrace);
        }
        if self.chr(b'=') {
            return Ok(Token::Equals);
        }
        if self.chr(b'[') {
            return Ok(Token::OBracket);
        }
        if self.chr(b']') {
            return Ok(Token::CBracket);
        }
        if self.chr(b'(') {
            return Ok(Token::OParen);
        }
        if self.chr(b')') {
            return Ok(Token::CParen);
        }
        if self.chr(b'.') {
            return Ok(Token::Dot);
        }
        if self.chr(b',') {
            return Ok(Token::Comma);
        }
        if self.chr(b'+') {
            return Ok(Token::Plus);
        }
        if self.chr(b'-') {
            return Ok(Token::Minus);
        }
        if self.chr(b'*') {
            return Ok(Token::Times);
        }
        if self.chr(b'/') {
            return Ok(Token::Divide);
        }
        if self.chr(b'!') {
            return Ok(Token::Exclam);
        }
        if self.chr(b'~') {
            return Ok(Token::Invert);
        }

        // Identifier or keyword.
        if self.peek().is_ascii_alphabetic() || self.peek() == b'_' {
            let start = self.pos;
            while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                self.next_byte();
            }
            let ident = String::from_utf8_lossy(&self.s[start..self.pos]).into_owned();
            return Ok(match Keyword::from_ident(&ident) {
                Some(kw) => Token::Keyword(kw),
                None => Token::Ident(ident),
            });
        }

        // Number literal: hexadecimal, decimal or float. The sign always
        // comes from a separate minus token.
        if self.lit("0x") || self.lit("0X") {
            return match self.hex_int() {
                Some(value) => Ok(Token::Integer(value)),
                None => Err(self.err("malformed number literal")),
            };
        }
        if self.peek().is_ascii_digit() {
            let Some(value) = self.dec_int() else {
                return Err(self.err("malformed number literal"));
            };
            if self.chr(b'.') {
                // The grammar keeps floats only to report them; the value
                // is discarded.
                if self.dec_int().is_none() {
                    return Err(self.err("malformed number literal"));
                }
                return Ok(Token::Float);
            }
            return Ok(Token::Integer(value));
        }

        Err(self.err(format!("unrecognized token '{}'", char::from(self.peek()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xkb_core::ContextFlags;

    fn ctx() -> Context {
        Context::new(ContextFlags::NO_DEFAULT_INCLUDES | ContextFlags::NO_ENVIRONMENT_NAMES)
    }

    fn tokens(input: &str) -> Vec<Token> {
        let ctx = ctx();
        let mut scanner = Scanner::new(&ctx, input.as_bytes(), "(input)");
        let mut out = Vec::new();
        loop {
            let tok = scanner.next_token().expect("lex error");
            if tok == Token::End {
                return out;
            }
            out.push(tok);
        }
    }

    #[test]
    fn test_punctuation_and_idents() {
        assert_eq!(
            tokens("foo = 12;"),
            vec![
                Token::Ident("foo".into()),
                Token::Equals,
                Token::Integer(12),
                Token::Semi
            ]
        );
    }

    #[test]
    fn test_keywords_are_reserved() {
        assert_eq!(
            tokens("xkb_keycodes include type"),
            vec![
                Token::Keyword(Keyword::XkbKeycodes),
                Token::Keyword(Keyword::Include),
                Token::Keyword(Keyword::Type)
            ]
        );
        // All compat spellings collapse.
        assert_eq!(
            tokens("xkb_compat xkb_compatibility_map"),
            vec![
                Token::Keyword(Keyword::XkbCompatmap),
                Token::Keyword(Keyword::XkbCompatmap)
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            tokens("a // comment\n# another\nb"),
            vec![Token::Ident("a".into()), Token::Ident("b".into())]
        );
    }

    #[test]
    fn test_key_name_literal() {
        let ctx = ctx();
        let mut scanner = Scanner::new(&ctx, b"<AD01> <>", "(input)");
        let Ok(Token::KeyName(atom)) = scanner.next_token() else {
            panic!("expected key name");
        };
        assert_eq!(&*ctx.atom_text(atom), "AD01");
        let Ok(Token::KeyName(empty)) = scanner.next_token() else {
            panic!("expected empty key name");
        };
        assert_eq!(&*ctx.atom_text(empty), "");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\tb\n\\\e\101""#),
            vec![Token::String("a\tb\n\\\u{1b}A".into())]
        );
    }

    #[test]
    fn test_unknown_escape_is_literal() {
        assert_eq!(tokens(r#""a\qb""#), vec![Token::String("aqb".into())]);
    }

    #[test]
    fn test_unterminated_string_is_fatal() {
        let ctx = ctx();
        let mut scanner = Scanner::new(&ctx, b"\"abc", "(input)");
        assert!(matches!(
            scanner.next_token(),
            Err(CompileError::Syntax { .. })
        ));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("10 0x1f 3.14"),
            vec![Token::Integer(10), Token::Integer(0x1f), Token::Float]
        );
    }

    #[test]
    fn test_number_overflow_is_fatal() {
        let ctx = ctx();
        let mut scanner = Scanner::new(&ctx, b"0xffffffffffffffffff", "(input)");
        assert!(scanner.next_token().is_err());
    }

    #[test]
    fn test_locations() {
        let ctx = ctx();
        let mut scanner = Scanner::new(&ctx, b"a\n  b", "(input)");
        scanner.next_token().unwrap();
        assert_eq!(scanner.token_location(), (1, 1));
        scanner.next_token().unwrap();
        assert_eq!(scanner.token_location(), (2, 3));
    }

    #[test]
    fn test_bom_and_encoding_check() {
        let ctx = ctx();
        let scanner = Scanner::new(&ctx, "\u{feff}xkb_keymap".as_bytes(), "(input)");
        assert!(scanner.check_supported_encoding());
        let scanner = Scanner::new(&ctx, &[0x00, 0x61], "(input)");
        assert!(!scanner.check_supported_encoding());
        let scanner = Scanner::new(&ctx, &[0xc3, 0xa9], "(input)");
        assert!(!scanner.check_supported_encoding());
    }
}
