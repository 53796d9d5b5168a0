//! Lexical analysis for diannex source files.
//!
//! The lexer makes a single forward pass over a byte buffer with a small
//! lookahead, producing a flat [`Token`] sequence. Newlines become tokens
//! (the parser treats them as statement terminators); all other whitespace
//! is consumed silently. A UTF-8 BOM at the start of the file is skipped.
//!
//! ## Preprocessor
//!
//! Four directives are recognized: `#include "path"` resolves the path
//! relative to the current file and appends it to the compilation queue;
//! `#ifdef NAME` / `#ifndef NAME` consult the project's macro table and can
//! enter a skipping state in which only nesting of further conditionals is
//! tracked; `#endif` closes the innermost conditional. Inactive regions
//! produce no tokens (other than newlines, which keep line numbers honest).
//!
//! ## Error recovery
//!
//! Problems become error tokens in the stream rather than aborting the
//! pass: an unrecognized byte emits an error and the rest of the line is
//! skipped; a string that reaches end of file unclosed emits
//! [`TokenKind::ErrorUnenclosedString`]. The parser turns these into
//! ordinary diagnostics.
//!
//! [`lex_fragment`] lexes interpolation segments (`${…}` bodies) with an
//! adjusted start position and no preprocessor support.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::context::CompileContext;
use crate::token::{KeywordKind, StringData, Token, TokenKind};

/// Preprocessor access granted to a full-file lex.
struct PreprocessorEnv<'a> {
    queue: &'a mut VecDeque<PathBuf>,
    macros: &'a HashMap<String, String>,
    current_dir: PathBuf,
}

/// Lexes a whole source file, threading preprocessor effects (include
/// queueing, macro conditionals) through the context.
pub fn lex(source: &str, ctx: &mut CompileContext, out: &mut Vec<Token>) {
    lex_at(source, ctx, out, 1, 1);
}

/// Like [`lex`], but starting at an explicit line and column.
pub fn lex_at(source: &str, ctx: &mut CompileContext, out: &mut Vec<Token>, line: u32, column: u16) {
    let current_dir = Path::new(&ctx.current_file)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut env = PreprocessorEnv {
        queue: &mut ctx.queue,
        macros: &ctx.macros,
        current_dir,
    };
    lex_impl(source, Some(&mut env), out, line, column);
}

/// Lexes an interpolation segment. Directives are not available and emit
/// error tokens.
pub fn lex_fragment(source: &str, line: u32, column: u16, out: &mut Vec<Token>) {
    lex_impl(source, None, out, line, column);
}

struct CodeReader<'a> {
    bytes: &'a [u8],
    position: usize,
    line: u32,
    column: u16,
    /// Conditional-stack depth at which skipping ends; -1 when active.
    skip: i32,
    /// Number of open `#ifdef`/`#ifndef` conditionals.
    stack: i32,
}

impl<'a> CodeReader<'a> {
    fn new(bytes: &'a [u8], line: u32, column: u16) -> Self {
        CodeReader {
            bytes,
            position: 0,
            line,
            column,
            skip: -1,
            stack: 0,
        }
    }

    fn more(&self) -> bool {
        self.position < self.bytes.len()
    }

    fn peek(&self) -> u8 {
        self.bytes[self.position]
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.position + n).copied()
    }

    fn advance(&mut self) {
        self.column = self.column.wrapping_add(1);
        self.position += 1;
    }

    fn advance_by(&mut self, count: usize) {
        for _ in 0..count {
            self.advance();
        }
    }

    fn read(&mut self) -> u8 {
        let b = self.bytes[self.position];
        self.advance();
        b
    }

    fn newline(&mut self) {
        self.line += 1;
        self.column = 0;
    }

    fn matches2(&self, a: u8, b: u8) -> bool {
        self.peek_at(0) == Some(a) && self.peek_at(1) == Some(b)
    }

    fn matches3(&self, a: u8, b: u8, c: u8) -> bool {
        self.matches2(a, b) && self.peek_at(2) == Some(c)
    }

    /// Consumes whitespace, emitting a token per newline.
    /// Returns `true` on end of input.
    fn skip_whitespace(&mut self, out: &mut Vec<Token>) -> bool {
        while self.more() {
            match self.peek() {
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c => {}
                b'\n' => {
                    out.push(Token::new(TokenKind::Newline, self.line, self.column));
                    self.newline();
                }
                _ => return false,
            }
            self.advance();
        }
        true
    }

    /// Skips an ordinary `//` or `/* */` comment. Marked comments (`//!`,
    /// `/*!`) are left for the caller. Returns `true` if one was consumed.
    /// The newline ending a line comment stays unconsumed so the caller's
    /// whitespace skip still emits its token.
    fn read_comment(&mut self) -> bool {
        if !self.more() || self.peek() != b'/' {
            return false;
        }
        match self.peek_at(1) {
            Some(b'/') => {
                if self.peek_at(2) == Some(b'!') {
                    return false;
                }
                self.advance_by(2);
                while self.more() && self.peek() != b'\n' {
                    self.advance();
                }
                true
            }
            Some(b'*') => {
                if self.peek_at(2) == Some(b'!') {
                    return false;
                }
                self.advance_by(2);
                while self.more() {
                    let b = self.read();
                    if b == b'\n' {
                        self.newline();
                    } else if b == b'*' && self.more() && self.peek() == b'/' {
                        self.advance();
                        break;
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn is_identifier_start(b: u8) -> bool {
        b.is_ascii_alphabetic() || b == b'_' || b >= 0xc0
    }

    fn is_identifier_mid(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b >= 0x80
    }

    /// Reads an identifier, or returns `None` without consuming anything.
    fn read_identifier(&mut self) -> Option<String> {
        if !self.more() || !Self::is_identifier_start(self.peek()) {
            return None;
        }
        let base = self.position;
        self.advance();
        while self.more() && Self::is_identifier_mid(self.peek()) {
            self.advance();
        }
        Some(String::from_utf8_lossy(&self.bytes[base..self.position]).into_owned())
    }

    /// Skips everything up to (not including) the next newline.
    fn skip_rest_of_line(&mut self) {
        while self.more() && self.peek() != b'\n' {
            self.advance();
        }
    }

    /// Matches the directive word immediately after a `#` at the current
    /// position, requiring trailing whitespace or end of input. Used only
    /// while a conditional is skipping. Returns the word's length.
    fn skipped_directive(&self) -> Option<(&'static str, usize)> {
        for word in ["ifndef", "ifdef", "endif"] {
            let end = self.position + 1 + word.len();
            if self.bytes.len() >= end
                && &self.bytes[self.position + 1..end] == word.as_bytes()
                && self
                    .bytes
                    .get(end)
                    .map_or(true, |&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c))
            {
                return Some((word, 1 + word.len()));
            }
        }
        None
    }
}

fn lex_impl(
    source: &str,
    mut env: Option<&mut PreprocessorEnv<'_>>,
    out: &mut Vec<Token>,
    start_line: u32,
    start_col: u16,
) {
    let mut cr = CodeReader::new(source.as_bytes(), start_line, start_col);

    if cr.matches3(0xef, 0xbb, 0xbf) {
        cr.advance_by(3); // UTF-8 BOM
    }

    while cr.more() {
        if cr.skip_whitespace(out) {
            break;
        }

        // Inside an inactive conditional region only directive nesting is
        // tracked; no tokens are produced.
        if cr.skip >= 0 {
            if cr.peek() == b'#' {
                if let Some((word, len)) = cr.skipped_directive() {
                    cr.advance_by(len);
                    if word == "endif" {
                        cr.stack -= 1;
                        if cr.stack == cr.skip {
                            cr.skip = -1;
                        }
                    } else {
                        cr.stack += 1;
                    }
                    continue;
                }
            }
            cr.advance();
            continue;
        }

        if cr.read_comment() {
            continue;
        }

        if cr.matches3(b'/', b'/', b'!') {
            // Single-line marked comment
            let col = cr.column;
            cr.advance_by(3);
            let base = cr.position;
            while cr.more() && cr.peek() != b'\n' {
                cr.advance();
            }
            let text = String::from_utf8_lossy(&cr.bytes[base..cr.position]).into_owned();
            out.push(Token::with_content(TokenKind::MarkedComment, cr.line, col, text));
            continue;
        }

        if cr.matches3(b'/', b'*', b'!') {
            // Multi-line marked comment
            let line = cr.line;
            let col = cr.column;
            cr.advance_by(3);
            let base = cr.position;
            let mut end = base;
            let mut found_end = false;
            while cr.more() {
                let b = cr.read();
                if b == b'*' && cr.more() && cr.peek() == b'/' {
                    end = cr.position - 1;
                    cr.advance();
                    found_end = true;
                    break;
                } else if b == b'\n' {
                    out.push(Token::new(TokenKind::Newline, cr.line, cr.column));
                    cr.newline();
                }
            }
            if !found_end {
                end = cr.position;
            }
            let text = String::from_utf8_lossy(&cr.bytes[base..end]).into_owned();
            out.push(Token::with_content(TokenKind::MarkedComment, line, col, text));
            continue;
        }

        let curr = cr.peek();

        if curr == b'#' {
            lex_directive(&mut cr, env.as_deref_mut(), out);
            continue;
        }

        if curr.is_ascii_digit() || (curr == b'.' && cr.peek_at(1) != Some(b'.')) {
            lex_number(&mut cr, out);
            continue;
        }

        if curr == b'"' || cr.matches2(b'@', b'"') || cr.matches2(b'!', b'"') {
            lex_string(&mut cr, out);
            continue;
        }

        lex_symbol_or_identifier(&mut cr, out);
    }
}

/// Lexes a number or percentage literal. A `..` stops the scan so ranges
/// like `1..5` keep their bounds separate.
fn lex_number(cr: &mut CodeReader<'_>, out: &mut Vec<Token>) {
    let line = cr.line;
    let col = cr.column;
    let base = cr.position;

    let first = cr.read();
    let mut found_separator = first == b'.';
    let mut found_number = first.is_ascii_digit();
    let mut is_percent = false;

    while cr.more() {
        let b = cr.peek();
        if found_number && b == b'%' {
            cr.advance();
            is_percent = true;
            break;
        } else if b == b'.' {
            if found_separator || cr.peek_at(1) == Some(b'.') {
                break;
            }
            found_separator = true;
        } else if !b.is_ascii_digit() {
            break;
        } else {
            found_number = true;
        }
        cr.advance();
    }

    let end = if is_percent { cr.position - 1 } else { cr.position };
    let text = String::from_utf8_lossy(&cr.bytes[base..end]).into_owned();
    let kind = if is_percent {
        TokenKind::Percentage
    } else {
        TokenKind::Number
    };
    out.push(Token::with_content(kind, line, col, text));
}

/// Lexes one of the three string-literal forms, decoding escapes and
/// consuming a trailing `&XXXXXXXX` stable-id suffix where present.
fn lex_string(cr: &mut CodeReader<'_>, out: &mut Vec<Token>) {
    let prefix = cr.peek();
    let line = cr.line;
    let col = cr.column;
    cr.advance_by(if prefix == b'"' { 1 } else { 2 });

    let mut content: Vec<u8> = Vec::new();
    let mut found_end = false;
    while cr.more() {
        // An unescaped newline ends the literal unterminated; the newline
        // itself is left for the caller so following lines still lex.
        if cr.peek() == b'\n' {
            break;
        }
        let b = cr.read();
        if b == b'\\' {
            if !cr.more() {
                break;
            }
            let escaped = cr.read();
            match escaped {
                b'a' => content.push(0x07),
                b'n' => content.push(b'\n'),
                b'r' => content.push(b'\r'),
                b't' => content.push(b'\t'),
                b'v' => content.push(0x0b),
                b'f' => content.push(0x0c),
                b'b' => content.push(0x08),
                b'\n' => cr.newline(),
                // Unknown escapes pass through verbatim.
                other => content.push(other),
            }
        } else if b == b'"' {
            found_end = true;
            break;
        } else {
            content.push(b);
        }
    }

    if !found_end {
        out.push(Token::new(TokenKind::ErrorUnenclosedString, line, col));
        return;
    }

    let end_of_string_pos = cr.position as u32;
    let kind = match prefix {
        b'@' => TokenKind::MarkedString,
        b'!' => TokenKind::ExcludeString,
        _ => TokenKind::String,
    };
    let text = String::from_utf8_lossy(&content).into_owned();

    if kind == TokenKind::ExcludeString {
        out.push(Token::with_content(kind, line, col, text));
        return;
    }

    // Optional stable localization id after the closing quote.
    let mut localized_string_id = None;
    if cr.peek_at(0) == Some(b'&') {
        let digits = &cr.bytes[cr.position + 1..];
        if digits.len() >= 8 && digits[..8].iter().all(u8::is_ascii_hexdigit) {
            let hex = std::str::from_utf8(&digits[..8]).unwrap_or("0");
            if let Ok(id) = u32::from_str_radix(hex, 16) {
                localized_string_id = Some(id);
                cr.advance_by(9);
            }
        }
    }

    out.push(Token::with_string(
        kind,
        line,
        col,
        text,
        StringData {
            localized_string_id,
            end_of_string_pos,
        },
    ));
}

/// Lexes a `#` directive and applies its effect: include queueing or
/// conditional state changes.
fn lex_directive(
    cr: &mut CodeReader<'_>,
    env: Option<&mut PreprocessorEnv<'_>>,
    out: &mut Vec<Token>,
) {
    let line = cr.line;
    let col = cr.column;
    cr.advance();

    let Some(env) = env else {
        out.push(Token::with_content(
            TokenKind::Error,
            line,
            col,
            "Unexpected directive",
        ));
        cr.skip_rest_of_line();
        return;
    };

    cr.skip_whitespace(out);
    let Some(word) = cr.read_identifier() else {
        out.push(Token::with_content(
            TokenKind::Error,
            line,
            col,
            "Invalid directive",
        ));
        cr.skip_rest_of_line();
        return;
    };

    let keyword = match word.as_str() {
        "include" => KeywordKind::Include,
        "ifdef" => KeywordKind::IfDef,
        "ifndef" => KeywordKind::IfNDef,
        "endif" => KeywordKind::EndIf,
        _ => {
            out.push(Token::with_content(
                TokenKind::ErrorString,
                line,
                col,
                format!("Unknown directive '{}'", word),
            ));
            return;
        }
    };

    match keyword {
        KeywordKind::Include => {
            if cr.skip_whitespace(out) {
                out.push(Token::with_content(
                    TokenKind::Error,
                    cr.line,
                    cr.column,
                    "Unexpected end of file after directive",
                ));
                return;
            }
            let str_line = cr.line;
            let str_col = cr.column;
            if cr.peek() != b'"' {
                out.push(Token::with_content(
                    TokenKind::Error,
                    str_line,
                    str_col,
                    "Expected file path after #include",
                ));
                return;
            }
            cr.advance();
            let base = cr.position;
            let mut found_end = false;
            while cr.more() {
                if cr.read() == b'"' {
                    found_end = true;
                    break;
                }
            }
            if !found_end {
                out.push(Token::new(TokenKind::ErrorUnenclosedString, str_line, str_col));
                return;
            }
            let path = String::from_utf8_lossy(&cr.bytes[base..cr.position - 1]).into_owned();
            env.queue.push_back(env.current_dir.join(path));
        }
        KeywordKind::IfDef | KeywordKind::IfNDef => {
            if cr.skip_whitespace(out) {
                out.push(Token::with_content(
                    TokenKind::Error,
                    cr.line,
                    cr.column,
                    "Unexpected end of file after directive",
                ));
                return;
            }
            let name_line = cr.line;
            let name_col = cr.column;
            let Some(name) = cr.read_identifier() else {
                out.push(Token::with_content(
                    TokenKind::Error,
                    name_line,
                    name_col,
                    "Expected macro name after directive",
                ));
                return;
            };
            let mut skip = !env.macros.contains_key(&name);
            if keyword == KeywordKind::IfNDef {
                skip = !skip;
            }
            if skip {
                cr.skip = cr.stack;
            }
            cr.stack += 1;
        }
        KeywordKind::EndIf => {
            if cr.stack == 0 {
                out.push(Token::with_content(
                    TokenKind::Error,
                    line,
                    col,
                    "Trailing #endif",
                ));
            } else {
                cr.stack -= 1;
            }
        }
        _ => unreachable!(),
    }
}

/// Lexes punctuation, operators, keywords and identifiers; unrecognized
/// bytes produce an error token and the rest of the line is discarded.
fn lex_symbol_or_identifier(cr: &mut CodeReader<'_>, out: &mut Vec<Token>) {
    let line = cr.line;
    let col = cr.column;
    let curr = cr.peek();
    let next = cr.peek_at(1);

    // Two-character operator helper: consumes both and emits.
    macro_rules! pair {
        ($kind:expr) => {{
            cr.advance_by(2);
            out.push(Token::new($kind, line, col));
            return;
        }};
    }
    macro_rules! single {
        ($kind:expr) => {{
            cr.advance();
            out.push(Token::new($kind, line, col));
            return;
        }};
    }

    match curr {
        b'(' => single!(TokenKind::OpenParen),
        b')' => single!(TokenKind::CloseParen),
        b'{' => single!(TokenKind::OpenCurly),
        b'}' => single!(TokenKind::CloseCurly),
        b'[' => single!(TokenKind::OpenBrack),
        b']' => single!(TokenKind::CloseBrack),
        b';' => single!(TokenKind::Semicolon),
        b':' => single!(TokenKind::Colon),
        b',' => single!(TokenKind::Comma),
        b'?' => single!(TokenKind::Ternary),
        b'$' => single!(TokenKind::VariableStart),
        b'~' => single!(TokenKind::BitwiseNegate),
        b'.' => {
            if next == Some(b'.') {
                pair!(TokenKind::Range);
            }
            // A lone '.' outside a number is unexpected.
            cr.advance();
            out.push(Token::with_content(
                TokenKind::Error,
                line,
                col,
                "Invalid character",
            ));
            cr.skip_rest_of_line();
            return;
        }
        b'=' => match next {
            Some(b'=') => pair!(TokenKind::CompareEq),
            _ => single!(TokenKind::Equals),
        },
        b'+' => match next {
            Some(b'+') => pair!(TokenKind::Increment),
            Some(b'=') => pair!(TokenKind::PlusEquals),
            _ => single!(TokenKind::Plus),
        },
        b'-' => match next {
            Some(b'-') => pair!(TokenKind::Decrement),
            Some(b'=') => pair!(TokenKind::MinusEquals),
            _ => single!(TokenKind::Minus),
        },
        b'*' => match next {
            Some(b'*') => pair!(TokenKind::Power),
            Some(b'=') => pair!(TokenKind::MultiplyEquals),
            _ => single!(TokenKind::Multiply),
        },
        b'/' => match next {
            Some(b'=') => pair!(TokenKind::DivideEquals),
            _ => single!(TokenKind::Divide),
        },
        b'%' => match next {
            Some(b'=') => pair!(TokenKind::ModEquals),
            _ => single!(TokenKind::Mod),
        },
        b'!' => match next {
            // `!"` begins an excluded string, handled before this point.
            Some(b'=') => pair!(TokenKind::CompareNeq),
            _ => single!(TokenKind::Not),
        },
        b'>' => match next {
            Some(b'=') => pair!(TokenKind::CompareGte),
            Some(b'>') => pair!(TokenKind::BitwiseRShift),
            _ => single!(TokenKind::CompareGt),
        },
        b'<' => match next {
            Some(b'=') => pair!(TokenKind::CompareLte),
            Some(b'<') => pair!(TokenKind::BitwiseLShift),
            _ => single!(TokenKind::CompareLt),
        },
        b'&' => match next {
            Some(b'&') => pair!(TokenKind::LogicalAnd),
            Some(b'=') => pair!(TokenKind::BitwiseAndEquals),
            _ => single!(TokenKind::BitwiseAnd),
        },
        b'|' => match next {
            Some(b'|') => pair!(TokenKind::LogicalOr),
            Some(b'=') => pair!(TokenKind::BitwiseOrEquals),
            _ => single!(TokenKind::BitwiseOr),
        },
        b'^' => match next {
            Some(b'=') => pair!(TokenKind::BitwiseXorEquals),
            _ => single!(TokenKind::BitwiseXor),
        },
        _ => {}
    }

    // Must be an identifier or keyword, otherwise invalid input.
    match cr.read_identifier() {
        Some(word) => out.push(classify_word(word, line, col)),
        None => {
            cr.advance();
            out.push(Token::with_content(
                TokenKind::Error,
                line,
                col,
                "Invalid character",
            ));
            cr.skip_rest_of_line();
        }
    }
}

fn classify_word(word: String, line: u32, col: u16) -> Token {
    let kind = match word.as_str() {
        "namespace" => TokenKind::GroupKeyword(KeywordKind::Namespace),
        "scene" => TokenKind::GroupKeyword(KeywordKind::Scene),
        "def" => TokenKind::GroupKeyword(KeywordKind::Def),
        "func" => TokenKind::GroupKeyword(KeywordKind::Func),
        "choice" => TokenKind::MainKeyword(KeywordKind::Choice),
        "choose" => TokenKind::MainKeyword(KeywordKind::Choose),
        "if" => TokenKind::MainKeyword(KeywordKind::If),
        "else" => TokenKind::MainKeyword(KeywordKind::Else),
        "while" => TokenKind::MainKeyword(KeywordKind::While),
        "for" => TokenKind::MainKeyword(KeywordKind::For),
        "do" => TokenKind::MainKeyword(KeywordKind::Do),
        "repeat" => TokenKind::MainKeyword(KeywordKind::Repeat),
        "switch" => TokenKind::MainKeyword(KeywordKind::Switch),
        "case" => TokenKind::MainKeyword(KeywordKind::Case),
        "default" => TokenKind::MainKeyword(KeywordKind::Default),
        "continue" => TokenKind::MainKeyword(KeywordKind::Continue),
        "break" => TokenKind::MainKeyword(KeywordKind::Break),
        "return" => TokenKind::MainKeyword(KeywordKind::Return),
        "sequence" => TokenKind::MainKeyword(KeywordKind::Sequence),
        "require" => TokenKind::MainSubKeyword(KeywordKind::Require),
        "chance" => TokenKind::MainSubKeyword(KeywordKind::Chance),
        "local" => TokenKind::ModifierKeyword(KeywordKind::Local),
        "global" => TokenKind::ModifierKeyword(KeywordKind::Global),
        "undefined" => TokenKind::Undefined,
        _ => return Token::with_content(TokenKind::Identifier, line, col, word),
    };
    Token::new(kind, line, col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectFormat;

    fn lex_all(source: &str) -> Vec<Token> {
        let mut ctx = CompileContext::new(ProjectFormat::default());
        let mut out = Vec::new();
        lex(source, &mut ctx, &mut out);
        out
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_numbers_and_percentages() {
        let tokens = lex_all("12 3.5 .5 50%");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Number,
                TokenKind::Percentage
            ]
        );
        assert_eq!(tokens[0].content, "12");
        assert_eq!(tokens[1].content, "3.5");
        assert_eq!(tokens[2].content, ".5");
        assert_eq!(tokens[3].content, "50");
    }

    #[test]
    fn range_splits_adjacent_numbers() {
        let tokens = lex_all("1..5");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Number, TokenKind::Range, TokenKind::Number]
        );
        assert_eq!(tokens[0].content, "1");
        assert_eq!(tokens[2].content, "5");
    }

    #[test]
    fn lexes_string_forms() {
        let tokens = lex_all(r#""plain" @"marked" !"excluded""#);
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::String,
                TokenKind::MarkedString,
                TokenKind::ExcludeString
            ]
        );
        assert!(tokens[0].string_data.is_some());
        assert!(tokens[1].string_data.is_some());
        assert!(tokens[2].string_data.is_none());
    }

    #[test]
    fn decodes_escapes_and_passes_unknown_through() {
        let tokens = lex_all(r#""a\nb\t\"c\q""#);
        assert_eq!(tokens[0].content, "a\nb\t\"cq");
    }

    #[test]
    fn string_id_suffix_is_consumed() {
        let tokens = lex_all("@\"hi\"&0000002a");
        assert_eq!(tokens.len(), 1);
        let data = tokens[0].string_data.unwrap();
        assert_eq!(data.localized_string_id, Some(0x2a));
        // `@"hi"` occupies bytes 0..5; the insertion point is byte 5.
        assert_eq!(data.end_of_string_pos, 5);
    }

    #[test]
    fn ampersand_without_hex_digits_stays_a_token() {
        let tokens = lex_all("\"a\" & 1");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::String, TokenKind::BitwiseAnd, TokenKind::Number]
        );
    }

    #[test]
    fn unenclosed_string_recovers_on_next_line() {
        let tokens = lex_all("\"open\nscene");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::ErrorUnenclosedString,
                TokenKind::Newline,
                TokenKind::GroupKeyword(KeywordKind::Scene)
            ]
        );
    }

    #[test]
    fn escaped_newline_continues_a_string() {
        let tokens = lex_all("\"one \\\ntwo\"");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].content, "one two");
    }

    #[test]
    fn newlines_are_tokens_and_count_lines() {
        let tokens = lex_all("a\nb");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Identifier, TokenKind::Newline, TokenKind::Identifier]
        );
        assert_eq!(tokens[2].line, 2);
    }

    #[test]
    fn comments_are_skipped_marked_comments_kept() {
        let tokens = lex_all("// skip me\n/* and me */ //! translator hint");
        let marked: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::MarkedComment)
            .collect();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].content, " translator hint");
    }

    #[test]
    fn multiline_marked_comment_content() {
        let tokens = lex_all("/*! hint\nsecond */");
        let marked = tokens
            .iter()
            .find(|t| t.kind == TokenKind::MarkedComment)
            .unwrap();
        assert_eq!(marked.content, " hint\nsecond ");
    }

    #[test]
    fn keywords_are_classified() {
        let tokens = lex_all("scene if chance local sequence undefined");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::GroupKeyword(KeywordKind::Scene),
                TokenKind::MainKeyword(KeywordKind::If),
                TokenKind::MainSubKeyword(KeywordKind::Chance),
                TokenKind::ModifierKeyword(KeywordKind::Local),
                TokenKind::MainKeyword(KeywordKind::Sequence),
                TokenKind::Undefined
            ]
        );
    }

    #[test]
    fn identifiers_may_contain_dots() {
        let tokens = lex_all("ns.helper(1)");
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].content, "ns.helper");
    }

    #[test]
    fn compound_operators() {
        let tokens = lex_all("+= ++ ** << >= != && |=");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::PlusEquals,
                TokenKind::Increment,
                TokenKind::Power,
                TokenKind::BitwiseLShift,
                TokenKind::CompareGte,
                TokenKind::CompareNeq,
                TokenKind::LogicalAnd,
                TokenKind::BitwiseOrEquals
            ]
        );
    }

    #[test]
    fn invalid_byte_errors_and_skips_line() {
        let tokens = lex_all("` junk here\nok");
        assert_eq!(tokens[0].kind, TokenKind::Error);
        let after: Vec<_> = kinds(&tokens[1..]);
        assert_eq!(after, vec![TokenKind::Newline, TokenKind::Identifier]);
    }

    #[test]
    fn bom_is_skipped() {
        let tokens = lex_all("\u{feff}scene");
        assert_eq!(tokens[0].kind, TokenKind::GroupKeyword(KeywordKind::Scene));
    }

    #[test]
    fn include_pushes_path_onto_queue() {
        let mut ctx = CompileContext::new(ProjectFormat::default());
        ctx.current_file = "/tmp/project/main.dx".to_string();
        let mut out = Vec::new();
        lex("#include \"extra.dx\"\nscene", &mut ctx, &mut out);
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(
            ctx.queue[0],
            std::path::Path::new("/tmp/project/extra.dx")
        );
        assert!(out
            .iter()
            .any(|t| t.kind == TokenKind::GroupKeyword(KeywordKind::Scene)));
    }

    #[test]
    fn ifdef_skips_undefined_macro_region() {
        let tokens = lex_all("#ifdef MISSING\nscene hidden\n#endif\nvisible");
        assert!(!tokens
            .iter()
            .any(|t| t.kind == TokenKind::GroupKeyword(KeywordKind::Scene)));
        assert!(tokens
            .iter()
            .any(|t| t.kind == TokenKind::Identifier && t.content == "visible"));
    }

    #[test]
    fn ifdef_keeps_defined_macro_region() {
        let mut project = ProjectFormat::default();
        project.options.macros.push("PRESENT".to_string());
        let mut ctx = CompileContext::new(project);
        let mut out = Vec::new();
        lex("#ifdef PRESENT\nkept\n#endif", &mut ctx, &mut out);
        assert!(out
            .iter()
            .any(|t| t.kind == TokenKind::Identifier && t.content == "kept"));
        assert!(!out.iter().any(|t| t.kind.is_error()));
    }

    #[test]
    fn ifndef_inverts_the_predicate() {
        let tokens = lex_all("#ifndef MISSING\nkept\n#endif");
        assert!(tokens
            .iter()
            .any(|t| t.kind == TokenKind::Identifier && t.content == "kept"));
    }

    #[test]
    fn nested_conditionals_stay_balanced() {
        let tokens = lex_all("#ifdef A\n#ifdef B\ninner\n#endif\nmid\n#endif\nouter");
        assert!(!tokens
            .iter()
            .any(|t| t.kind == TokenKind::Identifier && t.content == "inner"));
        assert!(!tokens
            .iter()
            .any(|t| t.kind == TokenKind::Identifier && t.content == "mid"));
        assert!(tokens
            .iter()
            .any(|t| t.kind == TokenKind::Identifier && t.content == "outer"));
    }

    #[test]
    fn trailing_endif_is_an_error() {
        let tokens = lex_all("#endif");
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert!(tokens[0].content.contains("Trailing"));
    }

    #[test]
    fn unknown_directive_is_an_error_string() {
        let tokens = lex_all("#pragma once");
        assert_eq!(tokens[0].kind, TokenKind::ErrorString);
        assert!(tokens[0].content.contains("pragma"));
    }

    #[test]
    fn fragment_lexing_rejects_directives() {
        let mut out = Vec::new();
        lex_fragment("#include \"x\"", 3, 9, &mut out);
        assert_eq!(out[0].kind, TokenKind::Error);
        assert_eq!(out[0].line, 3);
    }

    #[test]
    fn fragment_lexing_starts_at_given_position() {
        let mut out = Vec::new();
        lex_fragment("$name", 7, 21, &mut out);
        assert_eq!(out[0].kind, TokenKind::VariableStart);
        assert_eq!(out[0].line, 7);
        assert_eq!(out[0].column, 21);
    }

    #[test]
    fn token_stream_round_trips_through_display() {
        let source = "scene s {\n$x = 1 + 2\n@\"hi\" \n}";
        let first = lex_all(source);
        let printed: String = first
            .iter()
            .map(|t| {
                let mut s = t.to_string();
                s.push(' ');
                s
            })
            .collect();
        let second = lex_all(&printed);
        assert_eq!(kinds(&first), kinds(&second));
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.content, b.content);
        }
    }
}
