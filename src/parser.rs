//! Recursive-descent parser for diannex token streams.
//!
//! The parser consumes a flat token sequence and produces a [`ParseResult`]
//! whose root is a [`Node::Block`] of group-level declarations. It uses
//! one-token lookahead, treats newlines as statement terminators (ignoring
//! them wherever whitespace is semantically irrelevant), and never fails
//! hard: errors are collected and parsing resumes at the next statement
//! boundary via [`Parser::synchronize`].
//!
//! Expression parsing is precedence climbing, lowest level first:
//! conditional `?:` (right-associative), `||`, `&&`, comparison, bitwise
//! (`| & ^` at one level), shift, additive, multiplicative (`* / % **`),
//! unary, then primaries. All binary levels are left-associative.
//!
//! When interpolation is enabled, string literals are scanned for `${…}`
//! segments; each segment is re-lexed and parsed as an expression, and the
//! results become children of the string's node in source order.

use crate::ast::{ChoiceEntry, ChooseEntry, Flag, Node, ParseResult};
use crate::error::{ParseError, ParseErrorKind};
use crate::lexer;
use crate::project::ProjectOptions;
use crate::token::{KeywordKind, Token, TokenKind};

/// Parses one file's token stream.
pub fn parse(tokens: &[Token], options: &ProjectOptions) -> ParseResult {
    let mut parser = Parser::new(tokens, options.interpolation_enabled);
    parser.skip_newlines();
    let children = parser.parse_group_block(false);
    ParseResult {
        root: Node::Block { children },
        errors: parser.errors,
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    stored_position: usize,
    stored_errors: usize,
    errors: Vec<ParseError>,
    interpolation: bool,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], interpolation: bool) -> Self {
        Parser {
            tokens,
            position: 0,
            stored_position: 0,
            stored_errors: 0,
            errors: Vec::new(),
            interpolation,
        }
    }

    // ----- Token access -----

    fn is_more(&self) -> bool {
        self.position < self.tokens.len()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn take(&mut self) -> Token {
        let token = self.tokens[self.position].clone();
        self.advance();
        token
    }

    fn is_next(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn skip_newlines(&mut self) {
        while self.is_next(TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(
            self.peek_kind(),
            Some(TokenKind::Newline | TokenKind::Semicolon)
        ) {
            self.advance();
        }
    }

    fn store_position(&mut self) {
        self.stored_position = self.position;
        self.stored_errors = self.errors.len();
    }

    fn restore_position(&mut self) {
        self.position = self.stored_position;
        self.errors.truncate(self.stored_errors);
    }

    /// Advances to the next plausible statement boundary after an error.
    fn synchronize(&mut self) {
        self.advance();
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Semicolon
                | TokenKind::Identifier
                | TokenKind::ModifierKeyword(_)
                | TokenKind::MainKeyword(_)
                | TokenKind::MainSubKeyword(_)
                | TokenKind::GroupKeyword(_) => break,
                _ => self.advance(),
            }
        }
    }

    // ----- Errors -----

    fn error(&mut self, kind: ParseErrorKind, line: u32, column: u16) {
        self.errors.push(ParseError::new(kind, line, column));
    }

    fn error_at_token(&mut self, kind: ParseErrorKind, token: &Token) {
        self.errors
            .push(ParseError::new(kind, token.line, token.column));
    }

    /// Records a lexer error token as a diagnostic and consumes it.
    fn consume_error_token(&mut self) {
        let token = self.take();
        let message = match token.kind {
            TokenKind::ErrorUnenclosedString => "Unenclosed string.".to_string(),
            _ if token.content.is_empty() => "Invalid token.".to_string(),
            _ => format!("{}.", token.content),
        };
        self.error(
            ParseErrorKind::ErrorToken { message },
            token.line,
            token.column,
        );
    }

    /// Consumes the next token, requiring the given kind.
    fn ensure_token(&mut self, kind: TokenKind) -> Option<Token> {
        let Some(token) = self.peek() else {
            self.error(
                ParseErrorKind::ExpectedTokenButEof {
                    expected: kind.describe(),
                },
                0,
                0,
            );
            return None;
        };
        let token = token.clone();
        self.advance();
        if token.kind == kind {
            Some(token)
        } else if token.kind.is_error() {
            self.position -= 1;
            self.consume_error_token();
            None
        } else {
            self.error(
                ParseErrorKind::ExpectedTokenButGot {
                    expected: kind.describe(),
                    got: token.kind.describe(),
                },
                token.line,
                token.column,
            );
            None
        }
    }

    /// Consumes the next token, requiring one of two kinds.
    fn ensure_either(&mut self, a: TokenKind, b: TokenKind) -> Option<Token> {
        let Some(token) = self.peek() else {
            self.error(
                ParseErrorKind::ExpectedTokenButEof {
                    expected: a.describe(),
                },
                0,
                0,
            );
            return None;
        };
        let token = token.clone();
        self.advance();
        if token.kind == a || token.kind == b {
            Some(token)
        } else {
            self.error(
                ParseErrorKind::ExpectedTokenButGot {
                    expected: a.describe(),
                    got: token.kind.describe(),
                },
                token.line,
                token.column,
            );
            None
        }
    }

    // ----- Group scope -----

    fn parse_group_block(&mut self, is_namespace: bool) -> Vec<Node> {
        if is_namespace {
            self.ensure_token(TokenKind::OpenCurly);
        }
        self.skip_newlines();

        let mut children = Vec::new();
        while self.is_more() && !self.is_next(TokenKind::CloseCurly) {
            if let Some(node) = self.parse_group_statement(None) {
                children.push(node);
            }
            self.skip_newlines();
        }

        if is_namespace {
            self.ensure_token(TokenKind::CloseCurly);
        }
        children
    }

    fn parse_group_statement(&mut self, modifier: Option<KeywordKind>) -> Option<Node> {
        let token = self.peek()?.clone();
        match token.kind {
            TokenKind::GroupKeyword(group) => {
                self.advance();
                self.skip_newlines();
                let name = self.ensure_token(TokenKind::Identifier);
                let Some(name) = name else {
                    self.synchronize();
                    return None;
                };
                self.skip_newlines();
                if group != KeywordKind::Func && modifier.is_some() {
                    self.error_at_token(
                        ParseErrorKind::UnexpectedModifierFor {
                            construct: token.kind.describe(),
                        },
                        &token,
                    );
                }
                match group {
                    KeywordKind::Namespace => {
                        let children = self.parse_group_block(true);
                        Some(Node::Namespace {
                            name: name.content,
                            children,
                        })
                    }
                    KeywordKind::Scene => {
                        let flags = self.parse_flags();
                        self.skip_newlines();
                        let body = self.parse_scene_body();
                        Some(Node::Scene {
                            name: name.content,
                            token,
                            flags,
                            body,
                        })
                    }
                    KeywordKind::Func => {
                        let args = self.parse_function_params();
                        self.skip_newlines();
                        let flags = self.parse_flags();
                        self.skip_newlines();
                        let body = self.parse_scene_body();
                        Some(Node::Function {
                            name: name.content,
                            token,
                            args,
                            flags,
                            body,
                        })
                    }
                    KeywordKind::Def => {
                        let children = self.parse_definition_block();
                        Some(Node::Definitions {
                            name: name.content,
                            token,
                            children,
                        })
                    }
                    _ => None,
                }
            }
            TokenKind::ModifierKeyword(kind) => {
                self.advance();
                self.skip_newlines();
                self.parse_group_statement(Some(kind))
            }
            TokenKind::MarkedComment => {
                if modifier.is_some() {
                    self.error_at_token(
                        ParseErrorKind::UnexpectedModifierFor {
                            construct: token.kind.describe(),
                        },
                        &token,
                    );
                }
                self.advance();
                Some(Node::MarkedComment {
                    text: token.content,
                })
            }
            kind if kind.is_error() => {
                self.consume_error_token();
                None
            }
            kind => {
                self.error_at_token(ParseErrorKind::UnexpectedToken { got: kind.describe() }, &token);
                self.synchronize();
                None
            }
        }
    }

    /// Parses `[name = value, …]` flags after a scene or function name.
    fn parse_flags(&mut self) -> Vec<Flag> {
        let mut flags: Vec<Flag> = Vec::new();
        if !self.is_next(TokenKind::OpenBrack) {
            return flags;
        }
        self.advance();
        loop {
            self.skip_newlines();
            if self.is_next(TokenKind::CloseBrack) {
                break;
            }
            let Some(name) = self.ensure_token(TokenKind::Identifier) else {
                self.synchronize();
                break;
            };
            self.ensure_token(TokenKind::Equals);
            let value = self.parse_expression();
            let key = if self.is_next(TokenKind::Equals) {
                self.advance();
                Some(self.parse_expression())
            } else {
                None
            };
            if flags.iter().any(|f| f.name == name.content) {
                self.error_at_token(ParseErrorKind::DuplicateFlagName, &name);
            }
            flags.push(Flag {
                name: name.content.clone(),
                token: name,
                value,
                key,
            });
            self.skip_newlines();
            if self.is_next(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.ensure_token(TokenKind::CloseBrack);
        flags
    }

    fn parse_function_params(&mut self) -> Vec<String> {
        let mut params = Vec::new();
        if self.ensure_token(TokenKind::OpenParen).is_none() {
            return params;
        }
        self.skip_newlines();
        if self.is_next(TokenKind::CloseParen) {
            self.advance();
            return params;
        }
        loop {
            if let Some(name) = self.ensure_token(TokenKind::Identifier) {
                params.push(name.content);
            }
            self.skip_newlines();
            if self.is_next(TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.ensure_token(TokenKind::CloseParen);
        params
    }

    // ----- Definitions -----

    fn parse_definition_block(&mut self) -> Vec<Node> {
        let mut children = Vec::new();
        self.ensure_token(TokenKind::OpenCurly);
        self.skip_newlines();
        while self.is_more() && !self.is_next(TokenKind::CloseCurly) {
            if let Some(node) = self.parse_definition_statement() {
                children.push(node);
            }
            self.skip_terminators();
        }
        self.ensure_token(TokenKind::CloseCurly);
        children
    }

    fn parse_definition_statement(&mut self) -> Option<Node> {
        let token = self.peek()?.clone();
        match token.kind {
            TokenKind::Identifier => {
                self.advance();
                self.skip_newlines();
                self.ensure_token(TokenKind::Equals)?;
                let value =
                    self.ensure_either(TokenKind::String, TokenKind::ExcludeString)?;
                let exprs = self.parse_interpolation(&value);
                Some(Node::Definition {
                    key: token.content,
                    value: value.content.clone(),
                    exclude_value_translation: value.kind == TokenKind::ExcludeString,
                    string_data: value.string_data,
                    exprs,
                })
            }
            TokenKind::MarkedComment => {
                self.advance();
                Some(Node::MarkedComment {
                    text: token.content,
                })
            }
            kind if kind.is_error() => {
                self.consume_error_token();
                None
            }
            kind => {
                self.error_at_token(ParseErrorKind::UnexpectedToken { got: kind.describe() }, &token);
                self.synchronize();
                None
            }
        }
    }

    // ----- Scene scope -----

    fn parse_scene_body(&mut self) -> Vec<Node> {
        let mut children = Vec::new();
        self.ensure_token(TokenKind::OpenCurly);
        self.skip_newlines();
        while self.is_more() && !self.is_next(TokenKind::CloseCurly) {
            if let Some(node) = self.parse_scene_statement(None) {
                children.push(node);
            }
            self.skip_newlines();
        }
        self.ensure_token(TokenKind::CloseCurly);
        children
    }

    fn parse_scene_statement(&mut self, modifier: Option<KeywordKind>) -> Option<Node> {
        self.skip_terminators();
        let token = self.peek()?.clone();
        if matches!(token.kind, TokenKind::CloseCurly) {
            return None;
        }

        if token.kind == TokenKind::VariableStart {
            return self.parse_variable_statement(modifier);
        }

        if modifier.is_some() {
            self.error_at_token(
                ParseErrorKind::UnexpectedModifierFor {
                    construct: token.kind.describe(),
                },
                &token,
            );
        }

        match token.kind {
            TokenKind::Identifier => {
                self.advance();
                if self.is_next(TokenKind::Colon) {
                    self.advance();
                    self.skip_newlines();
                    let stmt = self.parse_scene_statement(None).unwrap_or(Node::None);
                    Some(Node::ShorthandChar {
                        token,
                        exprs: Vec::new(),
                        stmt: Box::new(stmt),
                    })
                } else {
                    let args = self.parse_call_args();
                    Some(Node::SceneFunction {
                        name: token.content,
                        args,
                    })
                }
            }
            TokenKind::String | TokenKind::ExcludeString | TokenKind::MarkedString => {
                self.advance();
                if self.is_next(TokenKind::Colon) {
                    self.advance();
                    self.skip_newlines();
                    let exprs = self.parse_interpolation(&token);
                    let stmt = self.parse_scene_statement(None).unwrap_or(Node::None);
                    Some(Node::ShorthandChar {
                        token,
                        exprs,
                        stmt: Box::new(stmt),
                    })
                } else {
                    if token.kind == TokenKind::MarkedString {
                        self.error_at_token(ParseErrorKind::UnexpectedMarkedString, &token);
                    }
                    let exprs = self.parse_interpolation(&token);
                    Some(Node::TextRun {
                        text: token.content.clone(),
                        exclude_translation: token.kind == TokenKind::ExcludeString,
                        string_data: token.string_data,
                        exprs,
                    })
                }
            }
            TokenKind::MainKeyword(keyword) => self.parse_main_statement(keyword, token),
            TokenKind::Increment | TokenKind::Decrement => {
                self.advance();
                self.ensure_token(TokenKind::VariableStart)?;
                let var = self.parse_variable()?;
                let target = Box::new(var);
                Some(if token.kind == TokenKind::Increment {
                    Node::Increment { target }
                } else {
                    Node::Decrement { target }
                })
            }
            TokenKind::ModifierKeyword(kind) => {
                self.advance();
                self.skip_newlines();
                self.parse_scene_statement(Some(kind))
            }
            TokenKind::MarkedComment => {
                self.advance();
                Some(Node::MarkedComment {
                    text: token.content,
                })
            }
            TokenKind::OpenCurly => Some(Node::SceneBlock {
                children: self.parse_scene_body(),
            }),
            kind if kind.is_error() => {
                self.consume_error_token();
                None
            }
            kind => {
                self.error_at_token(ParseErrorKind::UnexpectedToken { got: kind.describe() }, &token);
                self.synchronize();
                None
            }
        }
    }

    fn parse_main_statement(&mut self, keyword: KeywordKind, token: Token) -> Option<Node> {
        match keyword {
            KeywordKind::If => {
                self.advance();
                let condition = self.parse_expression();
                self.skip_newlines();
                let then_branch = self.parse_scene_statement(None).unwrap_or(Node::None);
                self.store_position();
                self.skip_newlines();
                let else_branch = if self.is_next(TokenKind::MainKeyword(KeywordKind::Else)) {
                    self.advance();
                    self.skip_newlines();
                    Some(Box::new(
                        self.parse_scene_statement(None).unwrap_or(Node::None),
                    ))
                } else {
                    self.restore_position();
                    None
                };
                Some(Node::If {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch,
                })
            }
            KeywordKind::While => {
                self.advance();
                let condition = self.parse_expression();
                self.skip_newlines();
                let body = self.parse_scene_statement(None).unwrap_or(Node::None);
                Some(Node::While {
                    condition: Box::new(condition),
                    body: Box::new(body),
                })
            }
            KeywordKind::For => {
                self.advance();
                self.ensure_token(TokenKind::OpenParen);
                self.skip_newlines();
                let init = self.parse_scene_statement(None).unwrap_or(Node::None);
                self.skip_newlines();
                self.ensure_token(TokenKind::Semicolon);
                let condition = self.parse_expression();
                self.skip_newlines();
                self.ensure_token(TokenKind::Semicolon);
                self.skip_newlines();
                let step = self.parse_scene_statement(None).unwrap_or(Node::None);
                self.skip_newlines();
                self.ensure_token(TokenKind::CloseParen);
                self.skip_newlines();
                let body = self.parse_scene_statement(None).unwrap_or(Node::None);
                Some(Node::For {
                    init: Box::new(init),
                    condition: Box::new(condition),
                    step: Box::new(step),
                    body: Box::new(body),
                })
            }
            KeywordKind::Do => {
                self.advance();
                self.skip_newlines();
                let body = self.parse_scene_statement(None).unwrap_or(Node::None);
                self.skip_newlines();
                self.ensure_token(TokenKind::MainKeyword(KeywordKind::While));
                let condition = self.parse_expression();
                Some(Node::Do {
                    body: Box::new(body),
                    condition: Box::new(condition),
                })
            }
            KeywordKind::Repeat => {
                self.advance();
                let count = self.parse_expression();
                self.skip_newlines();
                let body = self.parse_scene_statement(None).unwrap_or(Node::None);
                Some(Node::Repeat {
                    count: Box::new(count),
                    body: Box::new(body),
                })
            }
            KeywordKind::Switch => self.parse_switch(token),
            KeywordKind::Choice => self.parse_choice(token),
            KeywordKind::Choose => self.parse_choose(token),
            KeywordKind::Sequence => self.parse_sequence(),
            KeywordKind::Continue => {
                self.advance();
                Some(Node::Continue { token })
            }
            KeywordKind::Break => {
                self.advance();
                Some(Node::Break { token })
            }
            KeywordKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(Box::new(self.parse_expression()))
                };
                Some(Node::Return { value })
            }
            KeywordKind::Case => {
                self.error_at_token(ParseErrorKind::UnexpectedSwitchCase, &token);
                self.synchronize();
                None
            }
            KeywordKind::Default => {
                self.error_at_token(ParseErrorKind::UnexpectedSwitchDefault, &token);
                self.synchronize();
                None
            }
            _ => {
                self.error_at_token(
                    ParseErrorKind::UnexpectedToken {
                        got: token.kind.describe(),
                    },
                    &token,
                );
                self.synchronize();
                None
            }
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            None | Some(TokenKind::Newline | TokenKind::Semicolon | TokenKind::CloseCurly)
        )
    }

    fn parse_variable_statement(&mut self, modifier: Option<KeywordKind>) -> Option<Node> {
        let dollar = self.take();
        let var = self.parse_variable()?;

        let op_kind = self.peek_kind();
        match op_kind {
            Some(
                TokenKind::Equals
                | TokenKind::PlusEquals
                | TokenKind::MinusEquals
                | TokenKind::MultiplyEquals
                | TokenKind::DivideEquals
                | TokenKind::ModEquals
                | TokenKind::BitwiseAndEquals
                | TokenKind::BitwiseOrEquals
                | TokenKind::BitwiseXorEquals,
            ) => {
                let op = self.take();
                let value = self.parse_expression();
                Some(Node::Assign {
                    op,
                    modifier,
                    target: Box::new(var),
                    value: Some(Box::new(value)),
                })
            }
            Some(TokenKind::Increment) => {
                self.advance();
                Some(Node::Increment {
                    target: Box::new(var),
                })
            }
            Some(TokenKind::Decrement) => {
                self.advance();
                Some(Node::Decrement {
                    target: Box::new(var),
                })
            }
            _ => Some(Node::Assign {
                // Declaration without a value; only registers the local.
                op: Token::new(TokenKind::Semicolon, dollar.line, dollar.column),
                modifier,
                target: Box::new(var),
                value: None,
            }),
        }
    }

    fn parse_variable(&mut self) -> Option<Node> {
        let name = self.ensure_token(TokenKind::Identifier)?;
        let mut indexes = Vec::new();
        while self.is_next(TokenKind::OpenBrack) {
            self.advance();
            indexes.push(self.parse_expression());
            self.skip_newlines();
            self.ensure_token(TokenKind::CloseBrack);
        }
        Some(Node::Variable {
            name: name.content,
            indexes,
        })
    }

    // ----- Switch -----

    fn parse_switch(&mut self, token: Token) -> Option<Node> {
        self.advance();
        let selector = self.parse_expression();
        self.skip_newlines();
        self.ensure_token(TokenKind::OpenCurly)?;
        self.skip_newlines();

        // A `case` label anywhere (or a leading `default:`) selects the
        // classic fall-through form; bare value labels select the simple
        // form.
        let classic = self.is_next(TokenKind::MainKeyword(KeywordKind::Default))
            || self.body_contains_case_label();
        if classic {
            let mut children = Vec::new();
            while self.is_more() && !self.is_next(TokenKind::CloseCurly) {
                match self.peek_kind() {
                    Some(TokenKind::MainKeyword(KeywordKind::Case)) => {
                        self.advance();
                        let value = self.parse_expression();
                        self.skip_newlines();
                        self.ensure_token(TokenKind::Colon);
                        children.push(Node::SwitchCase {
                            value: Box::new(value),
                        });
                    }
                    Some(TokenKind::MainKeyword(KeywordKind::Default)) => {
                        self.advance();
                        self.skip_newlines();
                        self.ensure_token(TokenKind::Colon);
                        children.push(Node::SwitchDefault);
                    }
                    _ => {
                        if let Some(stmt) = self.parse_scene_statement(None) {
                            children.push(stmt);
                        }
                    }
                }
                self.skip_terminators();
            }
            self.ensure_token(TokenKind::CloseCurly);
            Some(Node::Switch {
                token,
                selector: Box::new(selector),
                children,
            })
        } else {
            let mut arms = Vec::new();
            while self.is_more() && !self.is_next(TokenKind::CloseCurly) {
                let label = if self.is_next(TokenKind::MainKeyword(KeywordKind::Default)) {
                    self.advance();
                    Node::SwitchDefault
                } else {
                    self.parse_case_value()
                };
                self.skip_newlines();
                self.ensure_token(TokenKind::Colon);
                self.skip_newlines();
                let stmt = self.parse_scene_statement(None).unwrap_or(Node::None);
                arms.push((label, stmt));
                self.skip_terminators();
            }
            self.ensure_token(TokenKind::CloseCurly);
            Some(Node::SwitchSimple {
                selector: Box::new(selector),
                arms,
            })
        }
    }

    /// Looks ahead (without consuming) for a `case` label before the
    /// matching close brace, distinguishing the two switch forms.
    fn body_contains_case_label(&self) -> bool {
        let mut depth = 0usize;
        for token in &self.tokens[self.position..] {
            match token.kind {
                TokenKind::OpenCurly => depth += 1,
                TokenKind::CloseCurly => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                TokenKind::MainKeyword(KeywordKind::Case) if depth == 0 => return true,
                _ => {}
            }
        }
        false
    }

    /// Parses a case label: a constant expression or a `low..high` range.
    fn parse_case_value(&mut self) -> Node {
        let low = self.parse_expression();
        if self.is_next(TokenKind::Range) {
            self.advance();
            let high = self.parse_expression();
            Node::ExprRange {
                low: Box::new(low),
                high: Box::new(high),
            }
        } else {
            low
        }
    }

    // ----- Choice / choose -----

    fn parse_choice(&mut self, token: Token) -> Option<Node> {
        self.advance();
        self.skip_newlines();
        self.ensure_token(TokenKind::OpenCurly)?;

        let mut pre = Node::None;
        let mut entries: Vec<ChoiceEntry> = Vec::new();
        loop {
            self.skip_terminators();
            if !self.is_more() || self.is_next(TokenKind::CloseCurly) {
                break;
            }
            if self.at_choice_entry() {
                if let Some(entry) = self.parse_choice_entry() {
                    entries.push(entry);
                }
            } else if entries.is_empty() && pre.is_none() {
                pre = self.parse_scene_statement(None).unwrap_or(Node::None);
            } else {
                let got = self.peek_kind().map_or("<eof>", TokenKind::describe);
                let (line, column) = self
                    .peek()
                    .map(|t| (t.line, t.column))
                    .unwrap_or((0, 0));
                self.error(ParseErrorKind::UnexpectedToken { got }, line, column);
                self.synchronize();
            }
        }
        self.ensure_token(TokenKind::CloseCurly);

        if entries.is_empty() {
            self.error_at_token(ParseErrorKind::ChoiceWithoutStatement, &token);
        }
        Some(Node::Choice {
            pre: Box::new(pre),
            entries,
        })
    }

    /// A string literal begins a choice entry when the next meaningful
    /// token is `:` or a `chance`/`require` clause.
    fn at_choice_entry(&self) -> bool {
        let Some(token) = self.peek() else {
            return false;
        };
        if !token.kind.is_string_literal() {
            return false;
        }
        for next in &self.tokens[self.position + 1..] {
            match next.kind {
                TokenKind::Newline => continue,
                TokenKind::Colon | TokenKind::MainSubKeyword(_) => return true,
                _ => return false,
            }
        }
        false
    }

    fn parse_choice_entry(&mut self) -> Option<ChoiceEntry> {
        let text_token = self.take();
        let exprs = self.parse_interpolation(&text_token);
        let text = Node::ChoiceText {
            text: text_token.content.clone(),
            exclude_translation: text_token.kind == TokenKind::ExcludeString,
            string_data: text_token.string_data,
            exprs,
        };

        let (chance, require) = self.parse_chance_require(&text_token);
        self.skip_newlines();
        self.ensure_token(TokenKind::Colon)?;
        self.skip_newlines();
        let body = self.parse_scene_statement(None).unwrap_or(Node::None);
        Some(ChoiceEntry {
            text,
            chance,
            require,
            body,
        })
    }

    fn parse_chance_require(&mut self, position: &Token) -> (Node, Option<Node>) {
        let mut chance = None;
        let mut require = None;
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenKind::MainSubKeyword(KeywordKind::Chance)) if chance.is_none() => {
                    self.advance();
                    chance = Some(self.parse_expression());
                }
                Some(TokenKind::MainSubKeyword(KeywordKind::Require)) if require.is_none() => {
                    self.advance();
                    require = Some(self.parse_expression());
                }
                _ => break,
            }
        }
        let chance = chance.unwrap_or_else(|| Node::ExprConstant {
            token: Token::with_content(TokenKind::Number, position.line, position.column, "1"),
            exprs: Vec::new(),
        });
        (chance, require)
    }

    fn parse_choose(&mut self, token: Token) -> Option<Node> {
        self.advance();
        self.skip_newlines();
        self.ensure_token(TokenKind::OpenCurly)?;

        let mut entries: Vec<ChooseEntry> = Vec::new();
        loop {
            self.skip_terminators();
            if !self.is_more() || self.is_next(TokenKind::CloseCurly) {
                break;
            }
            let body;
            let mut chance = None;
            let mut require = None;
            if matches!(self.peek_kind(), Some(TokenKind::MainSubKeyword(_))) {
                let marker = self.peek().cloned();
                let (c, r) = self.parse_chance_require(marker.as_ref().unwrap_or(&token));
                chance = Some(c);
                require = r;
                self.skip_newlines();
                self.ensure_token(TokenKind::Colon);
                self.skip_newlines();
                body = self.parse_scene_statement(None).unwrap_or(Node::None);
            } else {
                body = match self.parse_scene_statement(None) {
                    Some(stmt) => stmt,
                    None => continue,
                };
            }
            let chance = chance.unwrap_or_else(|| Node::ExprConstant {
                token: Token::with_content(TokenKind::Number, token.line, token.column, "1"),
                exprs: Vec::new(),
            });
            entries.push(ChooseEntry {
                chance,
                require,
                body,
            });
        }
        self.ensure_token(TokenKind::CloseCurly);

        if entries.is_empty() {
            self.error_at_token(ParseErrorKind::ChooseWithoutStatement, &token);
        }
        Some(Node::Choose { entries })
    }

    // ----- Sequence -----

    fn parse_sequence(&mut self) -> Option<Node> {
        self.advance();
        self.skip_newlines();
        self.ensure_token(TokenKind::VariableStart)?;
        let var = self.parse_variable()?;
        self.skip_newlines();
        self.ensure_token(TokenKind::OpenCurly)?;

        let mut pairs = Vec::new();
        loop {
            self.skip_terminators();
            if !self.is_more() || self.is_next(TokenKind::CloseCurly) {
                break;
            }
            let mut cases = vec![self.parse_case_value()];
            while self.is_next(TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
                cases.push(self.parse_case_value());
            }
            self.skip_newlines();
            self.ensure_token(TokenKind::Colon);
            self.skip_newlines();
            let stmt = self.parse_scene_statement(None).unwrap_or(Node::None);
            for case in cases {
                pairs.push((case, stmt.clone()));
            }
        }
        self.ensure_token(TokenKind::CloseCurly);
        Some(Node::Sequence {
            var: Box::new(var),
            pairs,
        })
    }

    // ----- Expressions -----

    fn parse_expression(&mut self) -> Node {
        self.skip_newlines();
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Node {
        let condition = self.parse_or();
        if self.is_next(TokenKind::Ternary) {
            self.advance();
            let then_value = self.parse_expression();
            self.skip_newlines();
            self.ensure_token(TokenKind::Colon);
            let else_value = self.parse_expression();
            return Node::ExprTernary {
                condition: Box::new(condition),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
            };
        }
        condition
    }

    fn parse_binary_level(
        &mut self,
        ops: &[TokenKind],
        next: fn(&mut Self) -> Node,
    ) -> Node {
        let mut left = next(self);
        if !matches!(self.peek_kind(), Some(kind) if ops.contains(&kind)) {
            return left;
        }
        loop {
            let op = self.take();
            let right = next(self);
            left = Node::ExprBinary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            // Further operators at this level may continue on the next line.
            self.skip_newlines();
            if !matches!(self.peek_kind(), Some(kind) if ops.contains(&kind)) {
                break;
            }
        }
        left
    }

    fn parse_or(&mut self) -> Node {
        self.parse_binary_level(&[TokenKind::LogicalOr], Self::parse_and)
    }

    fn parse_and(&mut self) -> Node {
        self.parse_binary_level(&[TokenKind::LogicalAnd], Self::parse_compare)
    }

    fn parse_compare(&mut self) -> Node {
        self.parse_binary_level(
            &[
                TokenKind::CompareEq,
                TokenKind::CompareNeq,
                TokenKind::CompareLt,
                TokenKind::CompareLte,
                TokenKind::CompareGt,
                TokenKind::CompareGte,
            ],
            Self::parse_bitwise,
        )
    }

    fn parse_bitwise(&mut self) -> Node {
        self.parse_binary_level(
            &[
                TokenKind::BitwiseOr,
                TokenKind::BitwiseAnd,
                TokenKind::BitwiseXor,
            ],
            Self::parse_bit_shift,
        )
    }

    fn parse_bit_shift(&mut self) -> Node {
        self.parse_binary_level(
            &[TokenKind::BitwiseLShift, TokenKind::BitwiseRShift],
            Self::parse_add_sub,
        )
    }

    fn parse_add_sub(&mut self) -> Node {
        self.parse_binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::parse_mul_div)
    }

    fn parse_mul_div(&mut self) -> Node {
        self.parse_binary_level(
            &[
                TokenKind::Multiply,
                TokenKind::Divide,
                TokenKind::Mod,
                TokenKind::Power,
            ],
            Self::parse_primary,
        )
    }

    fn parse_primary(&mut self) -> Node {
        self.skip_newlines();
        let Some(token) = self.peek().cloned() else {
            self.error(ParseErrorKind::UnexpectedEof, 0, 0);
            return Node::None;
        };

        match token.kind {
            TokenKind::Number | TokenKind::Percentage | TokenKind::Undefined => {
                self.advance();
                Node::ExprConstant {
                    token,
                    exprs: Vec::new(),
                }
            }
            TokenKind::String | TokenKind::MarkedString | TokenKind::ExcludeString => {
                self.advance();
                let exprs = self.parse_interpolation(&token);
                Node::ExprConstant { token, exprs }
            }
            TokenKind::VariableStart => {
                self.advance();
                let Some(var) = self.parse_variable() else {
                    return Node::None;
                };
                match self.peek_kind() {
                    Some(TokenKind::Increment) => {
                        self.advance();
                        Node::ExprPostIncrement {
                            target: Box::new(var),
                        }
                    }
                    Some(TokenKind::Decrement) => {
                        self.advance();
                        Node::ExprPostDecrement {
                            target: Box::new(var),
                        }
                    }
                    _ => var,
                }
            }
            TokenKind::Not => {
                self.advance();
                self.skip_newlines();
                Node::ExprNot(Box::new(self.parse_primary()))
            }
            TokenKind::Minus => {
                self.advance();
                self.skip_newlines();
                Node::ExprNegate(Box::new(self.parse_primary()))
            }
            TokenKind::BitwiseNegate => {
                self.advance();
                self.skip_newlines();
                Node::ExprBitwiseNegate(Box::new(self.parse_primary()))
            }
            TokenKind::OpenParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.parse_expression();
                self.skip_newlines();
                self.ensure_token(TokenKind::CloseParen);
                self.parse_postfix_subscripts(expr)
            }
            TokenKind::OpenBrack => {
                self.advance();
                self.skip_newlines();
                let mut items = Vec::new();
                if !self.is_next(TokenKind::CloseBrack) {
                    loop {
                        items.push(self.parse_expression());
                        self.skip_newlines();
                        if self.is_next(TokenKind::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.ensure_token(TokenKind::CloseBrack);
                self.parse_postfix_subscripts(Node::ExprArray { items })
            }
            TokenKind::Increment | TokenKind::Decrement => {
                self.advance();
                self.skip_newlines();
                if self.ensure_token(TokenKind::VariableStart).is_none() {
                    return Node::None;
                }
                let Some(var) = self.parse_variable() else {
                    return Node::None;
                };
                let target = Box::new(var);
                if token.kind == TokenKind::Increment {
                    Node::ExprPreIncrement { target }
                } else {
                    Node::ExprPreDecrement { target }
                }
            }
            TokenKind::Identifier => {
                self.advance();
                let args = self.parse_call_args();
                self.parse_postfix_subscripts(Node::SceneFunction {
                    name: token.content,
                    args,
                })
            }
            kind if kind.is_error() => {
                self.consume_error_token();
                Node::None
            }
            kind => {
                self.error_at_token(ParseErrorKind::UnexpectedToken { got: kind.describe() }, &token);
                Node::None
            }
        }
    }

    fn parse_postfix_subscripts(&mut self, base: Node) -> Node {
        let mut indexes = Vec::new();
        while self.is_next(TokenKind::OpenBrack) {
            self.advance();
            indexes.push(self.parse_expression());
            self.skip_newlines();
            self.ensure_token(TokenKind::CloseBrack);
        }
        if indexes.is_empty() {
            base
        } else {
            Node::ExprAccessArray {
                base: Box::new(base),
                indexes,
            }
        }
    }

    fn parse_call_args(&mut self) -> Vec<Node> {
        let mut args = Vec::new();
        if self.ensure_token(TokenKind::OpenParen).is_none() {
            return args;
        }
        self.skip_newlines();
        if self.is_next(TokenKind::CloseParen) {
            self.advance();
            return args;
        }
        loop {
            args.push(self.parse_expression());
            self.skip_newlines();
            if self.is_next(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.ensure_token(TokenKind::CloseParen);
        args
    }

    // ----- Interpolation -----

    /// Extracts `${…}` expressions from a string literal's content.
    fn parse_interpolation(&mut self, token: &Token) -> Vec<Node> {
        if !self.interpolation || !token.content.contains("${") {
            return Vec::new();
        }
        let bytes = token.content.as_bytes();
        let mut exprs = Vec::new();
        let mut i = 0;
        while i + 1 < bytes.len() {
            if bytes[i] == b'$' && bytes[i + 1] == b'{' {
                let start = i + 2;
                let mut depth = 1;
                let mut j = start;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                let inner_end = if depth == 0 { j - 1 } else { bytes.len() };
                let inner = &token.content[start..inner_end];

                let mut fragment_tokens = Vec::new();
                lexer::lex_fragment(inner, token.line, token.column, &mut fragment_tokens);
                let mut sub = Parser::new(&fragment_tokens, self.interpolation);
                let expr = sub.parse_expression();
                self.errors.append(&mut sub.errors);
                exprs.push(expr);
                i = j;
            } else {
                i += 1;
            }
        }
        exprs
    }
}
