//! Recursive descent parser for PowerShell-style scripts
//!
//! The whole source is lexed up front so the parser can look ahead freely and backtrack
//! when an attribute list turns out not to precede a `param()` block.

use psyringe_core::ast::{
    AssignmentOperator, BinaryOperator, BlockKind, InvocationOperator, Node, NodeId, Span,
    StringKind, SyntaxTree, TypeName, UnaryOperator, UsingKind,
};
use tracing::{debug, trace};

use crate::error::ParseError;
use crate::lexer::{Lexer, Token};

pub type ParseResult<T> = Result<T, ParseError>;

/// Number of binary precedence levels, loosest first
const BINARY_LEVELS: usize = 7;

fn precedence(operator: BinaryOperator) -> usize {
    use BinaryOperator::*;
    match operator {
        And | Or | Xor => 0,
        BitwiseAnd | BitwiseOr | BitwiseXor => 1,
        Equal | NotEqual | Greater | GreaterOrEqual | Less | LessOrEqual | Like | NotLike
        | Match | NotMatch | Contains | NotContains | In | NotIn | Replace | Is | IsNot | As
        | Join | Split => 2,
        Add | Subtract => 3,
        Multiply | Divide | Remainder => 4,
        Format => 5,
        Range => 6,
    }
}

/// Tokens that may continue a bare word when written without whitespace
fn is_bareword_part(token: &Token<'_>) -> bool {
    matches!(
        token,
        Token::Word(_)
            | Token::Number(_)
            | Token::Dot
            | Token::DotDot
            | Token::Colon
            | Token::Backslash
            | Token::Slash
            | Token::Minus
            | Token::DashWord(_)
            | Token::Star
    )
}

fn is_expandable(raw: &str) -> bool {
    raw.contains('$') || raw.contains('`')
}

/// Token that closes a statement list or bracketed construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    Eof,
    Brace,
    Paren,
    Bracket,
}

impl Closer {
    fn is_at(self, token: Option<&Token<'_>>) -> bool {
        match self {
            Closer::Eof => token.is_none(),
            Closer::Brace => matches!(token, Some(Token::RBrace)),
            Closer::Paren => matches!(token, Some(Token::RParen)),
            Closer::Bracket => matches!(token, Some(Token::RBracket)),
        }
    }
}

/// Contents of a `[...]` prefix
enum BracketHead {
    Type(TypeName),
    Attribute(NodeId),
}

pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token<'a>, Span)>,
    pos: usize,
    tree: SyntaxTree,
    /// Current parsing depth to prevent stack overflow
    depth: usize,
    /// Maximum allowed parsing depth
    max_depth: usize,
    /// Whether statement errors become `Error` nodes instead of failing the parse
    recover: bool,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    /// Default maximum parsing depth
    const DEFAULT_MAX_DEPTH: usize = 128;

    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            pos: 0,
            tree: SyntaxTree::new(),
            depth: 0,
            max_depth: Self::DEFAULT_MAX_DEPTH,
            recover: false,
            errors: Vec::new(),
        }
    }

    /// Set the maximum parsing depth
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Parses the whole source, failing on the first error
    pub fn parse(&mut self) -> ParseResult<SyntaxTree> {
        self.tokens = Lexer::new(self.source).tokenize()?;
        self.recover = false;
        self.parse_root()
    }

    /// Parses the whole source, turning statements that fail to parse into `Error` nodes.
    ///
    /// Always returns a tree; the second element lists every error encountered.
    pub fn parse_recovering(&mut self) -> (SyntaxTree, Vec<ParseError>) {
        let (tokens, mut errors) = Lexer::new(self.source).tokenize_lossy();
        self.tokens = tokens;
        self.recover = true;
        self.errors.clear();

        let tree = match self.parse_root() {
            Ok(tree) => tree,
            Err(err) => {
                self.errors.push(err);
                std::mem::take(&mut self.tree)
            }
        };
        errors.append(&mut self.errors);
        (tree, errors)
    }

    fn parse_root(&mut self) -> ParseResult<SyntaxTree> {
        self.pos = 0;
        self.depth = 0;
        self.tree = SyntaxTree::new();

        let root = self.parse_script_block(Closer::Eof)?;
        self.tree.set_root(root);
        debug!(
            tokens = self.tokens.len(),
            nodes = self.tree.len(),
            "parsed script"
        );
        Ok(std::mem::take(&mut self.tree))
    }

    /// Check and increment depth, returning error if max depth exceeded
    fn enter_recursion(&mut self) -> ParseResult<()> {
        if self.depth >= self.max_depth {
            return Err(ParseError::MaxDepthExceeded {
                depth: self.depth,
                max_depth: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Decrement depth when leaving a recursive call
    fn exit_recursion(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ===== Token helpers =====

    fn peek(&self) -> Option<&Token<'a>> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token<'a>> {
        self.tokens.get(self.pos + n).map(|(token, _)| token)
    }

    /// First token after the current one that is not a newline
    fn next_significant(&self) -> Option<&Token<'a>> {
        self.tokens[self.pos.min(self.tokens.len())..]
            .iter()
            .skip(1)
            .map(|(token, _)| token)
            .find(|token| !matches!(token, Token::Newline))
    }

    fn eat(&mut self, expected: &Token<'a>) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token<'a>) -> ParseResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.unexpected(&expected.describe()))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some((token, span)) => ParseError::UnexpectedToken {
                position: span.start,
                expected: expected.to_string(),
                found: token.describe(),
            },
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
            },
        }
    }

    fn invalid(&self, position: usize, message: &str) -> ParseError {
        ParseError::InvalidSyntax {
            position,
            message: message.to_string(),
        }
    }

    fn current_start(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.source.len())
    }

    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, span)| span.end)
            .unwrap_or(0)
    }

    /// Whether the token at `index` directly follows the one before it
    fn is_adjacent_at(&self, index: usize) -> bool {
        match (index.checked_sub(1), self.tokens.get(index)) {
            (Some(prev), Some((_, span))) => self
                .tokens
                .get(prev)
                .is_some_and(|(_, prev_span)| prev_span.end == span.start),
            _ => false,
        }
    }

    fn is_adjacent(&self) -> bool {
        self.is_adjacent_at(self.pos)
    }

    fn at_word(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn peek_keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Word(word)) => Some(word.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::Newline | Token::Semicolon | Token::RBrace | Token::RParen)
        )
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::Newline)) {
            self.pos += 1;
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), Some(Token::Newline | Token::Semicolon)) {
            self.pos += 1;
        }
    }

    /// Adds a node spanning from `start` to the end of the last consumed token
    fn add(&mut self, node: Node, start: usize) -> ParseResult<NodeId> {
        let end = self.prev_end().max(start);
        Ok(self.tree.add_node_with_span(node, Span::new(start, end))?)
    }

    // ===== Script structure =====

    fn parse_script_block(&mut self, closer: Closer) -> ParseResult<NodeId> {
        let start = self.current_start();
        self.skip_terminators();

        let mut usings = Vec::new();
        if closer == Closer::Eof {
            while self.at_using_statement() {
                usings.push(self.parse_using_statement()?);
                self.skip_terminators();
            }
        }

        let param_block = self.try_parse_param_block()?;
        self.skip_terminators();

        let mut blocks = Vec::new();
        if self.at_named_block() {
            while self.at_named_block() {
                blocks.push(self.parse_named_block()?);
                self.skip_terminators();
            }
            if !closer.is_at(self.peek()) {
                return Err(self.unexpected("named block"));
            }
        } else {
            let block_start = self.current_start();
            let statements = self.parse_statement_list(closer)?;
            if !statements.is_empty() {
                let (traps, statements) = self.partition_traps(statements);
                blocks.push(self.add(
                    Node::NamedBlock {
                        kind: BlockKind::End,
                        unnamed: true,
                        statements,
                        traps,
                    },
                    block_start,
                )?);
            }
        }

        self.add(
            Node::ScriptBlock {
                usings,
                param_block,
                blocks,
            },
            start,
        )
    }

    fn partition_traps(&self, statements: Vec<NodeId>) -> (Vec<NodeId>, Vec<NodeId>) {
        statements
            .into_iter()
            .partition(|id| matches!(self.tree.get_node(*id), Some(Node::Trap { .. })))
    }

    fn at_using_statement(&self) -> bool {
        self.at_word("using")
            && matches!(
                self.peek_nth(1),
                Some(Token::Word(kind)) if ["namespace", "module", "assembly"]
                    .iter()
                    .any(|k| kind.eq_ignore_ascii_case(k))
            )
    }

    fn parse_using_statement(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        self.pos += 1;
        let kind = match self.peek_keyword().as_deref() {
            Some("namespace") => UsingKind::Namespace,
            Some("module") => UsingKind::Module,
            Some("assembly") => UsingKind::Assembly,
            _ => return Err(self.unexpected("'namespace', 'module' or 'assembly'")),
        };
        self.pos += 1;

        let name_start = self.current_start();
        let mut name_end = name_start;
        while let Some((token, span)) = self.tokens.get(self.pos) {
            if matches!(token, Token::Newline | Token::Semicolon) {
                break;
            }
            name_end = span.end;
            self.pos += 1;
        }
        if name_end == name_start {
            return Err(self.unexpected("using target name"));
        }

        let name = self.source[name_start..name_end].to_string();
        self.add(Node::UsingStatement { kind, name }, start)
    }

    fn at_named_block(&self) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if BlockKind::from_keyword(word).is_some())
            && matches!(self.next_significant(), Some(Token::LBrace))
    }

    fn parse_named_block(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let kind = match self.peek() {
            Some(Token::Word(word)) => BlockKind::from_keyword(word),
            _ => None,
        };
        let Some(kind) = kind else {
            return Err(self.unexpected("block name"));
        };
        self.pos += 1;
        self.skip_newlines();
        self.expect(Token::LBrace)?;
        let statements = self.parse_statement_list(Closer::Brace)?;
        self.expect(Token::RBrace)?;

        let (traps, statements) = self.partition_traps(statements);
        self.add(
            Node::NamedBlock {
                kind,
                unnamed: false,
                statements,
                traps,
            },
            start,
        )
    }

    /// Parses `[Attr()]... param(...)`, restoring the position if no param block follows
    fn try_parse_param_block(&mut self) -> ParseResult<Option<NodeId>> {
        let save = self.pos;
        let start = self.current_start();

        // Errors while speculating are not the script's errors
        let recover = std::mem::replace(&mut self.recover, false);
        let mut attributes = Vec::new();
        while matches!(self.peek(), Some(Token::LBracket)) {
            match self.parse_bracket_head() {
                Ok(BracketHead::Attribute(id)) => attributes.push(id),
                Ok(BracketHead::Type(_)) | Err(_) => {
                    self.recover = recover;
                    self.pos = save;
                    return Ok(None);
                }
            }
            self.skip_newlines();
        }
        self.recover = recover;

        if !(self.at_word("param") && matches!(self.next_significant(), Some(Token::LParen))) {
            self.pos = save;
            return Ok(None);
        }
        self.pos += 1;
        self.skip_newlines();
        self.expect(Token::LParen)?;
        let parameters = self.parse_parameter_list()?;

        self.add(
            Node::ParamBlock {
                attributes,
                parameters,
            },
            start,
        )
        .map(Some)
    }

    /// Parameters up to and including the closing parenthesis
    fn parse_parameter_list(&mut self) -> ParseResult<Vec<NodeId>> {
        let mut parameters = Vec::new();
        self.skip_newlines();
        if self.eat(&Token::RParen) {
            return Ok(parameters);
        }
        loop {
            self.skip_newlines();
            parameters.push(self.parse_parameter()?);
            self.skip_newlines();
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(parameters);
        }
    }

    fn parse_parameter(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let mut attributes = Vec::new();
        while matches!(self.peek(), Some(Token::LBracket)) {
            let attribute_start = self.current_start();
            let id = match self.parse_bracket_head()? {
                BracketHead::Attribute(id) => id,
                BracketHead::Type(type_name) => {
                    self.add(Node::TypeConstraint { type_name }, attribute_start)?
                }
            };
            attributes.push(id);
            self.skip_newlines();
        }

        if !matches!(self.peek(), Some(Token::Variable(_))) {
            return Err(self.unexpected("parameter variable"));
        }
        let name = self.parse_primary()?;

        let default_value = if self.eat(&Token::Assign) {
            self.skip_newlines();
            Some(self.parse_expression(false)?)
        } else {
            None
        };

        self.add(
            Node::Parameter {
                attributes,
                name,
                default_value,
            },
            start,
        )
    }

    // ===== Statements =====

    fn parse_statement_list(&mut self, closer: Closer) -> ParseResult<Vec<NodeId>> {
        let mut statements = Vec::new();
        loop {
            self.skip_terminators();
            if self.peek().is_none() || closer.is_at(self.peek()) {
                break;
            }

            let begin = self.pos;
            match self.parse_terminated_statement(closer) {
                Ok(id) => statements.push(id),
                Err(err) if self.recover && !matches!(err, ParseError::Tree(_)) => {
                    trace!(%err, "recovering from statement error");
                    self.errors.push(err);
                    self.pos = begin;
                    statements.push(self.parse_error_statement(closer)?);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(statements)
    }

    fn parse_terminated_statement(&mut self, closer: Closer) -> ParseResult<NodeId> {
        let id = self.parse_statement()?;
        let closed_by_brace = matches!(
            self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)),
            Some((Token::RBrace, _))
        );
        match self.peek() {
            None | Some(Token::Newline | Token::Semicolon) => Ok(id),
            token if closer.is_at(token) || closed_by_brace => Ok(id),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    /// Skips to the end of the broken statement and keeps its text as an `Error` node
    fn parse_error_statement(&mut self, closer: Closer) -> ParseResult<NodeId> {
        let start = self.current_start();
        let first = self.pos;
        let mut open: Vec<Closer> = Vec::new();

        while let Some(token) = self.peek() {
            match token {
                Token::Newline | Token::Semicolon if open.is_empty() => break,
                Token::LParen | Token::DollarParen | Token::AtParen => open.push(Closer::Paren),
                Token::LBrace | Token::AtBrace => open.push(Closer::Brace),
                Token::LBracket | Token::QuestionBracket => open.push(Closer::Bracket),
                Token::RParen | Token::RBrace | Token::RBracket => {
                    if open.last().is_some_and(|c| c.is_at(Some(token))) {
                        open.pop();
                    } else if closer.is_at(Some(token)) {
                        // Unbalanced closer of the enclosing block ends the statement
                        break;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        if self.pos == first && self.peek().is_some() {
            self.pos += 1;
        }
        while self.pos > first + 1
            && matches!(self.tokens.get(self.pos - 1), Some((Token::Newline, _)))
        {
            self.pos -= 1;
        }

        let end = self.prev_end().max(start);
        let text = self.source[start..end].to_string();
        self.add(Node::Error { text }, start)
    }

    fn parse_statement(&mut self) -> ParseResult<NodeId> {
        self.enter_recursion()?;
        let result = self.parse_statement_inner();
        self.exit_recursion();
        result
    }

    fn parse_statement_inner(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let label = self.parse_label();

        if let Some(keyword) = self.peek_keyword() {
            match keyword.as_str() {
                "while" => return self.parse_while(start, label),
                "do" => return self.parse_do(start, label),
                "for" => return self.parse_for(start, label),
                "foreach" if matches!(self.peek_nth(1), Some(Token::LParen)) => {
                    return self.parse_foreach(start, label)
                }
                _ => {}
            }
            if label.is_none() {
                match keyword.as_str() {
                    "function" | "filter" => return self.parse_function(start),
                    "if" => return self.parse_if(start),
                    "try" => return self.parse_try(start),
                    "trap" => return self.parse_trap(start),
                    "return" => {
                        self.pos += 1;
                        let pipeline = self.parse_optional_pipeline()?;
                        return self.add(Node::Return { pipeline }, start);
                    }
                    "throw" => {
                        self.pos += 1;
                        let pipeline = self.parse_optional_pipeline()?;
                        return self.add(Node::Throw { pipeline }, start);
                    }
                    "break" => {
                        self.pos += 1;
                        let label = self.parse_jump_label();
                        return self.add(Node::Break { label }, start);
                    }
                    "continue" => {
                        self.pos += 1;
                        let label = self.parse_jump_label();
                        return self.add(Node::Continue { label }, start);
                    }
                    _ => {}
                }
            }
        }

        if label.is_some() {
            return Err(self.invalid(start, "a label must be followed by a loop statement"));
        }
        self.parse_pipeline()
    }

    /// `:name` directly in front of a loop
    fn parse_label(&mut self) -> Option<String> {
        if !matches!(self.peek(), Some(Token::Colon)) || !self.is_adjacent_at(self.pos + 1) {
            return None;
        }
        match self.peek_nth(1) {
            Some(Token::Word(word)) => {
                let label = word.to_string();
                self.pos += 2;
                Some(label)
            }
            _ => None,
        }
    }

    fn parse_jump_label(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::Word(word)) => {
                let label = word.to_string();
                self.pos += 1;
                Some(label)
            }
            _ => None,
        }
    }

    fn parse_optional_pipeline(&mut self) -> ParseResult<Option<NodeId>> {
        if self.at_statement_end() {
            Ok(None)
        } else {
            self.parse_pipeline().map(Some)
        }
    }

    /// `( pipeline )`
    fn parse_condition(&mut self) -> ParseResult<NodeId> {
        self.skip_newlines();
        self.expect(Token::LParen)?;
        self.skip_newlines();
        let condition = self.parse_pipeline()?;
        self.skip_newlines();
        self.expect(Token::RParen)?;
        Ok(condition)
    }

    fn parse_statement_block(&mut self) -> ParseResult<NodeId> {
        self.skip_newlines();
        let start = self.current_start();
        self.expect(Token::LBrace)?;
        let statements = self.parse_statement_list(Closer::Brace)?;
        self.expect(Token::RBrace)?;
        self.add(Node::StatementBlock { statements }, start)
    }

    fn parse_if(&mut self, start: usize) -> ParseResult<NodeId> {
        self.pos += 1;
        let mut clauses = Vec::new();
        let mut else_body = None;

        loop {
            let condition = self.parse_condition()?;
            let body = self.parse_statement_block()?;
            clauses.push((condition, body));

            let save = self.pos;
            self.skip_newlines();
            if self.at_word("elseif") {
                self.pos += 1;
                continue;
            }
            if self.at_word("else") {
                self.pos += 1;
                else_body = Some(self.parse_statement_block()?);
                break;
            }
            self.pos = save;
            break;
        }

        self.add(Node::If { clauses, else_body }, start)
    }

    fn parse_while(&mut self, start: usize, label: Option<String>) -> ParseResult<NodeId> {
        self.pos += 1;
        let condition = self.parse_condition()?;
        let body = self.parse_statement_block()?;
        self.add(
            Node::While {
                label,
                condition,
                body,
            },
            start,
        )
    }

    fn parse_do(&mut self, start: usize, label: Option<String>) -> ParseResult<NodeId> {
        self.pos += 1;
        let body = self.parse_statement_block()?;
        self.skip_newlines();
        let is_while = if self.at_word("while") {
            true
        } else if self.at_word("until") {
            false
        } else {
            return Err(self.unexpected("'while' or 'until'"));
        };
        self.pos += 1;
        let condition = self.parse_condition()?;

        let node = if is_while {
            Node::DoWhile {
                label,
                body,
                condition,
            }
        } else {
            Node::DoUntil {
                label,
                body,
                condition,
            }
        };
        self.add(node, start)
    }

    fn parse_for(&mut self, start: usize, label: Option<String>) -> ParseResult<NodeId> {
        self.pos += 1;
        self.skip_newlines();
        self.expect(Token::LParen)?;

        self.skip_newlines();
        let initializer = self.parse_pipeline_unless(&Token::Semicolon)?;
        self.skip_newlines();
        self.expect(Token::Semicolon)?;

        self.skip_newlines();
        let condition = self.parse_pipeline_unless(&Token::Semicolon)?;
        self.skip_newlines();
        self.expect(Token::Semicolon)?;

        self.skip_newlines();
        let iterator = self.parse_pipeline_unless(&Token::RParen)?;
        self.skip_newlines();
        self.expect(Token::RParen)?;

        let body = self.parse_statement_block()?;
        self.add(
            Node::For {
                label,
                initializer,
                condition,
                iterator,
                body,
            },
            start,
        )
    }

    fn parse_pipeline_unless(&mut self, end: &Token<'a>) -> ParseResult<Option<NodeId>> {
        if self.peek() == Some(end) {
            Ok(None)
        } else {
            self.parse_pipeline().map(Some)
        }
    }

    fn parse_foreach(&mut self, start: usize, label: Option<String>) -> ParseResult<NodeId> {
        self.pos += 1;
        self.skip_newlines();
        self.expect(Token::LParen)?;
        self.skip_newlines();

        if !matches!(self.peek(), Some(Token::Variable(_))) {
            return Err(self.unexpected("loop variable"));
        }
        let variable = self.parse_primary()?;
        self.skip_newlines();
        if !self.at_word("in") {
            return Err(self.unexpected("'in'"));
        }
        self.pos += 1;
        self.skip_newlines();
        let iterable = self.parse_pipeline()?;
        self.skip_newlines();
        self.expect(Token::RParen)?;

        let body = self.parse_statement_block()?;
        self.add(
            Node::ForEach {
                label,
                variable,
                iterable,
                body,
            },
            start,
        )
    }

    fn parse_try(&mut self, start: usize) -> ParseResult<NodeId> {
        self.pos += 1;
        let body = self.parse_statement_block()?;
        let mut catches = Vec::new();
        let mut finally = None;

        loop {
            let save = self.pos;
            self.skip_newlines();
            if self.at_word("catch") {
                let catch_start = self.current_start();
                self.pos += 1;
                let mut types = Vec::new();
                while matches!(self.peek(), Some(Token::LBracket)) {
                    types.push(self.parse_type_constraint()?);
                    self.skip_newlines();
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                let catch_body = self.parse_statement_block()?;
                catches.push(self.add(
                    Node::CatchClause {
                        types,
                        body: catch_body,
                    },
                    catch_start,
                )?);
                continue;
            }
            if self.at_word("finally") {
                self.pos += 1;
                finally = Some(self.parse_statement_block()?);
                break;
            }
            self.pos = save;
            break;
        }

        if catches.is_empty() && finally.is_none() {
            return Err(self.invalid(start, "a try statement needs a catch or finally block"));
        }
        self.add(
            Node::Try {
                body,
                catches,
                finally,
            },
            start,
        )
    }

    fn parse_trap(&mut self, start: usize) -> ParseResult<NodeId> {
        self.pos += 1;
        let trap_type = if matches!(self.peek(), Some(Token::LBracket)) {
            Some(self.parse_type_constraint()?)
        } else {
            None
        };
        let body = self.parse_statement_block()?;
        self.add(Node::Trap { trap_type, body }, start)
    }

    fn parse_function(&mut self, start: usize) -> ParseResult<NodeId> {
        let is_filter = self.at_word("filter");
        self.pos += 1;

        if !matches!(self.peek(), Some(Token::Word(_))) {
            return Err(self.unexpected("function name"));
        }
        let name = self.bareword_text().to_string();

        let parameters = if self.eat(&Token::LParen) {
            self.parse_parameter_list()?
        } else {
            Vec::new()
        };

        self.skip_newlines();
        self.expect(Token::LBrace)?;
        let body = self.parse_script_block(Closer::Brace)?;
        self.expect(Token::RBrace)?;

        self.add(
            Node::FunctionDefinition {
                name,
                is_filter,
                parameters,
                body,
            },
            start,
        )
    }

    // ===== Pipelines and commands =====

    fn parse_pipeline(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let first = if self.at_command_start(false) {
            self.parse_command()?
        } else {
            let expression = self.parse_expression(true)?;
            if let Some(operator) = self.peek_assignment_operator() {
                self.pos += 1;
                self.skip_newlines();
                let right = self.parse_statement()?;
                return self.add(
                    Node::Assignment {
                        left: expression,
                        operator,
                        right,
                    },
                    start,
                );
            }
            self.wrap_command_expression(expression)?
        };

        let mut elements = vec![first];
        while self.eat(&Token::Pipe) {
            self.skip_newlines();
            let element = if self.at_command_start(true) {
                self.parse_command()?
            } else {
                let expression = self.parse_expression(true)?;
                self.wrap_command_expression(expression)?
            };
            elements.push(element);
        }

        self.add(Node::Pipeline { elements }, start)
    }

    fn wrap_command_expression(&mut self, expression: NodeId) -> ParseResult<NodeId> {
        let span = self.tree.span(expression).unwrap_or_default();
        Ok(self
            .tree
            .add_node_with_span(Node::CommandExpression { expression }, span)?)
    }

    fn peek_assignment_operator(&self) -> Option<AssignmentOperator> {
        match self.peek()? {
            Token::Assign => Some(AssignmentOperator::Assign),
            Token::PlusAssign => Some(AssignmentOperator::AddAssign),
            Token::MinusAssign => Some(AssignmentOperator::SubtractAssign),
            Token::StarAssign => Some(AssignmentOperator::MultiplyAssign),
            Token::SlashAssign => Some(AssignmentOperator::DivideAssign),
            Token::PercentAssign => Some(AssignmentOperator::RemainderAssign),
            _ => None,
        }
    }

    fn at_command_start(&self, in_pipeline: bool) -> bool {
        match self.peek() {
            Some(Token::Word(_) | Token::Ampersand | Token::Dot | Token::Backslash) => true,
            Some(Token::Question | Token::Percent) => in_pipeline,
            _ => false,
        }
    }

    fn parse_command(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let invocation = match self.peek() {
            Some(Token::Ampersand) => {
                self.pos += 1;
                Some(InvocationOperator::Call)
            }
            Some(Token::Dot) if !self.is_adjacent_at(self.pos + 1) => {
                self.pos += 1;
                Some(InvocationOperator::DotSource)
            }
            _ => None,
        };

        let name = if invocation.is_some() {
            self.parse_command_argument()?
        } else {
            self.parse_bareword()?
        };

        let mut elements = vec![name];
        loop {
            match self.peek() {
                None
                | Some(
                    Token::Newline | Token::Semicolon | Token::Pipe | Token::RParen | Token::RBrace,
                ) => break,
                Some(Token::DashWord(_)) => elements.push(self.parse_command_parameter()?),
                Some(_) => elements.push(self.parse_command_argument()?),
            }
        }

        self.add(
            Node::Command {
                invocation,
                elements,
            },
            start,
        )
    }

    fn parse_command_parameter(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let Some(Token::DashWord(word)) = self.peek().cloned() else {
            return Err(self.unexpected("command parameter"));
        };
        self.pos += 1;

        let (name, has_argument) = match word.strip_suffix(':') {
            Some(name) => (name, true),
            None => (word, false),
        };
        let argument = if has_argument {
            Some(self.parse_command_argument()?)
        } else {
            None
        };

        self.add(
            Node::CommandParameter {
                name: name[1..].to_string(),
                argument,
            },
            start,
        )
    }

    fn parse_command_argument(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        if matches!(
            self.peek(),
            Some(Token::Word(_) | Token::Dot | Token::Backslash | Token::Slash | Token::Star)
        ) {
            return self.parse_bareword();
        }

        let first = self.parse_unary()?;
        if !matches!(self.peek(), Some(Token::Comma)) {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat(&Token::Comma) {
            self.skip_newlines();
            elements.push(self.parse_unary()?);
        }
        self.add(Node::ArrayLiteral { elements }, start)
    }

    /// Consumes the current token plus every bare-word token glued to it
    fn bareword_text(&mut self) -> &'a str {
        let first = match self.tokens.get(self.pos) {
            Some((_, span)) => *span,
            None => return "",
        };
        let mut end = first.end;
        self.pos += 1;

        while let Some((token, span)) = self.tokens.get(self.pos) {
            if span.start != end || !is_bareword_part(token) {
                break;
            }
            end = span.end;
            self.pos += 1;
        }
        &self.source[first.start..end]
    }

    fn parse_bareword(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let value = self.bareword_text().to_string();
        self.add(
            Node::StringConstant {
                value,
                kind: StringKind::BareWord,
            },
            start,
        )
    }

    // ===== Expressions =====

    fn parse_expression(&mut self, allow_comma: bool) -> ParseResult<NodeId> {
        self.enter_recursion()?;
        let result = self.parse_ternary(allow_comma);
        self.exit_recursion();
        result
    }

    fn parse_ternary(&mut self, allow_comma: bool) -> ParseResult<NodeId> {
        let start = self.current_start();
        let condition = self.parse_binary(0, allow_comma)?;
        if !matches!(self.peek(), Some(Token::Question)) {
            return Ok(condition);
        }

        self.pos += 1;
        self.skip_newlines();
        let if_true = self.parse_expression(allow_comma)?;
        self.skip_newlines();
        self.expect(Token::Colon)?;
        self.skip_newlines();
        let if_false = self.parse_expression(allow_comma)?;

        self.add(
            Node::Ternary {
                condition,
                if_true,
                if_false,
            },
            start,
        )
    }

    fn parse_binary(&mut self, level: usize, allow_comma: bool) -> ParseResult<NodeId> {
        if level == BINARY_LEVELS {
            return self.parse_comma(allow_comma);
        }

        let start = self.current_start();
        let mut left = self.parse_binary(level + 1, allow_comma)?;
        while let Some(operator) = self.peek_binary_operator() {
            if precedence(operator) != level {
                break;
            }
            self.pos += 1;
            self.skip_newlines();
            let right = self.parse_binary(level + 1, allow_comma)?;
            left = self.add(
                Node::Binary {
                    operator,
                    left,
                    right,
                },
                start,
            )?;
        }
        Ok(left)
    }

    fn peek_binary_operator(&self) -> Option<BinaryOperator> {
        match self.peek()? {
            Token::Plus => Some(BinaryOperator::Add),
            Token::Minus => Some(BinaryOperator::Subtract),
            Token::Star => Some(BinaryOperator::Multiply),
            Token::Slash => Some(BinaryOperator::Divide),
            Token::Percent => Some(BinaryOperator::Remainder),
            Token::DotDot => Some(BinaryOperator::Range),
            Token::DashWord(word) => BinaryOperator::from_dash_word(&word[1..]),
            _ => None,
        }
    }

    fn parse_comma(&mut self, allow_comma: bool) -> ParseResult<NodeId> {
        let start = self.current_start();
        if allow_comma && matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            self.skip_newlines();
            let element = self.parse_unary()?;
            return self.add(
                Node::ArrayLiteral {
                    elements: vec![element],
                },
                start,
            );
        }

        let first = self.parse_unary()?;
        if !allow_comma || !matches!(self.peek(), Some(Token::Comma)) {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat(&Token::Comma) {
            self.skip_newlines();
            elements.push(self.parse_unary()?);
        }
        self.add(Node::ArrayLiteral { elements }, start)
    }

    fn parse_unary(&mut self) -> ParseResult<NodeId> {
        self.enter_recursion()?;
        let result = self.parse_unary_inner();
        self.exit_recursion();
        result
    }

    fn parse_unary_inner(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let operator = match self.peek() {
            Some(Token::Bang) => Some(UnaryOperator::Bang),
            Some(Token::Minus) => Some(UnaryOperator::Negate),
            Some(Token::Plus) => Some(UnaryOperator::Plus),
            Some(Token::PlusPlus) => Some(UnaryOperator::PreIncrement),
            Some(Token::MinusMinus) => Some(UnaryOperator::PreDecrement),
            Some(Token::DashWord(word)) => match word.to_ascii_lowercase().as_str() {
                "-not" => Some(UnaryOperator::Not),
                "-bnot" => Some(UnaryOperator::BitwiseNot),
                "-join" => Some(UnaryOperator::Join),
                "-split" => Some(UnaryOperator::Split),
                _ => None,
            },
            Some(Token::LBracket) => return self.parse_bracket_expression(),
            _ => None,
        };

        match operator {
            Some(operator) => {
                self.pos += 1;
                let child = self.parse_unary()?;
                self.add(Node::Unary { operator, child }, start)
            }
            None => self.parse_postfix(),
        }
    }

    /// `[Attr()]operand`, `[type]operand` or a bare `[type]`
    fn parse_bracket_expression(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        match self.parse_bracket_head()? {
            BracketHead::Attribute(attribute) => {
                let child = self.parse_unary()?;
                self.add(Node::AttributedExpression { attribute, child }, start)
            }
            BracketHead::Type(type_name) if self.operand_follows() => {
                let type_constraint = self.add(Node::TypeConstraint { type_name }, start)?;
                let child = self.parse_unary()?;
                self.add(
                    Node::Convert {
                        type_constraint,
                        child,
                    },
                    start,
                )
            }
            BracketHead::Type(type_name) => {
                let expression = self.add(Node::TypeExpression { type_name }, start)?;
                self.parse_postfix_operators(start, expression)
            }
        }
    }

    fn operand_follows(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Variable(_)
                    | Token::Splat(_)
                    | Token::Number(_)
                    | Token::SingleQuoted(_)
                    | Token::DoubleQuoted(_)
                    | Token::SingleHereString(_)
                    | Token::DoubleHereString(_)
                    | Token::LParen
                    | Token::DollarParen
                    | Token::AtParen
                    | Token::AtBrace
                    | Token::LBracket
            )
        )
    }

    fn parse_type_constraint(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        self.expect(Token::LBracket)?;
        let type_name = self.parse_type_name()?;
        self.expect(Token::RBracket)?;
        self.add(Node::TypeConstraint { type_name }, start)
    }

    fn parse_bracket_head(&mut self) -> ParseResult<BracketHead> {
        let start = self.current_start();
        self.expect(Token::LBracket)?;
        let type_name = self.parse_type_name()?;

        if self.eat(&Token::LParen) {
            let (positional, named) = self.parse_attribute_arguments()?;
            self.expect(Token::RBracket)?;
            let id = self.add(
                Node::Attribute {
                    type_name,
                    positional,
                    named,
                },
                start,
            )?;
            return Ok(BracketHead::Attribute(id));
        }

        self.expect(Token::RBracket)?;
        Ok(BracketHead::Type(type_name))
    }

    /// Dotted name with optional generic arguments and array ranks, without outer brackets
    fn parse_type_name(&mut self) -> ParseResult<TypeName> {
        let mut name = match self.peek() {
            Some(Token::Word(word)) => word.to_string(),
            _ => return Err(self.unexpected("type name")),
        };
        self.pos += 1;
        while matches!(self.peek(), Some(Token::Dot)) {
            let Some(Token::Word(segment)) = self.peek_nth(1) else {
                break;
            };
            name.push('.');
            name.push_str(segment);
            self.pos += 2;
        }

        let mut type_name = TypeName::Simple(name);
        let mut rank = 0;
        while matches!(self.peek(), Some(Token::LBracket)) {
            match self.peek_nth(1) {
                Some(Token::RBracket) => {
                    self.pos += 2;
                    rank += 1;
                }
                Some(Token::Comma) => {
                    return Err(self.invalid(
                        self.current_start(),
                        "multi-dimensional array types are not supported",
                    ));
                }
                _ if rank == 0 && matches!(type_name, TypeName::Simple(_)) => {
                    self.pos += 1;
                    let mut arguments = Vec::new();
                    loop {
                        let argument = if self.eat(&Token::LBracket) {
                            let argument = self.parse_type_name()?;
                            self.expect(Token::RBracket)?;
                            argument
                        } else {
                            self.parse_type_name()?
                        };
                        arguments.push(argument);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::RBracket)?;
                    type_name = match type_name {
                        TypeName::Simple(name) => TypeName::Generic { name, arguments },
                        other => other,
                    };
                }
                _ => break,
            }
        }

        if rank > 0 {
            type_name = TypeName::Array {
                element: Box::new(type_name),
                rank,
            };
        }
        Ok(type_name)
    }

    /// Attribute arguments up to and including the closing parenthesis
    fn parse_attribute_arguments(&mut self) -> ParseResult<(Vec<NodeId>, Vec<NodeId>)> {
        let mut positional = Vec::new();
        let mut named = Vec::new();

        self.skip_newlines();
        if self.eat(&Token::RParen) {
            return Ok((positional, named));
        }

        loop {
            self.skip_newlines();
            let start = self.current_start();
            match (self.peek(), self.peek_nth(1)) {
                (Some(Token::Word(name)), Some(Token::Assign)) => {
                    let name = name.to_string();
                    self.pos += 2;
                    self.skip_newlines();
                    let value = self.parse_expression(false)?;
                    named.push(self.add(
                        Node::NamedArgument {
                            name,
                            value: Some(value),
                        },
                        start,
                    )?);
                }
                (Some(Token::Word(name)), Some(Token::Comma | Token::RParen | Token::Newline)) => {
                    let name = name.to_string();
                    self.pos += 1;
                    named.push(self.add(Node::NamedArgument { name, value: None }, start)?);
                }
                _ => positional.push(self.parse_expression(false)?),
            }

            self.skip_newlines();
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok((positional, named));
        }
    }

    fn parse_postfix(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let primary = self.parse_primary()?;
        self.parse_postfix_operators(start, primary)
    }

    /// Member access, calls, indexing and postfix `++`/`--` written without whitespace
    fn parse_postfix_operators(&mut self, start: usize, mut target: NodeId) -> ParseResult<NodeId> {
        while self.is_adjacent() {
            target = match self.peek() {
                Some(Token::Dot) => self.parse_member(start, target, false, false)?,
                Some(Token::ColonColon) => self.parse_member(start, target, true, false)?,
                Some(Token::QuestionDot) => self.parse_member(start, target, false, true)?,
                Some(Token::LBracket) => self.parse_index(start, target, false)?,
                Some(Token::QuestionBracket) => self.parse_index(start, target, true)?,
                Some(Token::PlusPlus) => {
                    self.pos += 1;
                    self.add(
                        Node::Unary {
                            operator: UnaryOperator::PostIncrement,
                            child: target,
                        },
                        start,
                    )?
                }
                Some(Token::MinusMinus) => {
                    self.pos += 1;
                    self.add(
                        Node::Unary {
                            operator: UnaryOperator::PostDecrement,
                            child: target,
                        },
                        start,
                    )?
                }
                _ => break,
            };
        }
        Ok(target)
    }

    fn parse_member(
        &mut self,
        start: usize,
        target: NodeId,
        is_static: bool,
        null_conditional: bool,
    ) -> ParseResult<NodeId> {
        self.pos += 1;
        let member_start = self.current_start();
        let member = match self.peek().cloned() {
            Some(Token::Word(word)) => {
                self.pos += 1;
                self.add(
                    Node::StringConstant {
                        value: word.to_string(),
                        kind: StringKind::BareWord,
                    },
                    member_start,
                )?
            }
            _ => self.parse_primary()?,
        };

        if matches!(self.peek(), Some(Token::LParen)) && self.is_adjacent() {
            self.pos += 1;
            let arguments = self.parse_call_arguments()?;
            return self.add(
                Node::InvokeMember {
                    target,
                    member,
                    arguments,
                    is_static,
                    null_conditional,
                },
                start,
            );
        }

        self.add(
            Node::Member {
                target,
                member,
                is_static,
                null_conditional,
            },
            start,
        )
    }

    /// Method call arguments up to and including the closing parenthesis
    fn parse_call_arguments(&mut self) -> ParseResult<Vec<NodeId>> {
        let mut arguments = Vec::new();
        self.skip_newlines();
        if self.eat(&Token::RParen) {
            return Ok(arguments);
        }
        loop {
            self.skip_newlines();
            arguments.push(self.parse_expression(false)?);
            self.skip_newlines();
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(arguments);
        }
    }

    fn parse_index(
        &mut self,
        start: usize,
        target: NodeId,
        null_conditional: bool,
    ) -> ParseResult<NodeId> {
        self.pos += 1;
        self.skip_newlines();
        let index = self.parse_expression(true)?;
        self.skip_newlines();
        self.expect(Token::RBracket)?;
        self.add(
            Node::Index {
                target,
                index,
                null_conditional,
            },
            start,
        )
    }

    fn parse_primary(&mut self) -> ParseResult<NodeId> {
        let start = self.current_start();
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("expression"));
        };

        match token {
            Token::Variable(path) => {
                self.pos += 1;
                self.parse_variable(path, start)
            }
            Token::Splat(name) => {
                self.pos += 1;
                self.add(
                    Node::Variable {
                        path: name.to_string(),
                        splatted: true,
                    },
                    start,
                )
            }
            Token::Number(text) => {
                self.pos += 1;
                self.add(
                    Node::Number {
                        text: text.to_string(),
                    },
                    start,
                )
            }
            Token::SingleQuoted(value) => {
                self.pos += 1;
                self.add(
                    Node::StringConstant {
                        value,
                        kind: StringKind::SingleQuoted,
                    },
                    start,
                )
            }
            Token::SingleHereString(value) => {
                self.pos += 1;
                self.add(
                    Node::StringConstant {
                        value: value.to_string(),
                        kind: StringKind::SingleQuotedHereString,
                    },
                    start,
                )
            }
            Token::DoubleQuoted(raw) => {
                self.pos += 1;
                self.parse_double_quoted(raw, StringKind::DoubleQuoted, start)
            }
            Token::DoubleHereString(raw) => {
                self.pos += 1;
                self.parse_double_quoted(raw, StringKind::DoubleQuotedHereString, start)
            }
            Token::Word(word) => {
                self.pos += 1;
                self.add(
                    Node::StringConstant {
                        value: word.to_string(),
                        kind: StringKind::BareWord,
                    },
                    start,
                )
            }
            Token::LParen => self.parse_paren(start),
            Token::DollarParen => {
                self.pos += 1;
                let statements = self.parse_statement_list(Closer::Paren)?;
                self.expect(Token::RParen)?;
                self.add(Node::SubExpression { statements }, start)
            }
            Token::AtParen => {
                self.pos += 1;
                let statements = self.parse_statement_list(Closer::Paren)?;
                self.expect(Token::RParen)?;
                self.add(Node::ArrayExpression { statements }, start)
            }
            Token::AtBrace => self.parse_hashtable(start),
            Token::LBrace => {
                self.pos += 1;
                let body = self.parse_script_block(Closer::Brace)?;
                self.expect(Token::RBrace)?;
                self.add(Node::ScriptBlockExpression { body }, start)
            }
            Token::LBracket => self.parse_bracket_expression(),
            _ => Err(self.unexpected("expression")),
        }
    }

    /// `$x`, or `$using:x` which becomes a using expression around `$x`
    fn parse_variable(&mut self, path: &str, start: usize) -> ParseResult<NodeId> {
        let is_using = path.len() > 6 && path[..6].eq_ignore_ascii_case("using:");
        if !is_using {
            return self.add(
                Node::Variable {
                    path: path.to_string(),
                    splatted: false,
                },
                start,
            );
        }

        let variable = self.add(
            Node::Variable {
                path: path[6..].to_string(),
                splatted: false,
            },
            start,
        )?;
        self.add(Node::UsingExpression { variable }, start)
    }

    fn parse_double_quoted(&mut self, raw: &str, kind: StringKind, start: usize) -> ParseResult<NodeId> {
        let value = raw.to_string();
        let node = if is_expandable(raw) {
            Node::ExpandableString { value, kind }
        } else {
            Node::StringConstant { value, kind }
        };
        self.add(node, start)
    }

    fn parse_paren(&mut self, start: usize) -> ParseResult<NodeId> {
        self.pos += 1;
        self.skip_newlines();
        let statement = self.parse_pipeline()?;
        self.skip_newlines();
        self.expect(Token::RParen)?;

        // `(1, 2)` is the array literal itself
        if let Some(array) = self.lone_array_literal(statement) {
            return Ok(array);
        }
        self.add(Node::Paren { statement }, start)
    }

    fn lone_array_literal(&self, statement: NodeId) -> Option<NodeId> {
        let Some(Node::Pipeline { elements }) = self.tree.get_node(statement) else {
            return None;
        };
        let [element] = elements.as_slice() else {
            return None;
        };
        let Some(Node::CommandExpression { expression }) = self.tree.get_node(*element) else {
            return None;
        };
        matches!(
            self.tree.get_node(*expression),
            Some(Node::ArrayLiteral { .. })
        )
        .then_some(*expression)
    }

    fn parse_hashtable(&mut self, start: usize) -> ParseResult<NodeId> {
        self.pos += 1;
        let mut pairs = Vec::new();
        loop {
            self.skip_terminators();
            if self.eat(&Token::RBrace) {
                break;
            }

            let key = match self.peek() {
                Some(Token::Word(_)) => self.parse_bareword()?,
                _ => self.parse_unary()?,
            };
            self.skip_newlines();
            self.expect(Token::Assign)?;
            self.skip_newlines();
            let value = self.parse_statement()?;
            pairs.push((key, value));

            if !matches!(
                self.peek(),
                Some(Token::Newline | Token::Semicolon | Token::RBrace)
            ) {
                return Err(self.unexpected("';' or '}'"));
            }
        }
        self.add(Node::Hashtable { pairs }, start)
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
