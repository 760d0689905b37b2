//! Syntax tree representation using an arena of nodes
//!
//! A [`SyntaxTree`] owns every [`Node`] of a parsed script in a flat map keyed by
//! [`NodeId`]. Nodes refer to their children by id, never by reference, so elements and
//! bindings built on top of a tree can point into it without borrowing it.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::num::NonZeroU32;

use crate::error::{Error, Result};

/// Type alias for the HashMap implementation used in the tree
pub type AstHashMap<K, V> = FxHashMap<K, V>;

/// Type alias for the HashSet implementation used in the tree
pub type AstHashSet<T> = FxHashSet<T>;

/// Node identifier in the syntax tree
///
/// Uses NonZeroU32 internally to enable null pointer optimization for Option<NodeId>.
/// NodeId(0) is reserved as an invalid/null node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub NonZeroU32);

impl NodeId {
    /// Id used when children are erased for shallow comparisons. Never allocated.
    const PLACEHOLDER: NodeId = NodeId(NonZeroU32::MAX);

    /// Creates a new NodeId from a u32.
    /// Returns None if the value is 0.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(NodeId)
    }

    /// Gets the inner u32 value
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Byte range of a node in the source text it was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both spans
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Kind of a named script block section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Begin,
    Process,
    End,
    DynamicParam,
}

impl BlockKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            BlockKind::Begin => "begin",
            BlockKind::Process => "process",
            BlockKind::End => "end",
            BlockKind::DynamicParam => "dynamicparam",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "begin" => Some(BlockKind::Begin),
            "process" => Some(BlockKind::Process),
            "end" => Some(BlockKind::End),
            "dynamicparam" => Some(BlockKind::DynamicParam),
            _ => None,
        }
    }
}

/// Target kind of a `using` statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsingKind {
    Namespace,
    Module,
    Assembly,
}

impl UsingKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            UsingKind::Namespace => "namespace",
            UsingKind::Module => "module",
            UsingKind::Assembly => "assembly",
        }
    }
}

/// Operator prefixing a command invocation (`& $cmd`, `. $script`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationOperator {
    Call,
    DotSource,
}

impl InvocationOperator {
    pub fn text(&self) -> &'static str {
        match self {
            InvocationOperator::Call => "&",
            InvocationOperator::DotSource => ".",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentOperator {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    RemainderAssign,
}

impl AssignmentOperator {
    pub fn text(&self) -> &'static str {
        match self {
            AssignmentOperator::Assign => "=",
            AssignmentOperator::AddAssign => "+=",
            AssignmentOperator::SubtractAssign => "-=",
            AssignmentOperator::MultiplyAssign => "*=",
            AssignmentOperator::DivideAssign => "/=",
            AssignmentOperator::RemainderAssign => "%=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Range,
    Format,
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Like,
    NotLike,
    Match,
    NotMatch,
    Contains,
    NotContains,
    In,
    NotIn,
    Replace,
    Is,
    IsNot,
    As,
    Join,
    Split,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    And,
    Or,
    Xor,
}

impl BinaryOperator {
    pub fn text(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Remainder => "%",
            BinaryOperator::Range => "..",
            BinaryOperator::Format => "-f",
            BinaryOperator::Equal => "-eq",
            BinaryOperator::NotEqual => "-ne",
            BinaryOperator::Greater => "-gt",
            BinaryOperator::GreaterOrEqual => "-ge",
            BinaryOperator::Less => "-lt",
            BinaryOperator::LessOrEqual => "-le",
            BinaryOperator::Like => "-like",
            BinaryOperator::NotLike => "-notlike",
            BinaryOperator::Match => "-match",
            BinaryOperator::NotMatch => "-notmatch",
            BinaryOperator::Contains => "-contains",
            BinaryOperator::NotContains => "-notcontains",
            BinaryOperator::In => "-in",
            BinaryOperator::NotIn => "-notin",
            BinaryOperator::Replace => "-replace",
            BinaryOperator::Is => "-is",
            BinaryOperator::IsNot => "-isnot",
            BinaryOperator::As => "-as",
            BinaryOperator::Join => "-join",
            BinaryOperator::Split => "-split",
            BinaryOperator::BitwiseAnd => "-band",
            BinaryOperator::BitwiseOr => "-bor",
            BinaryOperator::BitwiseXor => "-bxor",
            BinaryOperator::And => "-and",
            BinaryOperator::Or => "-or",
            BinaryOperator::Xor => "-xor",
        }
    }

    /// Looks up a dash-word operator such as `-eq` (case-insensitive, without the dash)
    pub fn from_dash_word(word: &str) -> Option<Self> {
        let op = match word.to_ascii_lowercase().as_str() {
            "f" => BinaryOperator::Format,
            "eq" => BinaryOperator::Equal,
            "ne" => BinaryOperator::NotEqual,
            "gt" => BinaryOperator::Greater,
            "ge" => BinaryOperator::GreaterOrEqual,
            "lt" => BinaryOperator::Less,
            "le" => BinaryOperator::LessOrEqual,
            "like" => BinaryOperator::Like,
            "notlike" => BinaryOperator::NotLike,
            "match" => BinaryOperator::Match,
            "notmatch" => BinaryOperator::NotMatch,
            "contains" => BinaryOperator::Contains,
            "notcontains" => BinaryOperator::NotContains,
            "in" => BinaryOperator::In,
            "notin" => BinaryOperator::NotIn,
            "replace" => BinaryOperator::Replace,
            "is" => BinaryOperator::Is,
            "isnot" => BinaryOperator::IsNot,
            "as" => BinaryOperator::As,
            "join" => BinaryOperator::Join,
            "split" => BinaryOperator::Split,
            "band" => BinaryOperator::BitwiseAnd,
            "bor" => BinaryOperator::BitwiseOr,
            "bxor" => BinaryOperator::BitwiseXor,
            "and" => BinaryOperator::And,
            "or" => BinaryOperator::Or,
            "xor" => BinaryOperator::Xor,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Bang,
    Negate,
    Plus,
    BitwiseNot,
    Join,
    Split,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

impl UnaryOperator {
    pub fn text(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "-not",
            UnaryOperator::Bang => "!",
            UnaryOperator::Negate => "-",
            UnaryOperator::Plus => "+",
            UnaryOperator::BitwiseNot => "-bnot",
            UnaryOperator::Join => "-join",
            UnaryOperator::Split => "-split",
            UnaryOperator::PreIncrement | UnaryOperator::PostIncrement => "++",
            UnaryOperator::PreDecrement | UnaryOperator::PostDecrement => "--",
        }
    }

    /// Whether the operator is written after its operand (`$i++`)
    pub fn is_postfix(&self) -> bool {
        matches!(self, UnaryOperator::PostIncrement | UnaryOperator::PostDecrement)
    }

    /// Word operators need a space before their operand (`-not $x`)
    pub fn is_word(&self) -> bool {
        matches!(
            self,
            UnaryOperator::Not | UnaryOperator::BitwiseNot | UnaryOperator::Join | UnaryOperator::Split
        )
    }
}

/// Delimiter style of a string literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringKind {
    BareWord,
    SingleQuoted,
    DoubleQuoted,
    SingleQuotedHereString,
    DoubleQuotedHereString,
}

/// A type reference as written between square brackets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeName {
    Simple(String),
    Generic {
        name: String,
        arguments: Vec<TypeName>,
    },
    Array {
        element: Box<TypeName>,
        rank: usize,
    },
}

impl TypeName {
    pub fn simple(name: impl Into<String>) -> Self {
        TypeName::Simple(name.into())
    }

    /// Fully qualified name without the surrounding brackets.
    ///
    /// Generic arguments are part of the name (`List[string]`); arrays append one
    /// `[]` per rank to their element type.
    pub fn full_name(&self) -> String {
        match self {
            TypeName::Simple(name) => name.clone(),
            TypeName::Generic { name, arguments } => {
                let args: Vec<String> = arguments.iter().map(TypeName::full_name).collect();
                format!("{}[{}]", name, args.join(","))
            }
            TypeName::Array { element, rank } => {
                format!("{}{}", element.full_name(), "[]".repeat(*rank))
            }
        }
    }

    /// Last segment of a dotted name, ignoring generic arguments and array ranks
    pub fn short_name(&self) -> &str {
        match self {
            TypeName::Simple(name) | TypeName::Generic { name, .. } => {
                name.rsplit('.').next().unwrap_or(name.as_str())
            }
            TypeName::Array { element, .. } => element.short_name(),
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.full_name())
    }
}

/// One node of a script's syntax tree.
///
/// The union is closed: every consumer matches it exhaustively, so adding a kind is a
/// compile error everywhere it has to be handled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    // Structure
    ScriptBlock {
        usings: Vec<NodeId>,
        param_block: Option<NodeId>,
        blocks: Vec<NodeId>,
    },
    NamedBlock {
        kind: BlockKind,
        unnamed: bool,
        statements: Vec<NodeId>,
        traps: Vec<NodeId>,
    },
    ParamBlock {
        attributes: Vec<NodeId>,
        parameters: Vec<NodeId>,
    },
    Parameter {
        /// `Attribute` and `TypeConstraint` nodes in source order
        attributes: Vec<NodeId>,
        name: NodeId,
        default_value: Option<NodeId>,
    },
    Attribute {
        type_name: TypeName,
        positional: Vec<NodeId>,
        named: Vec<NodeId>,
    },
    NamedArgument {
        name: String,
        /// `None` when written without a value (`[Parameter(Mandatory)]`)
        value: Option<NodeId>,
    },
    TypeConstraint {
        type_name: TypeName,
    },
    StatementBlock {
        statements: Vec<NodeId>,
    },

    // Statements
    UsingStatement {
        kind: UsingKind,
        name: String,
    },
    FunctionDefinition {
        name: String,
        is_filter: bool,
        parameters: Vec<NodeId>,
        body: NodeId,
    },
    Pipeline {
        elements: Vec<NodeId>,
    },
    Command {
        invocation: Option<InvocationOperator>,
        elements: Vec<NodeId>,
    },
    CommandParameter {
        name: String,
        argument: Option<NodeId>,
    },
    CommandExpression {
        expression: NodeId,
    },
    Assignment {
        left: NodeId,
        operator: AssignmentOperator,
        right: NodeId,
    },
    If {
        clauses: Vec<(NodeId, NodeId)>,
        else_body: Option<NodeId>,
    },
    While {
        label: Option<String>,
        condition: NodeId,
        body: NodeId,
    },
    DoWhile {
        label: Option<String>,
        body: NodeId,
        condition: NodeId,
    },
    DoUntil {
        label: Option<String>,
        body: NodeId,
        condition: NodeId,
    },
    For {
        label: Option<String>,
        initializer: Option<NodeId>,
        condition: Option<NodeId>,
        iterator: Option<NodeId>,
        body: NodeId,
    },
    ForEach {
        label: Option<String>,
        variable: NodeId,
        iterable: NodeId,
        body: NodeId,
    },
    Try {
        body: NodeId,
        catches: Vec<NodeId>,
        finally: Option<NodeId>,
    },
    CatchClause {
        types: Vec<NodeId>,
        body: NodeId,
    },
    Trap {
        trap_type: Option<NodeId>,
        body: NodeId,
    },
    Return {
        pipeline: Option<NodeId>,
    },
    Throw {
        pipeline: Option<NodeId>,
    },
    Break {
        label: Option<String>,
    },
    Continue {
        label: Option<String>,
    },

    // Expressions
    Number {
        text: String,
    },
    StringConstant {
        value: String,
        kind: StringKind,
    },
    ExpandableString {
        value: String,
        kind: StringKind,
    },
    Variable {
        path: String,
        splatted: bool,
    },
    UsingExpression {
        variable: NodeId,
    },
    TypeExpression {
        type_name: TypeName,
    },
    Convert {
        type_constraint: NodeId,
        child: NodeId,
    },
    AttributedExpression {
        attribute: NodeId,
        child: NodeId,
    },
    Binary {
        operator: BinaryOperator,
        left: NodeId,
        right: NodeId,
    },
    Unary {
        operator: UnaryOperator,
        child: NodeId,
    },
    Ternary {
        condition: NodeId,
        if_true: NodeId,
        if_false: NodeId,
    },
    ArrayLiteral {
        elements: Vec<NodeId>,
    },
    ArrayExpression {
        statements: Vec<NodeId>,
    },
    SubExpression {
        statements: Vec<NodeId>,
    },
    Paren {
        statement: NodeId,
    },
    Hashtable {
        pairs: Vec<(NodeId, NodeId)>,
    },
    ScriptBlockExpression {
        body: NodeId,
    },
    Member {
        target: NodeId,
        member: NodeId,
        is_static: bool,
        null_conditional: bool,
    },
    InvokeMember {
        target: NodeId,
        member: NodeId,
        arguments: Vec<NodeId>,
        is_static: bool,
        null_conditional: bool,
    },
    Index {
        target: NodeId,
        index: NodeId,
        null_conditional: bool,
    },

    /// Source the parser could not make sense of, kept verbatim
    Error {
        text: String,
    },
}

fn map_ids<E, F>(ids: &[NodeId], f: &mut F) -> std::result::Result<Vec<NodeId>, E>
where
    F: FnMut(NodeId) -> std::result::Result<NodeId, E>,
{
    ids.iter().map(|id| f(*id)).collect()
}

fn map_opt<E, F>(id: Option<NodeId>, f: &mut F) -> std::result::Result<Option<NodeId>, E>
where
    F: FnMut(NodeId) -> std::result::Result<NodeId, E>,
{
    id.map(|id| f(id)).transpose()
}

fn map_pairs<E, F>(
    pairs: &[(NodeId, NodeId)],
    f: &mut F,
) -> std::result::Result<Vec<(NodeId, NodeId)>, E>
where
    F: FnMut(NodeId) -> std::result::Result<NodeId, E>,
{
    pairs
        .iter()
        .map(|(a, b)| Ok((f(*a)?, f(*b)?)))
        .collect()
}

impl Node {
    /// Short, stable name of the node kind for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::ScriptBlock { .. } => "script block",
            Node::NamedBlock { .. } => "named block",
            Node::ParamBlock { .. } => "param block",
            Node::Parameter { .. } => "parameter",
            Node::Attribute { .. } => "attribute",
            Node::NamedArgument { .. } => "named argument",
            Node::TypeConstraint { .. } => "type constraint",
            Node::StatementBlock { .. } => "statement block",
            Node::UsingStatement { .. } => "using statement",
            Node::FunctionDefinition { .. } => "function definition",
            Node::Pipeline { .. } => "pipeline",
            Node::Command { .. } => "command",
            Node::CommandParameter { .. } => "command parameter",
            Node::CommandExpression { .. } => "command expression",
            Node::Assignment { .. } => "assignment",
            Node::If { .. } => "if statement",
            Node::While { .. } => "while statement",
            Node::DoWhile { .. } => "do-while statement",
            Node::DoUntil { .. } => "do-until statement",
            Node::For { .. } => "for statement",
            Node::ForEach { .. } => "foreach statement",
            Node::Try { .. } => "try statement",
            Node::CatchClause { .. } => "catch clause",
            Node::Trap { .. } => "trap statement",
            Node::Return { .. } => "return statement",
            Node::Throw { .. } => "throw statement",
            Node::Break { .. } => "break statement",
            Node::Continue { .. } => "continue statement",
            Node::Number { .. } => "number",
            Node::StringConstant { .. } => "string constant",
            Node::ExpandableString { .. } => "expandable string",
            Node::Variable { .. } => "variable",
            Node::UsingExpression { .. } => "using expression",
            Node::TypeExpression { .. } => "type expression",
            Node::Convert { .. } => "convert expression",
            Node::AttributedExpression { .. } => "attributed expression",
            Node::Binary { .. } => "binary expression",
            Node::Unary { .. } => "unary expression",
            Node::Ternary { .. } => "ternary expression",
            Node::ArrayLiteral { .. } => "array literal",
            Node::ArrayExpression { .. } => "array expression",
            Node::SubExpression { .. } => "sub-expression",
            Node::Paren { .. } => "paren expression",
            Node::Hashtable { .. } => "hashtable",
            Node::ScriptBlockExpression { .. } => "script block expression",
            Node::Member { .. } => "member expression",
            Node::InvokeMember { .. } => "invoke-member expression",
            Node::Index { .. } => "index expression",
            Node::Error { .. } => "error",
        }
    }

    /// Rebuilds this node with every child id passed through `f`, in source order.
    ///
    /// This is the single structural match over the node union; traversal, shape
    /// comparison and the tree rewriter are all built on it.
    pub fn try_map_children<E, F>(&self, mut f: F) -> std::result::Result<Node, E>
    where
        F: FnMut(NodeId) -> std::result::Result<NodeId, E>,
    {
        let f = &mut f;
        let node = match self {
            Node::ScriptBlock {
                usings,
                param_block,
                blocks,
            } => Node::ScriptBlock {
                usings: map_ids(usings, f)?,
                param_block: map_opt(*param_block, f)?,
                blocks: map_ids(blocks, f)?,
            },
            Node::NamedBlock {
                kind,
                unnamed,
                statements,
                traps,
            } => Node::NamedBlock {
                kind: *kind,
                unnamed: *unnamed,
                statements: map_ids(statements, f)?,
                traps: map_ids(traps, f)?,
            },
            Node::ParamBlock {
                attributes,
                parameters,
            } => Node::ParamBlock {
                attributes: map_ids(attributes, f)?,
                parameters: map_ids(parameters, f)?,
            },
            Node::Parameter {
                attributes,
                name,
                default_value,
            } => Node::Parameter {
                attributes: map_ids(attributes, f)?,
                name: f(*name)?,
                default_value: map_opt(*default_value, f)?,
            },
            Node::Attribute {
                type_name,
                positional,
                named,
            } => Node::Attribute {
                type_name: type_name.clone(),
                positional: map_ids(positional, f)?,
                named: map_ids(named, f)?,
            },
            Node::NamedArgument { name, value } => Node::NamedArgument {
                name: name.clone(),
                value: map_opt(*value, f)?,
            },
            Node::TypeConstraint { type_name } => Node::TypeConstraint {
                type_name: type_name.clone(),
            },
            Node::StatementBlock { statements } => Node::StatementBlock {
                statements: map_ids(statements, f)?,
            },
            Node::UsingStatement { kind, name } => Node::UsingStatement {
                kind: *kind,
                name: name.clone(),
            },
            Node::FunctionDefinition {
                name,
                is_filter,
                parameters,
                body,
            } => Node::FunctionDefinition {
                name: name.clone(),
                is_filter: *is_filter,
                parameters: map_ids(parameters, f)?,
                body: f(*body)?,
            },
            Node::Pipeline { elements } => Node::Pipeline {
                elements: map_ids(elements, f)?,
            },
            Node::Command {
                invocation,
                elements,
            } => Node::Command {
                invocation: *invocation,
                elements: map_ids(elements, f)?,
            },
            Node::CommandParameter { name, argument } => Node::CommandParameter {
                name: name.clone(),
                argument: map_opt(*argument, f)?,
            },
            Node::CommandExpression { expression } => Node::CommandExpression {
                expression: f(*expression)?,
            },
            Node::Assignment {
                left,
                operator,
                right,
            } => Node::Assignment {
                left: f(*left)?,
                operator: *operator,
                right: f(*right)?,
            },
            Node::If { clauses, else_body } => Node::If {
                clauses: map_pairs(clauses, f)?,
                else_body: map_opt(*else_body, f)?,
            },
            Node::While {
                label,
                condition,
                body,
            } => Node::While {
                label: label.clone(),
                condition: f(*condition)?,
                body: f(*body)?,
            },
            Node::DoWhile {
                label,
                body,
                condition,
            } => Node::DoWhile {
                label: label.clone(),
                body: f(*body)?,
                condition: f(*condition)?,
            },
            Node::DoUntil {
                label,
                body,
                condition,
            } => Node::DoUntil {
                label: label.clone(),
                body: f(*body)?,
                condition: f(*condition)?,
            },
            Node::For {
                label,
                initializer,
                condition,
                iterator,
                body,
            } => Node::For {
                label: label.clone(),
                initializer: map_opt(*initializer, f)?,
                condition: map_opt(*condition, f)?,
                iterator: map_opt(*iterator, f)?,
                body: f(*body)?,
            },
            Node::ForEach {
                label,
                variable,
                iterable,
                body,
            } => Node::ForEach {
                label: label.clone(),
                variable: f(*variable)?,
                iterable: f(*iterable)?,
                body: f(*body)?,
            },
            Node::Try {
                body,
                catches,
                finally,
            } => Node::Try {
                body: f(*body)?,
                catches: map_ids(catches, f)?,
                finally: map_opt(*finally, f)?,
            },
            Node::CatchClause { types, body } => Node::CatchClause {
                types: map_ids(types, f)?,
                body: f(*body)?,
            },
            Node::Trap { trap_type, body } => Node::Trap {
                trap_type: map_opt(*trap_type, f)?,
                body: f(*body)?,
            },
            Node::Return { pipeline } => Node::Return {
                pipeline: map_opt(*pipeline, f)?,
            },
            Node::Throw { pipeline } => Node::Throw {
                pipeline: map_opt(*pipeline, f)?,
            },
            Node::Break { label } => Node::Break {
                label: label.clone(),
            },
            Node::Continue { label } => Node::Continue {
                label: label.clone(),
            },
            Node::Number { text } => Node::Number { text: text.clone() },
            Node::StringConstant { value, kind } => Node::StringConstant {
                value: value.clone(),
                kind: *kind,
            },
            Node::ExpandableString { value, kind } => Node::ExpandableString {
                value: value.clone(),
                kind: *kind,
            },
            Node::Variable { path, splatted } => Node::Variable {
                path: path.clone(),
                splatted: *splatted,
            },
            Node::UsingExpression { variable } => Node::UsingExpression {
                variable: f(*variable)?,
            },
            Node::TypeExpression { type_name } => Node::TypeExpression {
                type_name: type_name.clone(),
            },
            Node::Convert {
                type_constraint,
                child,
            } => Node::Convert {
                type_constraint: f(*type_constraint)?,
                child: f(*child)?,
            },
            Node::AttributedExpression { attribute, child } => Node::AttributedExpression {
                attribute: f(*attribute)?,
                child: f(*child)?,
            },
            Node::Binary {
                operator,
                left,
                right,
            } => Node::Binary {
                operator: *operator,
                left: f(*left)?,
                right: f(*right)?,
            },
            Node::Unary { operator, child } => Node::Unary {
                operator: *operator,
                child: f(*child)?,
            },
            Node::Ternary {
                condition,
                if_true,
                if_false,
            } => Node::Ternary {
                condition: f(*condition)?,
                if_true: f(*if_true)?,
                if_false: f(*if_false)?,
            },
            Node::ArrayLiteral { elements } => Node::ArrayLiteral {
                elements: map_ids(elements, f)?,
            },
            Node::ArrayExpression { statements } => Node::ArrayExpression {
                statements: map_ids(statements, f)?,
            },
            Node::SubExpression { statements } => Node::SubExpression {
                statements: map_ids(statements, f)?,
            },
            Node::Paren { statement } => Node::Paren {
                statement: f(*statement)?,
            },
            Node::Hashtable { pairs } => Node::Hashtable {
                pairs: map_pairs(pairs, f)?,
            },
            Node::ScriptBlockExpression { body } => Node::ScriptBlockExpression {
                body: f(*body)?,
            },
            Node::Member {
                target,
                member,
                is_static,
                null_conditional,
            } => Node::Member {
                target: f(*target)?,
                member: f(*member)?,
                is_static: *is_static,
                null_conditional: *null_conditional,
            },
            Node::InvokeMember {
                target,
                member,
                arguments,
                is_static,
                null_conditional,
            } => Node::InvokeMember {
                target: f(*target)?,
                member: f(*member)?,
                arguments: map_ids(arguments, f)?,
                is_static: *is_static,
                null_conditional: *null_conditional,
            },
            Node::Index {
                target,
                index,
                null_conditional,
            } => Node::Index {
                target: f(*target)?,
                index: f(*index)?,
                null_conditional: *null_conditional,
            },
            Node::Error { text } => Node::Error { text: text.clone() },
        };
        Ok(node)
    }

    /// Infallible form of [`Node::try_map_children`]
    pub fn map_children(&self, mut f: impl FnMut(NodeId) -> NodeId) -> Node {
        match self.try_map_children::<Infallible, _>(|id| Ok(f(id))) {
            Ok(node) => node,
            Err(never) => match never {},
        }
    }

    /// Child ids in source order
    pub fn children(&self) -> Vec<NodeId> {
        let mut children = Vec::new();
        self.map_children(|id| {
            children.push(id);
            id
        });
        children
    }

    /// Compares everything except the child ids
    pub fn same_kind_and_data(&self, other: &Node) -> bool {
        self.map_children(|_| NodeId::PLACEHOLDER) == other.map_children(|_| NodeId::PLACEHOLDER)
    }
}

/// Syntax tree of one script
///
/// # Invariants
/// - `next_id` monotonically increases and is never reused
/// - NodeIds are unique within a tree
/// - All NodeId references in nodes point to nodes of the same tree
/// - The root_id, if present, points to a valid node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxTree {
    nodes: AstHashMap<NodeId, Node>,
    root_id: Option<NodeId>,
    /// Next ID to assign. Starts at 1 and monotonically increases.
    next_id: u32,
    spans: AstHashMap<NodeId, Span>,
}

impl Default for SyntaxTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntaxTree {
    pub fn new() -> Self {
        Self {
            nodes: AstHashMap::default(),
            root_id: None,
            next_id: 1, // Start at 1 since 0 is reserved for null
            spans: AstHashMap::default(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        if self.next_id == u32::MAX {
            return Err(Error::NodeIdOverflow);
        }

        let id = NodeId::new(self.next_id).ok_or(Error::NodeIdOverflow)?;
        self.next_id += 1;
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn add_node_with_span(&mut self, node: Node, span: Span) -> Result<NodeId> {
        let id = self.add_node(node)?;
        self.spans.insert(id, span);
        Ok(id)
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root_id = Some(id);
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.root_id
    }

    /// Root id, or an error for an empty tree
    pub fn root(&self) -> Result<NodeId> {
        self.root_id.ok_or(Error::MissingRoot)
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Like [`SyntaxTree::get_node`] but treats a dangling id as an error
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(Error::MissingNode(id))
    }

    /// Source span of a node; synthesized nodes have none
    pub fn span(&self, id: NodeId) -> Option<Span> {
        self.spans.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns an iterator over all node IDs in the tree
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Returns an iterator over all nodes in the tree
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> + '_ {
        self.nodes.iter()
    }

    /// Performs a pre-order depth-first traversal starting from the given node.
    /// Uses an explicit stack so deep trees cannot overflow.
    pub fn dfs_from(&self, start: NodeId, mut visitor: impl FnMut(NodeId, &Node)) {
        let mut visited = AstHashSet::default();
        let mut stack = vec![start];

        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.get_node(node_id) {
                visitor(node_id, node);

                // Push children in reverse order so they're visited in source order
                for child in node.children().into_iter().rev() {
                    stack.push(child);
                }
            }
        }
    }

    /// Ids of every node reachable from the root, in pre-order, that satisfy `predicate`
    pub fn find_nodes(&self, mut predicate: impl FnMut(&Node) -> bool) -> Vec<NodeId> {
        let mut found = Vec::new();
        if let Some(root) = self.root_id {
            self.dfs_from(root, |id, node| {
                if predicate(node) {
                    found.push(id);
                }
            });
        }
        found
    }

    /// Whether the subtree at `a` in this tree and the subtree at `b` in `other` have the
    /// same kinds and data at every position. Ids and spans are ignored.
    pub fn same_shape(&self, a: NodeId, other: &SyntaxTree, b: NodeId) -> bool {
        let (Some(left), Some(right)) = (self.get_node(a), other.get_node(b)) else {
            return false;
        };
        if !left.same_kind_and_data(right) {
            return false;
        }
        let (left_children, right_children) = (left.children(), right.children());
        left_children.len() == right_children.len()
            && left_children
                .iter()
                .zip(&right_children)
                .all(|(l, r)| self.same_shape(*l, other, *r))
    }

    /// Shape comparison of two whole trees, starting at their roots
    pub fn same_shape_as(&self, other: &SyntaxTree) -> bool {
        match (self.root_id, other.root_id) {
            (Some(a), Some(b)) => self.same_shape(a, other, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Validates the tree structure
    ///
    /// # Invariants checked:
    /// - The root_id (if present) points to a valid node
    /// - All child references point to existing nodes
    /// - Spans only exist for existing nodes
    pub fn validate(&self) -> Result<()> {
        if let Some(root) = self.root_id {
            if !self.nodes.contains_key(&root) {
                return Err(Error::MissingNode(root));
            }
        }

        for node in self.nodes.values() {
            for child in node.children() {
                if !self.nodes.contains_key(&child) {
                    return Err(Error::MissingNode(child));
                }
            }
        }

        for id in self.spans.keys() {
            if !self.nodes.contains_key(id) {
                return Err(Error::MissingNode(*id));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "ast_tests.rs"]
mod tests;
