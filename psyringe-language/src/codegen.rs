//! Source generation from a syntax tree
//!
//! Output is canonical rather than faithful: whitespace, comments and redundant
//! parentheses are not preserved, but parsing the generated text yields a tree of the
//! same shape. Statements are terminated with `;` and separated by newlines.

use psyringe_core::ast::{BinaryOperator, Node, NodeId, StringKind, SyntaxTree};

use crate::error::{Result, ScriptError};

/// Generates source text for the subtree at `node`
pub fn generate(tree: &SyntaxTree, node: NodeId) -> Result<String> {
    let mut out = String::new();
    Generator { tree }.emit(node, &mut out)?;
    Ok(out)
}

/// Generates source text for a whole tree
pub fn generate_script(tree: &SyntaxTree) -> Result<String> {
    generate(tree, tree.root()?)
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `$name`, or `${name}` when the name would not lex back as one variable
fn variable_text(path: &str, braced: bool) -> String {
    let simple = match path.split_once(':') {
        Some((scope, name)) => {
            is_plain_name(scope) && is_plain_name(name) && !scope.eq_ignore_ascii_case("using")
        }
        None => is_plain_name(path) || matches!(path, "?" | "^" | "$"),
    };
    if simple && !braced {
        format!("${}", path)
    } else {
        format!("${{{}}}", path)
    }
}

fn quoted(value: &str, kind: StringKind) -> String {
    match kind {
        StringKind::BareWord => value.to_string(),
        StringKind::SingleQuoted => format!("'{}'", value.replace('\'', "''")),
        StringKind::DoubleQuoted => format!("\"{}\"", value),
        StringKind::SingleQuotedHereString => format!("@'\n{}\n'@", value),
        StringKind::DoubleQuotedHereString => format!("@\"\n{}\n\"@", value),
    }
}

struct Generator<'t> {
    tree: &'t SyntaxTree,
}

impl<'t> Generator<'t> {
    fn text(&self, id: NodeId) -> Result<String> {
        let mut out = String::new();
        self.emit(id, &mut out)?;
        Ok(out)
    }

    fn join(&self, ids: &[NodeId], separator: &str, out: &mut String) -> Result<()> {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            self.emit(*id, out)?;
        }
        Ok(())
    }

    fn opt(&self, prefix: &str, id: Option<NodeId>, out: &mut String) -> Result<()> {
        if let Some(id) = id {
            out.push_str(prefix);
            self.emit(id, out)?;
        }
        Ok(())
    }

    /// One statement per line, each terminated
    fn statement_lines(&self, ids: &[NodeId], out: &mut String) -> Result<()> {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            self.emit(*id, out)?;
            out.push(';');
        }
        Ok(())
    }

    fn braced(&self, body: &str, out: &mut String) {
        if body.is_empty() {
            out.push_str("{}");
        } else {
            out.push_str("{\n");
            out.push_str(body);
            out.push_str("\n}");
        }
    }

    fn braced_statements(&self, ids: &[NodeId], out: &mut String) -> Result<()> {
        let mut body = String::new();
        self.statement_lines(ids, &mut body)?;
        self.braced(&body, out);
        Ok(())
    }

    fn label(&self, label: &Option<String>, out: &mut String) {
        if let Some(label) = label {
            out.push(':');
            out.push_str(label);
            out.push(' ');
        }
    }

    /// Target of a `?.`/`?[` access; variables need braces so `?` is not read into the name
    fn access_target(&self, target: NodeId, null_conditional: bool, out: &mut String) -> Result<()> {
        match self.tree.node(target)? {
            Node::Variable {
                path,
                splatted: false,
            } if null_conditional => {
                out.push_str(&variable_text(path, true));
                Ok(())
            }
            _ => self.emit(target, out),
        }
    }

    fn member_name(&self, member: NodeId, out: &mut String) -> Result<()> {
        match self.tree.node(member)? {
            Node::StringConstant {
                value,
                kind: StringKind::BareWord,
            } => {
                out.push_str(value);
                Ok(())
            }
            _ => self.emit(member, out),
        }
    }

    fn emit(&self, id: NodeId, out: &mut String) -> Result<()> {
        match self.tree.node(id)? {
            Node::ScriptBlock {
                usings,
                param_block,
                blocks,
            } => {
                let mut parts = Vec::new();
                for using in usings {
                    parts.push(format!("{};", self.text(*using)?));
                }
                if let Some(param_block) = param_block {
                    parts.push(self.text(*param_block)?);
                }
                for block in blocks {
                    let text = self.text(*block)?;
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
                out.push_str(&parts.join("\n"));
            }
            Node::NamedBlock {
                kind,
                unnamed,
                statements,
                traps,
            } => {
                let all: Vec<NodeId> = traps.iter().chain(statements).copied().collect();
                if *unnamed {
                    self.statement_lines(&all, out)?;
                } else {
                    out.push_str(kind.keyword());
                    out.push(' ');
                    self.braced_statements(&all, out)?;
                }
            }
            Node::ParamBlock {
                attributes,
                parameters,
            } => {
                for attribute in attributes {
                    self.emit(*attribute, out)?;
                    out.push('\n');
                }
                out.push_str("param(");
                self.join(parameters, ", ", out)?;
                out.push(')');
            }
            Node::Parameter {
                attributes,
                name,
                default_value,
            } => {
                self.join(attributes, "", out)?;
                self.emit(*name, out)?;
                self.opt(" = ", *default_value, out)?;
            }
            Node::Attribute {
                type_name,
                positional,
                named,
            } => {
                out.push('[');
                out.push_str(&type_name.full_name());
                out.push('(');
                let arguments: Vec<NodeId> = positional.iter().chain(named).copied().collect();
                self.join(&arguments, ", ", out)?;
                out.push_str(")]");
            }
            Node::NamedArgument { name, value } => {
                out.push_str(name);
                self.opt(" = ", *value, out)?;
            }
            Node::TypeConstraint { type_name } => out.push_str(&type_name.to_string()),
            Node::StatementBlock { statements } => self.braced_statements(statements, out)?,

            Node::UsingStatement { kind, name } => {
                out.push_str("using ");
                out.push_str(kind.keyword());
                out.push(' ');
                out.push_str(name);
            }
            Node::FunctionDefinition {
                name,
                is_filter,
                parameters,
                body,
            } => {
                out.push_str(if *is_filter { "filter " } else { "function " });
                out.push_str(name);
                if !parameters.is_empty() {
                    out.push('(');
                    self.join(parameters, ", ", out)?;
                    out.push(')');
                }
                out.push(' ');
                let body = self.text(*body)?;
                self.braced(&body, out);
            }
            Node::Pipeline { elements } => self.join(elements, " | ", out)?,
            Node::Command {
                invocation,
                elements,
            } => {
                if let Some(invocation) = invocation {
                    out.push_str(invocation.text());
                    out.push(' ');
                }
                self.join(elements, " ", out)?;
            }
            Node::CommandParameter { name, argument } => {
                out.push('-');
                out.push_str(name);
                self.opt(":", *argument, out)?;
            }
            Node::CommandExpression { expression } => self.emit(*expression, out)?,
            Node::Assignment {
                left,
                operator,
                right,
            } => {
                self.emit(*left, out)?;
                out.push(' ');
                out.push_str(operator.text());
                out.push(' ');
                self.emit(*right, out)?;
            }
            Node::If { clauses, else_body } => {
                for (i, (condition, body)) in clauses.iter().enumerate() {
                    out.push_str(if i == 0 { "if (" } else { " elseif (" });
                    self.emit(*condition, out)?;
                    out.push_str(") ");
                    self.emit(*body, out)?;
                }
                self.opt(" else ", *else_body, out)?;
            }
            Node::While {
                label,
                condition,
                body,
            } => {
                self.label(label, out);
                out.push_str("while (");
                self.emit(*condition, out)?;
                out.push_str(") ");
                self.emit(*body, out)?;
            }
            Node::DoWhile {
                label,
                body,
                condition,
            } => {
                self.label(label, out);
                out.push_str("do ");
                self.emit(*body, out)?;
                out.push_str(" while (");
                self.emit(*condition, out)?;
                out.push(')');
            }
            Node::DoUntil {
                label,
                body,
                condition,
            } => {
                self.label(label, out);
                out.push_str("do ");
                self.emit(*body, out)?;
                out.push_str(" until (");
                self.emit(*condition, out)?;
                out.push(')');
            }
            Node::For {
                label,
                initializer,
                condition,
                iterator,
                body,
            } => {
                self.label(label, out);
                out.push_str("for (");
                self.opt("", *initializer, out)?;
                out.push_str("; ");
                self.opt("", *condition, out)?;
                out.push_str("; ");
                self.opt("", *iterator, out)?;
                out.push_str(") ");
                self.emit(*body, out)?;
            }
            Node::ForEach {
                label,
                variable,
                iterable,
                body,
            } => {
                self.label(label, out);
                out.push_str("foreach (");
                self.emit(*variable, out)?;
                out.push_str(" in ");
                self.emit(*iterable, out)?;
                out.push_str(") ");
                self.emit(*body, out)?;
            }
            Node::Try {
                body,
                catches,
                finally,
            } => {
                out.push_str("try ");
                self.emit(*body, out)?;
                for catch in catches {
                    out.push(' ');
                    self.emit(*catch, out)?;
                }
                self.opt(" finally ", *finally, out)?;
            }
            Node::CatchClause { types, body } => {
                out.push_str("catch ");
                if !types.is_empty() {
                    self.join(types, ", ", out)?;
                    out.push(' ');
                }
                self.emit(*body, out)?;
            }
            Node::Trap { trap_type, body } => {
                out.push_str("trap ");
                if let Some(trap_type) = trap_type {
                    self.emit(*trap_type, out)?;
                    out.push(' ');
                }
                self.emit(*body, out)?;
            }
            Node::Return { pipeline } => {
                out.push_str("return");
                self.opt(" ", *pipeline, out)?;
            }
            Node::Throw { pipeline } => {
                out.push_str("throw");
                self.opt(" ", *pipeline, out)?;
            }
            Node::Break { label } => {
                out.push_str("break");
                if let Some(label) = label {
                    out.push(' ');
                    out.push_str(label);
                }
            }
            Node::Continue { label } => {
                out.push_str("continue");
                if let Some(label) = label {
                    out.push(' ');
                    out.push_str(label);
                }
            }

            Node::Number { text } => out.push_str(text),
            Node::StringConstant { value, kind } | Node::ExpandableString { value, kind } => {
                out.push_str(&quoted(value, *kind))
            }
            Node::Variable { path, splatted } => {
                if *splatted {
                    out.push('@');
                    out.push_str(path);
                } else {
                    out.push_str(&variable_text(path, false));
                }
            }
            Node::UsingExpression { variable } => match self.tree.node(*variable)? {
                Node::Variable { path, .. } => {
                    out.push_str("$using:");
                    out.push_str(path);
                }
                _ => self.emit(*variable, out)?,
            },
            Node::TypeExpression { type_name } => out.push_str(&type_name.to_string()),
            Node::Convert {
                type_constraint,
                child,
            } => {
                self.emit(*type_constraint, out)?;
                self.emit(*child, out)?;
            }
            Node::AttributedExpression { attribute, child } => {
                self.emit(*attribute, out)?;
                self.emit(*child, out)?;
            }
            Node::Binary {
                operator,
                left,
                right,
            } => {
                self.emit(*left, out)?;
                if *operator == BinaryOperator::Range {
                    out.push_str("..");
                } else {
                    out.push(' ');
                    out.push_str(operator.text());
                    out.push(' ');
                }
                self.emit(*right, out)?;
            }
            Node::Unary { operator, child } => {
                let operand = self.text(*child)?;
                if operator.is_postfix() {
                    out.push_str(&operand);
                    out.push_str(operator.text());
                } else {
                    out.push_str(operator.text());
                    // `- -1` must not lex as `--`
                    if operator.is_word() || operand.starts_with(|c| c == '-' || c == '+') {
                        out.push(' ');
                    }
                    out.push_str(&operand);
                }
            }
            Node::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                self.emit(*condition, out)?;
                out.push_str(" ? ");
                self.emit(*if_true, out)?;
                out.push_str(" : ");
                self.emit(*if_false, out)?;
            }
            Node::ArrayLiteral { elements } => {
                out.push('(');
                if elements.len() == 1 {
                    out.push_str(", ");
                }
                self.join(elements, ", ", out)?;
                out.push(')');
            }
            Node::ArrayExpression { statements } => {
                out.push_str("@(");
                self.join(statements, "; ", out)?;
                out.push(')');
            }
            Node::SubExpression { statements } => {
                out.push_str("$(");
                self.join(statements, "; ", out)?;
                out.push(')');
            }
            Node::Paren { statement } => {
                out.push('(');
                self.emit(*statement, out)?;
                out.push(')');
            }
            Node::Hashtable { pairs } => {
                out.push_str("@{");
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str("; ");
                    }
                    self.emit(*key, out)?;
                    out.push_str(" = ");
                    self.emit(*value, out)?;
                }
                out.push('}');
            }
            Node::ScriptBlockExpression { body } => {
                let body = self.text(*body)?;
                self.braced(&body, out);
            }
            Node::Member {
                target,
                member,
                is_static,
                null_conditional,
            } => {
                self.access_target(*target, *null_conditional, out)?;
                out.push_str(match (is_static, null_conditional) {
                    (true, _) => "::",
                    (false, true) => "?.",
                    (false, false) => ".",
                });
                self.member_name(*member, out)?;
            }
            Node::InvokeMember {
                target,
                member,
                arguments,
                is_static,
                null_conditional,
            } => {
                self.access_target(*target, *null_conditional, out)?;
                out.push_str(match (is_static, null_conditional) {
                    (true, _) => "::",
                    (false, true) => "?.",
                    (false, false) => ".",
                });
                self.member_name(*member, out)?;
                out.push('(');
                self.join(arguments, ", ", out)?;
                out.push(')');
            }
            Node::Index {
                target,
                index,
                null_conditional,
            } => {
                self.access_target(*target, *null_conditional, out)?;
                out.push_str(if *null_conditional { "?[" } else { "[" });
                self.emit(*index, out)?;
                out.push(']');
            }

            Node::Error { .. } => {
                return Err(ScriptError::CodeGeneration {
                    kind: "error".to_string(),
                    span: self.tree.span(id).unwrap_or_default(),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "codegen_tests.rs"]
mod tests;
