//! Recursive-descent parser for cellscript.
//!
//! Module syntax is lowered while parsing:
//!
//! - `import x from "m"` → `const x = (await require("m")).default`
//! - `import * as m from "m"` → `const m = await require("m")`
//! - `import { a, b as c } from "m"` → one `require`, then member reads
//! - `export const x = …` / `export function f …` / `export { a as b }` →
//!   the declaration, plus `exports.<name> = <local>` appended to the end of
//!   the module so the exported value is the final one
//! - `export default e` → `exports.default = e` in place

use std::rc::Rc;

use crate::error::Result;

use super::ast::{
    AssignOp, BinaryOp, Expr, FunctionBody, FunctionDef, LogicalOp, Program, Stmt, UnaryOp,
};
use super::lexer::{Position, Spanned, Token, tokenize};

const RESERVED: &[&str] = &[
    "let", "const", "var", "if", "else", "while", "for", "return", "import", "export",
    "function", "true", "false", "null", "undefined", "typeof", "await",
];

/// Statement and expression nesting allowed before parsing fails. Keeps
/// recursion on the native stack bounded for any input.
const MAX_NESTING_DEPTH: usize = 48;

/// Parse cell source into a [`Program`].
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

struct Parser {
    tokens: Vec<Spanned>,
    idx: usize,
    /// Nesting depth of blocks and function bodies; module syntax is only
    /// legal at depth 0.
    depth: usize,
    /// Nesting depth of function bodies; `return` needs at least one.
    function_depth: usize,
    /// Recursion depth of statements and expressions.
    nesting: usize,
    /// Trailing `exports.<name> = <local>` statements.
    deferred_exports: Vec<Stmt>,
    imports: Vec<String>,
    next_temp: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            idx: 0,
            depth: 0,
            function_depth: 0,
            nesting: 0,
            deferred_exports: Vec::new(),
            imports: Vec::new(),
            next_temp: 0,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.idx].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.idx + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn pos(&self) -> Position {
        self.tokens[self.idx].pos
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.idx].token.clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        token
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", p)))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", kw)))
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(self.pos().error("expression nested too deeply"));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn unexpected(&self, expected: &str) -> crate::error::Error {
        self.pos()
            .error(format!("expected {}, found {}", expected, self.peek()))
    }

    /// A binding name (not a reserved word).
    fn binding(&mut self) -> Result<String> {
        match self.peek().clone() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Any identifier, keywords included (property names).
    fn property_name(&mut self) -> Result<String> {
        let pos = self.pos();
        match self.bump() {
            Token::Ident(name) => Ok(name),
            Token::Str(s) => Ok(s),
            Token::Number(n) => Ok(super::value::format_number(n)),
            other => Err(pos.error(format!("expected property name, found {}", other))),
        }
    }

    fn module_name(&mut self) -> Result<String> {
        let pos = self.pos();
        match self.bump() {
            Token::Str(name) => Ok(name),
            other => Err(pos.error(format!("expected module name string, found {}", other))),
        }
    }

    fn end_statement(&mut self) {
        self.eat_punct(";");
    }

    fn temp_name(&mut self) -> String {
        let name = format!("__import{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn program(mut self) -> Result<Program> {
        let mut body = Vec::new();
        while *self.peek() != Token::Eof {
            body.extend(self.statement()?);
        }
        body.append(&mut self.deferred_exports);
        Ok(Program {
            body,
            imports: self.imports,
        })
    }

    fn statement(&mut self) -> Result<Vec<Stmt>> {
        self.nested(Self::statement_body)
    }

    fn statement_body(&mut self) -> Result<Vec<Stmt>> {
        let pos = self.pos();
        let token = self.peek().clone();
        let Token::Ident(word) = &token else {
            if self.at_punct("{") {
                return Ok(vec![self.block()?]);
            }
            if self.eat_punct(";") {
                return Ok(Vec::new());
            }
            return self.expression_statement();
        };

        match word.as_str() {
            "let" | "const" | "var" => {
                self.bump();
                let decls = self.declarations()?;
                self.end_statement();
                Ok(decls)
            }
            "function" => {
                let (name, def) = self.function_declaration()?;
                Ok(vec![Stmt::Declare {
                    name,
                    init: Some(Expr::Arrow(def)),
                }])
            }
            "async" if matches!(self.peek_at(1), Token::Ident(w) if w == "function") => {
                self.bump();
                self.statement()
            }
            "if" => {
                self.bump();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.nested_statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.nested_statement()?))
                } else {
                    None
                };
                Ok(vec![Stmt::If {
                    cond,
                    then,
                    otherwise,
                }])
            }
            "while" => {
                self.bump();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.nested_statement()?);
                Ok(vec![Stmt::While { cond, body }])
            }
            "for" => self.for_statement(),
            "return" => {
                self.bump();
                if self.function_depth == 0 {
                    return Err(pos.error("'return' outside of a function"));
                }
                let value = if self.at_punct(";") || self.at_punct("}") || *self.peek() == Token::Eof
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                Ok(vec![Stmt::Return(value)])
            }
            "import" if !matches!(self.peek_at(1), Token::Punct("(")) => {
                if self.depth > 0 {
                    return Err(pos.error("'import' is only allowed at the top level"));
                }
                self.import_declaration()
            }
            "export" => {
                if self.depth > 0 {
                    return Err(pos.error("'export' is only allowed at the top level"));
                }
                self.export_declaration()
            }
            _ => self.expression_statement(),
        }
    }

    /// A statement in a position that takes exactly one (if/while bodies).
    fn nested_statement(&mut self) -> Result<Stmt> {
        self.depth += 1;
        let stmts = self.statement();
        self.depth -= 1;
        let mut stmts = stmts?;
        Ok(if stmts.len() == 1 {
            stmts.remove(0)
        } else {
            Stmt::Block(stmts)
        })
    }

    fn block(&mut self) -> Result<Stmt> {
        self.expect_punct("{")?;
        self.depth += 1;
        let mut body = Vec::new();
        let result = loop {
            if self.eat_punct("}") {
                break Ok(());
            }
            if *self.peek() == Token::Eof {
                break Err(self.unexpected("'}'"));
            }
            match self.statement() {
                Ok(stmts) => body.extend(stmts),
                Err(e) => break Err(e),
            }
        };
        self.depth -= 1;
        result.map(|()| Stmt::Block(body))
    }

    fn declarations(&mut self) -> Result<Vec<Stmt>> {
        let mut decls = Vec::new();
        loop {
            let name = self.binding()?;
            let init = if self.eat_punct("=") {
                Some(self.expression()?)
            } else {
                None
            };
            decls.push(Stmt::Declare { name, init });
            if !self.eat_punct(",") {
                return Ok(decls);
            }
        }
    }

    fn for_statement(&mut self) -> Result<Vec<Stmt>> {
        self.expect_keyword("for")?;
        self.expect_punct("(")?;
        self.depth += 1;

        let init = if self.at_punct(";") {
            None
        } else if self.at_keyword("let") || self.at_keyword("const") || self.at_keyword("var") {
            self.bump();
            let mut decls = self.declarations()?;
            Some(Box::new(if decls.len() == 1 {
                decls.remove(0)
            } else {
                Stmt::Block(decls)
            }))
        } else {
            Some(Box::new(self.simple_statement()?))
        };
        self.expect_punct(";")?;

        let cond = if self.at_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;

        let step = if self.at_punct(")") {
            None
        } else {
            Some(Box::new(self.simple_statement()?))
        };
        self.expect_punct(")")?;
        self.depth -= 1;

        let body = Box::new(self.nested_statement()?);
        Ok(vec![Stmt::For {
            init,
            cond,
            step,
            body,
        }])
    }

    fn expression_statement(&mut self) -> Result<Vec<Stmt>> {
        let stmt = self.simple_statement()?;
        self.end_statement();
        Ok(vec![stmt])
    }

    /// Expression or assignment, without the trailing semicolon.
    fn simple_statement(&mut self) -> Result<Stmt> {
        let pos = self.pos();
        let expr = self.expression()?;
        let op = match self.peek() {
            Token::Punct("=") => AssignOp::Set,
            Token::Punct("+=") => AssignOp::Add,
            Token::Punct("-=") => AssignOp::Sub,
            Token::Punct("*=") => AssignOp::Mul,
            Token::Punct("/=") => AssignOp::Div,
            _ => return Ok(Stmt::Expr(expr)),
        };
        if !matches!(expr, Expr::Ident(..) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(pos.error("invalid assignment target"));
        }
        self.bump();
        let value = self.expression()?;
        Ok(Stmt::Assign {
            target: expr,
            op,
            value,
            pos,
        })
    }

    fn function_declaration(&mut self) -> Result<(String, Rc<FunctionDef>)> {
        self.expect_keyword("function")?;
        let name = self.binding()?;
        let def = self.function_rest()?;
        Ok((name, def))
    }

    /// `(params) { body }` of a `function`.
    fn function_rest(&mut self) -> Result<Rc<FunctionDef>> {
        self.expect_punct("(")?;
        let params = self.params()?;
        let body = self.function_block()?;
        Ok(Rc::new(FunctionDef {
            params,
            body: FunctionBody::Block(body),
        }))
    }

    /// Parameter names up to and including the closing parenthesis.
    fn params(&mut self) -> Result<Vec<String>> {
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            params.push(self.binding()?);
            if self.eat_punct(")") {
                return Ok(params);
            }
            self.expect_punct(",")?;
        }
    }

    fn function_block(&mut self) -> Result<Vec<Stmt>> {
        self.function_depth += 1;
        let block = self.block();
        self.function_depth -= 1;
        match block? {
            Stmt::Block(body) => Ok(body),
            other => Ok(vec![other]),
        }
    }

    // ---------------------------------------------------------------------
    // Module syntax
    // ---------------------------------------------------------------------

    fn require_call(module: String, pos: Position) -> Expr {
        Expr::Await(
            Box::new(Expr::Call {
                callee: Box::new(Expr::Ident("require".into(), pos)),
                args: vec![Expr::Str(module.into())],
                pos,
            }),
            pos,
        )
    }

    fn import_declaration(&mut self) -> Result<Vec<Stmt>> {
        let pos = self.pos();
        self.expect_keyword("import")?;

        // import "side-effect";
        if let Token::Str(_) = self.peek() {
            let module = self.module_name()?;
            self.end_statement();
            self.imports.push(module.clone());
            return Ok(vec![Stmt::Expr(Self::require_call(module, pos))]);
        }

        enum Clause {
            Default(String),
            Namespace(String),
            Named(Vec<(String, String)>),
        }

        let clause = if self.eat_punct("*") {
            self.expect_keyword("as")?;
            Clause::Namespace(self.binding()?)
        } else if self.eat_punct("{") {
            let mut names = Vec::new();
            while !self.eat_punct("}") {
                let imported = self.property_name()?;
                let local = if self.eat_keyword("as") {
                    self.binding()?
                } else {
                    imported.clone()
                };
                names.push((imported, local));
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            Clause::Named(names)
        } else {
            Clause::Default(self.binding()?)
        };

        self.expect_keyword("from")?;
        let module = self.module_name()?;
        self.end_statement();
        self.imports.push(module.clone());

        let required = Self::require_call(module, pos);
        Ok(match clause {
            Clause::Default(name) => vec![Stmt::Declare {
                name,
                init: Some(Expr::Member {
                    object: Box::new(required),
                    property: "default".into(),
                    pos,
                }),
            }],
            Clause::Namespace(name) => vec![Stmt::Declare {
                name,
                init: Some(required),
            }],
            Clause::Named(names) => {
                let temp = self.temp_name();
                let mut stmts = vec![Stmt::Declare {
                    name: temp.clone(),
                    init: Some(required),
                }];
                for (imported, local) in names {
                    stmts.push(Stmt::Declare {
                        name: local,
                        init: Some(Expr::Member {
                            object: Box::new(Expr::Ident(temp.clone(), pos)),
                            property: imported,
                            pos,
                        }),
                    });
                }
                stmts
            }
        })
    }

    fn export_assignment(exported: String, value: Expr, pos: Position) -> Stmt {
        Stmt::Assign {
            target: Expr::Member {
                object: Box::new(Expr::Ident("exports".into(), pos)),
                property: exported,
                pos,
            },
            op: AssignOp::Set,
            value,
            pos,
        }
    }

    fn export_declaration(&mut self) -> Result<Vec<Stmt>> {
        let pos = self.pos();
        self.expect_keyword("export")?;

        if self.eat_keyword("default") {
            let value = self.expression()?;
            self.end_statement();
            return Ok(vec![Self::export_assignment("default".into(), value, pos)]);
        }

        if self.eat_punct("{") {
            while !self.eat_punct("}") {
                let local = self.binding()?;
                let exported = if self.eat_keyword("as") {
                    self.property_name()?
                } else {
                    local.clone()
                };
                self.deferred_exports.push(Self::export_assignment(
                    exported,
                    Expr::Ident(local, pos),
                    pos,
                ));
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            self.end_statement();
            return Ok(Vec::new());
        }

        self.eat_keyword("async");
        let decls = if self.at_keyword("function") {
            let (name, def) = self.function_declaration()?;
            vec![Stmt::Declare {
                name,
                init: Some(Expr::Arrow(def)),
            }]
        } else if self.eat_keyword("let") || self.eat_keyword("const") || self.eat_keyword("var") {
            let decls = self.declarations()?;
            self.end_statement();
            decls
        } else {
            return Err(self.unexpected("declaration after 'export'"));
        };

        for decl in &decls {
            if let Stmt::Declare { name, .. } = decl {
                self.deferred_exports.push(Self::export_assignment(
                    name.clone(),
                    Expr::Ident(name.clone(), pos),
                    pos,
                ));
            }
        }
        Ok(decls)
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr> {
        self.nested(Self::expression_body)
    }

    fn expression_body(&mut self) -> Result<Expr> {
        if self.at_keyword("async") && self.arrow_ahead(1) {
            self.bump();
        }
        if self.arrow_ahead(0) {
            return self.arrow();
        }
        self.conditional()
    }

    /// Whether an arrow function starts `offset` tokens ahead.
    fn arrow_ahead(&self, offset: usize) -> bool {
        match self.peek_at(offset) {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_at(offset + 1), Token::Punct("=>"))
            }
            Token::Punct("(") => {
                let mut depth = 0usize;
                let mut i = offset;
                loop {
                    match self.peek_at(i) {
                        Token::Punct("(") => depth += 1,
                        Token::Punct(")") => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(self.peek_at(i + 1), Token::Punct("=>"));
                            }
                        }
                        Token::Eof => return false,
                        _ => {}
                    }
                    i += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr> {
        let params = if self.eat_punct("(") {
            self.params()?
        } else {
            vec![self.binding()?]
        };
        self.expect_punct("=>")?;

        let body = if self.at_punct("{") {
            FunctionBody::Block(self.function_block()?)
        } else {
            self.depth += 1;
            self.function_depth += 1;
            let expr = self.expression();
            self.function_depth -= 1;
            self.depth -= 1;
            FunctionBody::Expr(expr?)
        };
        Ok(Expr::Arrow(Rc::new(FunctionDef { params, body })))
    }

    fn conditional(&mut self) -> Result<Expr> {
        let cond = self.nullish()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect_punct(":")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_chain(
        &mut self,
        punct: &str,
        op: LogicalOp,
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while self.eat_punct(punct) {
            let right = next(self)?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn nullish(&mut self) -> Result<Expr> {
        self.logical_chain("??", LogicalOp::Nullish, Self::or)
    }

    fn or(&mut self) -> Result<Expr> {
        self.logical_chain("||", LogicalOp::Or, Self::and)
    }

    fn and(&mut self) -> Result<Expr> {
        self.logical_chain("&&", LogicalOp::And, Self::equality)
    }

    fn binary_chain(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.at_punct(punct) {
                    let pos = self.pos();
                    self.bump();
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                        pos,
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_chain(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr> {
        self.binary_chain(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_chain(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_chain(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::exponent,
        )
    }

    fn exponent(&mut self) -> Result<Expr> {
        let base = self.unary()?;
        if self.at_punct("**") {
            let pos = self.pos();
            self.bump();
            let exp = self.nested(Self::exponent)?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exp),
                pos,
            });
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_keyword("typeof") {
            UnaryOp::TypeOf
        } else if self.eat_keyword("await") {
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Await(Box::new(operand), pos));
        } else {
            return self.postfix();
        };
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            let pos = self.pos();
            if self.eat_punct(".") {
                let name_pos = self.pos();
                let property = match self.bump() {
                    Token::Ident(name) => name,
                    other => {
                        return Err(
                            name_pos.error(format!("expected property name, found {}", other))
                        );
                    }
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    pos,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    pos,
                };
            } else if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
            if self.eat_punct(")") {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let pos = self.pos();
        match self.bump() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s.into())),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "function" => {
                    if matches!(self.peek(), Token::Ident(n) if !RESERVED.contains(&n.as_str())) {
                        self.bump();
                    }
                    Ok(Expr::Arrow(self.function_rest()?))
                }
                // `import("m")` is a dynamic require.
                "import" => {
                    self.expect_punct("(")?;
                    let args = self.arguments()?;
                    Ok(Expr::Call {
                        callee: Box::new(Expr::Ident("require".into(), pos)),
                        args,
                        pos,
                    })
                }
                _ if RESERVED.contains(&name.as_str()) => {
                    Err(pos.error(format!("unexpected keyword '{}'", name)))
                }
                _ => Ok(Expr::Ident(name, pos)),
            },
            Token::Punct("(") => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.expression()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::Punct("{") => {
                let mut props = Vec::new();
                while !self.eat_punct("}") {
                    let key_pos = self.pos();
                    let shorthand = matches!(self.peek(), Token::Ident(_));
                    let key = self.property_name()?;
                    let value = if self.eat_punct(":") {
                        self.expression()?
                    } else if shorthand {
                        Expr::Ident(key.clone(), key_pos)
                    } else {
                        return Err(self.unexpected("':'"));
                    };
                    props.push((key, value));
                    if !self.eat_punct(",") {
                        self.expect_punct("}")?;
                        break;
                    }
                }
                Ok(Expr::Object(props))
            }
            other => Err(pos.error(format!("unexpected {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_program(source).unwrap().body
    }

    #[test]
    fn test_declarations_and_exports() {
        let body = parse("let x=4;let y=6;let sum=x+y;exports.sum=sum;exports.default=sum;");
        assert_eq!(body.len(), 5);
        assert!(matches!(&body[0], Stmt::Declare { name, .. } if name == "x"));
        assert!(matches!(
            &body[3],
            Stmt::Assign { target: Expr::Member { property, .. }, .. } if property == "sum"
        ));
    }

    #[test]
    fn test_context_read() {
        let body = parse("exports.default = $.sum - 5;");
        let Stmt::Assign { value, .. } = &body[0] else {
            panic!("expected assignment");
        };
        let Expr::Binary { op, left, .. } = value else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Sub);
        assert!(matches!(&**left, Expr::Member { property, .. } if property == "sum"));
    }

    #[test]
    fn test_export_const_is_deferred_to_end() {
        let body = parse("export const a = 1; a = 2;");
        assert_eq!(body.len(), 3);
        assert!(matches!(
            &body[2],
            Stmt::Assign { target: Expr::Member { property, .. }, value: Expr::Ident(local, _), .. }
                if property == "a" && local == "a"
        ));
    }

    #[test]
    fn test_import_forms_are_lowered() {
        let program = parse_program(
            r#"import d from "m1"; import * as ns from "m2"; import { a, b as c } from "m3";"#,
        )
        .unwrap();
        assert_eq!(program.imports, vec!["m1", "m2", "m3"]);
        // d, ns, temp, a, c
        assert_eq!(program.body.len(), 5);
        assert!(matches!(
            &program.body[0],
            Stmt::Declare { init: Some(Expr::Member { property, .. }), .. } if property == "default"
        ));
        assert!(matches!(
            &program.body[1],
            Stmt::Declare { init: Some(Expr::Await(..)), .. }
        ));
    }

    #[test]
    fn test_arrow_functions() {
        let body = parse("const f = (a, b) => a + b; const g = x => { return x * 2; };");
        let Stmt::Declare { init: Some(Expr::Arrow(def)), .. } = &body[0] else {
            panic!("expected arrow");
        };
        assert_eq!(def.params, vec!["a", "b"]);
        assert!(matches!(def.body, FunctionBody::Expr(_)));
        let Stmt::Declare { init: Some(Expr::Arrow(def)), .. } = &body[1] else {
            panic!("expected arrow");
        };
        assert!(matches!(def.body, FunctionBody::Block(_)));
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        let body = parse("let v = (1 + 2) * 3;");
        assert!(matches!(
            &body[0],
            Stmt::Declare { init: Some(Expr::Binary { op: BinaryOp::Mul, .. }), .. }
        ));
    }

    #[test]
    fn test_exponent_is_right_associative() {
        let body = parse("2 ** 3 ** 2;");
        let Stmt::Expr(Expr::Binary { right, .. }) = &body[0] else {
            panic!("expected binary");
        };
        assert!(matches!(&**right, Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn test_control_flow() {
        let body = parse("let t = 0; for (let i = 0; i < 3; i += 1) { if (i % 2 === 0) t += i; else { t -= 1; } } while (t > 0) t -= 1;");
        assert!(matches!(body[1], Stmt::For { .. }));
        assert!(matches!(body[2], Stmt::While { .. }));
    }

    #[test]
    fn test_import_inside_block_is_rejected() {
        let err = parse_program("{ import x from \"m\"; }").unwrap_err();
        assert!(matches!(err, Error::Parse { message, .. } if message.contains("top level")));
    }

    fn nested_parens(levels: usize) -> String {
        format!("exports.default = {}1{};", "(".repeat(levels), ")".repeat(levels))
    }

    #[test]
    fn test_nesting_limit() {
        // The statement and the assigned expression take two levels.
        let deepest = MAX_NESTING_DEPTH - 2;
        assert!(parse_program(&nested_parens(deepest)).is_ok());

        let err = parse_program(&nested_parens(deepest + 1)).unwrap_err();
        assert!(matches!(err, Error::Parse { message, .. } if message.contains("nested too deeply")));
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        for source in [
            nested_parens(10_000),
            format!("exports.x = {}1;", "-".repeat(10_000)),
            format!("exports.x = {}1{};", "[".repeat(10_000), "]".repeat(10_000)),
            format!("exports.x = f{}{};", "(f".repeat(10_000), ")".repeat(10_000)),
            format!("{}{}", "{".repeat(10_000), "}".repeat(10_000)),
        ] {
            let err = parse_program(&source).unwrap_err();
            assert!(matches!(err, Error::Parse { message, .. } if message.contains("nested too deeply")));
        }
    }

    #[test]
    fn test_return_outside_function_is_rejected() {
        assert!(parse_program("return 1;").is_err());
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse_program("let x = ;").unwrap_err();
        assert_eq!(
            err,
            Error::Parse {
                line: 1,
                column: 9,
                message: "unexpected ';'".into()
            }
        );
    }

    #[test]
    fn test_object_literal_shorthand() {
        let body = parse("let o = { a, 'b': 2, c: [1, 2,] };");
        let Stmt::Declare { init: Some(Expr::Object(props)), .. } = &body[0] else {
            panic!("expected object");
        };
        let keys: Vec<_> = props.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
