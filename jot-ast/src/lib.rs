// jot-ast - AST definitions for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Abstract syntax tree for Jot programs.
//!
//! Node shapes follow the common ECMAScript AST vocabulary
//! (`VariableDeclaration`, `CallExpression`, `ArrowFunctionExpression`,
//! and so on), restricted to the subset the Jot compiler understands.
//! Any parser that produces this shape can feed the compiler; the
//! [`builders`] module provides constructor functions for hosts and
//! tests that assemble programs directly.

/// A complete program: the ordered list of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn new(body: Vec<Stmt>) -> Self {
        Self { body }
    }
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VariableDeclaration(VariableDeclaration),
    FunctionDeclaration(FunctionDeclaration),
    ClassDeclaration(ClassDeclaration),
    IfStatement(IfStatement),
    WhileStatement(WhileStatement),
    ForStatement(ForStatement),
    BreakStatement,
    ContinueStatement,
    ReturnStatement(Option<Expr>),
    TryStatement(TryStatement),
    ThrowStatement(Expr),
    ExpressionStatement(Expr),
    BlockStatement(Vec<Stmt>),
}

/// `let`/`const`-style declaration with one or more declarators.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub declarations: Vec<Declarator>,
}

/// One `id = init` pair inside a variable declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub id: Pattern,
    pub init: Option<Expr>,
}

/// A binding target: a plain identifier or a destructuring pattern.
///
/// Destructuring elements are restricted to identifiers; nested
/// patterns, defaults, and rest elements are not part of the subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Identifier(String),
    ArrayPattern(Vec<String>),
    ObjectPattern(Vec<String>),
}

/// `function name(params) { body }` at statement position.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub function: FunctionExpr,
}

/// The common body of function declarations, function expressions,
/// arrow functions, and class methods.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub is_generator: bool,
}

impl FunctionExpr {
    pub fn new(params: Vec<String>, body: Vec<Stmt>) -> Self {
        Self {
            params,
            body,
            is_async: false,
            is_generator: false,
        }
    }
}

/// `class Name { constructor(..) {..} method(..) {..} }`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDeclaration {
    pub name: String,
    pub methods: Vec<ClassMethod>,
}

/// A single method inside a class body. The method named
/// `constructor` becomes the class constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMethod {
    pub name: String,
    pub function: FunctionExpr,
}

impl ClassMethod {
    pub fn is_constructor(&self) -> bool {
        self.name == "constructor"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    pub test: Expr,
    pub consequent: Box<Stmt>,
    pub alternate: Option<Box<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    pub test: Expr,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    pub init: Option<ForInit>,
    pub test: Option<Expr>,
    pub update: Option<Expr>,
    pub body: Box<Stmt>,
}

/// The init clause of a `for` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Declaration(VariableDeclaration),
    Expression(Expr),
}

/// `try { .. } catch (param) { .. }`. The catch parameter is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStatement {
    pub block: Vec<Stmt>,
    pub param: Option<String>,
    pub handler: Vec<Stmt>,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    NumericLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    NullLiteral,
    Identifier(String),
    ThisExpression,
    TemplateLiteral(TemplateLiteral),
    ArrayExpression(Vec<Expr>),
    ObjectExpression(Vec<ObjectProperty>),
    FunctionExpression(FunctionExpr),
    ArrowFunctionExpression(FunctionExpr),
    BinaryExpression {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryExpression {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    UpdateExpression {
        op: UpdateOp,
        prefix: bool,
        argument: Box<Expr>,
    },
    AssignmentExpression {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    CallExpression {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    NewExpression {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    MemberExpression {
        object: Box<Expr>,
        property: MemberProperty,
    },
    AwaitExpression(Box<Expr>),
    YieldExpression(Option<Box<Expr>>),
}

/// The property part of a member expression: `obj.name` or `obj[expr]`.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    Identifier(String),
    Computed(Box<Expr>),
}

/// A template literal: `quasis` always has one more element than
/// `expressions`, alternating text and interpolation.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateLiteral {
    pub quasis: Vec<String>,
    pub expressions: Vec<Expr>,
}

/// A `key: value` entry in an object literal. Shorthand methods carry
/// a `FunctionExpression` value.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperty {
    pub key: String,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
}

/// Constructor functions for assembling programs without a parser.
///
/// These exist for embedding hosts and for tests; a parser targeting
/// Jot would construct the node types directly.
pub mod builders {
    use super::*;

    pub fn program(body: Vec<Stmt>) -> Program {
        Program::new(body)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn num(value: f64) -> Expr {
        Expr::NumericLiteral(value)
    }

    pub fn string(value: &str) -> Expr {
        Expr::StringLiteral(value.to_string())
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::BooleanLiteral(value)
    }

    pub fn null() -> Expr {
        Expr::NullLiteral
    }

    pub fn ident(name: &str) -> Expr {
        Expr::Identifier(name.to_string())
    }

    pub fn this() -> Expr {
        Expr::ThisExpression
    }

    pub fn template(quasis: &[&str], expressions: Vec<Expr>) -> Expr {
        Expr::TemplateLiteral(TemplateLiteral {
            quasis: quasis.iter().map(|q| q.to_string()).collect(),
            expressions,
        })
    }

    pub fn array(elements: Vec<Expr>) -> Expr {
        Expr::ArrayExpression(elements)
    }

    pub fn object(properties: Vec<(&str, Expr)>) -> Expr {
        Expr::ObjectExpression(
            properties
                .into_iter()
                .map(|(key, value)| ObjectProperty {
                    key: key.to_string(),
                    value,
                })
                .collect(),
        )
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryExpression {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, argument: Expr) -> Expr {
        Expr::UnaryExpression {
            op,
            argument: Box::new(argument),
        }
    }

    pub fn update(op: UpdateOp, prefix: bool, argument: Expr) -> Expr {
        Expr::UpdateExpression {
            op,
            prefix,
            argument: Box::new(argument),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        assign_op(AssignOp::Assign, target, value)
    }

    pub fn assign_op(op: AssignOp, target: Expr, value: Expr) -> Expr {
        Expr::AssignmentExpression {
            op,
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn call(callee: Expr, arguments: Vec<Expr>) -> Expr {
        Expr::CallExpression {
            callee: Box::new(callee),
            arguments,
        }
    }

    /// `object.name(arguments)`: a member expression called in place.
    pub fn call_method(object: Expr, name: &str, arguments: Vec<Expr>) -> Expr {
        call(member(object, name), arguments)
    }

    pub fn new_expr(callee: Expr, arguments: Vec<Expr>) -> Expr {
        Expr::NewExpression {
            callee: Box::new(callee),
            arguments,
        }
    }

    pub fn member(object: Expr, name: &str) -> Expr {
        Expr::MemberExpression {
            object: Box::new(object),
            property: MemberProperty::Identifier(name.to_string()),
        }
    }

    pub fn index(object: Expr, idx: Expr) -> Expr {
        Expr::MemberExpression {
            object: Box::new(object),
            property: MemberProperty::Computed(Box::new(idx)),
        }
    }

    pub fn func_expr(params: &[&str], body: Vec<Stmt>) -> Expr {
        Expr::FunctionExpression(function(params, body))
    }

    pub fn arrow(params: &[&str], body: Vec<Stmt>) -> Expr {
        Expr::ArrowFunctionExpression(function(params, body))
    }

    /// An arrow whose body is a single expression; desugars to a
    /// return statement like a parser would.
    pub fn arrow_expr(params: &[&str], body: Expr) -> Expr {
        arrow(params, vec![Stmt::ReturnStatement(Some(body))])
    }

    pub fn async_func_expr(params: &[&str], body: Vec<Stmt>) -> Expr {
        let mut f = function(params, body);
        f.is_async = true;
        Expr::FunctionExpression(f)
    }

    pub fn await_expr(argument: Expr) -> Expr {
        Expr::AwaitExpression(Box::new(argument))
    }

    pub fn yield_expr(argument: Option<Expr>) -> Expr {
        Expr::YieldExpression(argument.map(Box::new))
    }

    pub fn function(params: &[&str], body: Vec<Stmt>) -> FunctionExpr {
        FunctionExpr::new(params.iter().map(|p| p.to_string()).collect(), body)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn let_decl(name: &str, init: Expr) -> Stmt {
        Stmt::VariableDeclaration(VariableDeclaration {
            declarations: vec![Declarator {
                id: Pattern::Identifier(name.to_string()),
                init: Some(init),
            }],
        })
    }

    pub fn let_uninit(name: &str) -> Stmt {
        Stmt::VariableDeclaration(VariableDeclaration {
            declarations: vec![Declarator {
                id: Pattern::Identifier(name.to_string()),
                init: None,
            }],
        })
    }

    pub fn let_array_pattern(names: &[&str], init: Expr) -> Stmt {
        Stmt::VariableDeclaration(VariableDeclaration {
            declarations: vec![Declarator {
                id: Pattern::ArrayPattern(names.iter().map(|n| n.to_string()).collect()),
                init: Some(init),
            }],
        })
    }

    pub fn let_object_pattern(names: &[&str], init: Expr) -> Stmt {
        Stmt::VariableDeclaration(VariableDeclaration {
            declarations: vec![Declarator {
                id: Pattern::ObjectPattern(names.iter().map(|n| n.to_string()).collect()),
                init: Some(init),
            }],
        })
    }

    pub fn func_decl(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
        Stmt::FunctionDeclaration(FunctionDeclaration {
            name: name.to_string(),
            function: function(params, body),
        })
    }

    pub fn async_func_decl(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
        let mut f = function(params, body);
        f.is_async = true;
        Stmt::FunctionDeclaration(FunctionDeclaration {
            name: name.to_string(),
            function: f,
        })
    }

    pub fn generator_decl(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
        let mut f = function(params, body);
        f.is_generator = true;
        Stmt::FunctionDeclaration(FunctionDeclaration {
            name: name.to_string(),
            function: f,
        })
    }

    pub fn class_decl(name: &str, methods: Vec<ClassMethod>) -> Stmt {
        Stmt::ClassDeclaration(ClassDeclaration {
            name: name.to_string(),
            methods,
        })
    }

    pub fn method(name: &str, params: &[&str], body: Vec<Stmt>) -> ClassMethod {
        ClassMethod {
            name: name.to_string(),
            function: function(params, body),
        }
    }

    pub fn expr_stmt(expr: Expr) -> Stmt {
        Stmt::ExpressionStatement(expr)
    }

    pub fn if_stmt(test: Expr, consequent: Vec<Stmt>) -> Stmt {
        Stmt::IfStatement(IfStatement {
            test,
            consequent: Box::new(Stmt::BlockStatement(consequent)),
            alternate: None,
        })
    }

    pub fn if_else(test: Expr, consequent: Vec<Stmt>, alternate: Vec<Stmt>) -> Stmt {
        Stmt::IfStatement(IfStatement {
            test,
            consequent: Box::new(Stmt::BlockStatement(consequent)),
            alternate: Some(Box::new(Stmt::BlockStatement(alternate))),
        })
    }

    pub fn while_stmt(test: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::WhileStatement(WhileStatement {
            test,
            body: Box::new(Stmt::BlockStatement(body)),
        })
    }

    pub fn for_stmt(
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Stmt>,
    ) -> Stmt {
        Stmt::ForStatement(ForStatement {
            init,
            test,
            update,
            body: Box::new(Stmt::BlockStatement(body)),
        })
    }

    pub fn for_init_decl(name: &str, init: Expr) -> Option<ForInit> {
        Some(ForInit::Declaration(VariableDeclaration {
            declarations: vec![Declarator {
                id: Pattern::Identifier(name.to_string()),
                init: Some(init),
            }],
        }))
    }

    pub fn ret(argument: Option<Expr>) -> Stmt {
        Stmt::ReturnStatement(argument)
    }

    pub fn try_catch(block: Vec<Stmt>, param: Option<&str>, handler: Vec<Stmt>) -> Stmt {
        Stmt::TryStatement(TryStatement {
            block,
            param: param.map(|p| p.to_string()),
            handler,
        })
    }

    pub fn throw_stmt(argument: Expr) -> Stmt {
        Stmt::ThrowStatement(argument)
    }

    pub fn block(body: Vec<Stmt>) -> Stmt {
        Stmt::BlockStatement(body)
    }

    pub fn brk() -> Stmt {
        Stmt::BreakStatement
    }

    pub fn cont() -> Stmt {
        Stmt::ContinueStatement
    }
}
