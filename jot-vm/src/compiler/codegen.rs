// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Code generation: lowers the AST to bytecode.
//!
//! The compiler is a single pass. Function bodies nest by pushing a
//! fresh state onto the state stack; identifier resolution walks that
//! stack outward, marking captured locals and threading transitive
//! upvalues through every intermediate function.

use std::rc::Rc;

use jot_ast::{
    AssignOp, BinaryOp, ClassDeclaration, Declarator, Expr, ForInit, ForStatement, FunctionExpr,
    IfStatement, MemberProperty, Pattern, Program, Stmt, TemplateLiteral, TryStatement, UnaryOp,
    UpdateOp, VariableDeclaration, WhileStatement,
};

use crate::chunk::{Function, UpvalueDesc};
use crate::opcode::OpCode;
use crate::value::Value;

use super::types::{CompileError, FuncState, FunctionKind, Result};

/// Global names resolved through `GetNative` rather than the globals
/// map.
const NATIVE_NAMES: &[&str] = &["console", "Math", "performance", "Date", "Object", "Promise"];

/// Where an identifier resolved.
enum VarRef {
    Local(u8),
    Upvalue(u8),
    Native,
    Global,
}

/// Compile a program into its main function.
pub fn compile(program: &Program) -> Result<Function> {
    let mut compiler = Compiler {
        states: vec![FuncState::script()],
    };
    compiler.compile_program(program)?;
    let state = compiler.states.pop().expect("script state");
    Ok(state.into_function())
}

pub struct Compiler {
    pub(crate) states: Vec<FuncState>,
}

impl Compiler {
    fn compile_program(&mut self, program: &Program) -> Result<()> {
        let mut ended_with_return = false;
        for (i, stmt) in program.body.iter().enumerate() {
            let last = i + 1 == program.body.len();
            if last {
                // The final top-level expression is the script's
                // completion value.
                if let Stmt::ExpressionStatement(expr) = stmt {
                    self.compile_expr(expr)?;
                    self.emit_op(OpCode::Return);
                    ended_with_return = true;
                    continue;
                }
            }
            self.compile_stmt(stmt)?;
        }
        if !ended_with_return {
            self.emit_op(OpCode::PushNull);
            self.emit_op(OpCode::Return);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::VariableDeclaration(decl) => self.compile_variable_declaration(decl),
            Stmt::FunctionDeclaration(decl) => {
                self.compile_function(&decl.name, &decl.function, FunctionKind::Function)?;
                self.define_binding(&decl.name)
            }
            Stmt::ClassDeclaration(decl) => self.compile_class(decl),
            Stmt::IfStatement(stmt) => self.compile_if(stmt),
            Stmt::WhileStatement(stmt) => self.compile_while(stmt),
            Stmt::ForStatement(stmt) => self.compile_for(stmt),
            Stmt::BreakStatement => self.compile_break(),
            Stmt::ContinueStatement => self.compile_continue(),
            Stmt::ReturnStatement(argument) => self.compile_return(argument.as_ref()),
            Stmt::TryStatement(stmt) => self.compile_try(stmt),
            Stmt::ThrowStatement(argument) => {
                self.compile_expr(argument)?;
                self.emit_op(OpCode::Throw);
                Ok(())
            }
            Stmt::ExpressionStatement(expr) => self.compile_expression_statement(expr),
            Stmt::BlockStatement(body) => {
                self.begin_scope();
                for stmt in body {
                    self.compile_stmt(stmt)?;
                }
                self.end_scope();
                Ok(())
            }
        }
    }

    fn compile_expression_statement(&mut self, expr: &Expr) -> Result<()> {
        // `obj.prop++;` in statement position: discard mode leaves the
        // receiver for the trailing pop instead of the stale value.
        if let Expr::UpdateExpression { op, argument, .. } = expr {
            if let Expr::MemberExpression {
                object,
                property: MemberProperty::Identifier(name),
            } = argument.as_ref()
            {
                self.compile_expr(object)?;
                let idx = self.name_constant(name)?;
                self.emit_op(match op {
                    UpdateOp::Increment => OpCode::IncProp,
                    UpdateOp::Decrement => OpCode::DecProp,
                });
                self.emit_byte(idx);
                self.emit_byte(2);
                self.emit_op(OpCode::Pop);
                return Ok(());
            }
        }
        self.compile_expr(expr)?;
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    fn compile_variable_declaration(&mut self, decl: &VariableDeclaration) -> Result<()> {
        for declarator in &decl.declarations {
            match &declarator.id {
                Pattern::Identifier(name) => {
                    match &declarator.init {
                        Some(init) => self.compile_expr(init)?,
                        None => self.emit_op(OpCode::PushNull),
                    }
                    self.define_binding(name)?;
                }
                Pattern::ArrayPattern(names) => {
                    self.compile_destructuring(declarator, names, true)?;
                }
                Pattern::ObjectPattern(names) => {
                    self.compile_destructuring(declarator, names, false)?;
                }
            }
        }
        Ok(())
    }

    /// Destructuring evaluates the source once, then extracts each
    /// element with `GetIndex` (numeric for arrays, string-keyed for
    /// objects). At module depth the source stays on the stack and is
    /// duplicated per element; inside functions it becomes a scratch
    /// local so every extraction sees the original reference.
    fn compile_destructuring(
        &mut self,
        declarator: &Declarator,
        names: &[String],
        is_array: bool,
    ) -> Result<()> {
        match &declarator.init {
            Some(init) => self.compile_expr(init)?,
            None => self.emit_op(OpCode::PushNull),
        }
        if self.at_global_scope() {
            for (i, name) in names.iter().enumerate() {
                self.emit_op(OpCode::Duplicate);
                let key = if is_array {
                    Value::Number(i as f64)
                } else {
                    Value::string(name.as_str())
                };
                self.emit_const(key)?;
                self.emit_op(OpCode::GetIndex);
                let idx = self.name_constant(name)?;
                self.emit_op(OpCode::DefineGlobal);
                self.emit_byte(idx);
            }
            self.emit_op(OpCode::Pop);
        } else {
            let source_slot = self.declare_tmp_local()?;
            for (i, name) in names.iter().enumerate() {
                self.emit_op(OpCode::GetLocal);
                self.emit_byte(source_slot);
                let key = if is_array {
                    Value::Number(i as f64)
                } else {
                    Value::string(name.as_str())
                };
                self.emit_const(key)?;
                self.emit_op(OpCode::GetIndex);
                self.declare_local(name)?;
            }
        }
        Ok(())
    }

    fn compile_if(&mut self, stmt: &IfStatement) -> Result<()> {
        self.compile_expr(&stmt.test)?;
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.compile_stmt(&stmt.consequent)?;
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump)?;
        self.emit_op(OpCode::Pop);
        if let Some(alternate) = &stmt.alternate {
            self.compile_stmt(alternate)?;
        }
        self.patch_jump(end_jump)
    }

    fn compile_while(&mut self, stmt: &WhileStatement) -> Result<()> {
        let loop_start = self.current_offset();
        self.compile_expr(&stmt.test)?;
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.begin_loop(Some(loop_start));
        self.compile_stmt(&stmt.body)?;
        let context = self.end_loop();
        self.emit_loop(loop_start)?;
        self.patch_jump(exit_jump)?;
        self.emit_op(OpCode::Pop);
        for jump in context.break_jumps {
            self.patch_jump(jump)?;
        }
        Ok(())
    }

    fn compile_for(&mut self, stmt: &ForStatement) -> Result<()> {
        self.begin_scope();
        match &stmt.init {
            Some(ForInit::Declaration(decl)) => self.compile_variable_declaration(decl)?,
            Some(ForInit::Expression(expr)) => {
                self.compile_expr(expr)?;
                self.emit_op(OpCode::Pop);
            }
            None => {}
        }
        let loop_start = self.current_offset();
        let exit_jump = match &stmt.test {
            Some(test) => {
                self.compile_expr(test)?;
                let jump = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                Some(jump)
            }
            None => None,
        };
        // Without an update clause, continue can target the condition
        // directly; otherwise it jumps forward to the update.
        let continue_target = if stmt.update.is_some() {
            None
        } else {
            Some(loop_start)
        };
        self.begin_loop(continue_target);
        self.compile_stmt(&stmt.body)?;
        let context = self.end_loop();
        for jump in context.continue_jumps {
            self.patch_jump(jump)?;
        }
        if let Some(update) = &stmt.update {
            self.compile_expr(update)?;
            self.emit_op(OpCode::Pop);
        }
        self.emit_loop(loop_start)?;
        if let Some(jump) = exit_jump {
            self.patch_jump(jump)?;
            self.emit_op(OpCode::Pop);
        }
        for jump in context.break_jumps {
            self.patch_jump(jump)?;
        }
        self.end_scope();
        Ok(())
    }

    fn compile_break(&mut self) -> Result<()> {
        if self.state_ref().loops.is_empty() {
            return Err(CompileError::BreakOutsideLoop);
        }
        self.emit_loop_exit_cleanup();
        let jump = self.emit_jump(OpCode::Jump);
        self.state()
            .loops
            .last_mut()
            .expect("loop context")
            .break_jumps
            .push(jump);
        Ok(())
    }

    fn compile_continue(&mut self) -> Result<()> {
        let target = match self.state_ref().loops.last() {
            Some(context) => context.continue_target,
            None => return Err(CompileError::ContinueOutsideLoop),
        };
        self.emit_loop_exit_cleanup();
        match target {
            Some(target) => self.emit_loop(target)?,
            None => {
                let jump = self.emit_jump(OpCode::Jump);
                self.state()
                    .loops
                    .last_mut()
                    .expect("loop context")
                    .continue_jumps
                    .push(jump);
            }
        }
        Ok(())
    }

    fn compile_return(&mut self, argument: Option<&Expr>) -> Result<()> {
        let (kind, try_depth) = {
            let state = self.state_ref();
            (state.kind, state.try_depth)
        };
        if kind == FunctionKind::Script {
            return Err(CompileError::ReturnOutsideFunction);
        }
        // Leaving try blocks early must unwind their handler records.
        for _ in 0..try_depth {
            self.emit_op(OpCode::PopCatch);
        }
        if kind == FunctionKind::Constructor {
            if argument.is_some() {
                return Err(CompileError::ReturnValueInConstructor);
            }
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            match argument {
                Some(expr) => self.compile_expr(expr)?,
                None => self.emit_op(OpCode::PushNull),
            }
        }
        self.emit_op(OpCode::Return);
        Ok(())
    }

    fn compile_try(&mut self, stmt: &TryStatement) -> Result<()> {
        let setup = self.emit_jump(OpCode::SetupTry);
        self.state().try_depth += 1;
        self.begin_scope();
        for s in &stmt.block {
            self.compile_stmt(s)?;
        }
        self.end_scope();
        self.state().try_depth -= 1;
        self.emit_op(OpCode::PopCatch);
        let end_jump = self.emit_jump(OpCode::Jump);

        // Catch entry: the thrown value is on the stack.
        self.patch_jump(setup)?;
        self.begin_scope();
        match &stmt.param {
            Some(param) => {
                self.declare_local(param)?;
            }
            None => self.emit_op(OpCode::Pop),
        }
        for s in &stmt.handler {
            self.compile_stmt(s)?;
        }
        self.end_scope();
        self.patch_jump(end_jump)
    }

    fn compile_class(&mut self, decl: &ClassDeclaration) -> Result<()> {
        let synthetic;
        let constructor = match decl.methods.iter().find(|m| m.is_constructor()) {
            Some(method) => &method.function,
            None => {
                synthetic = FunctionExpr::new(Vec::new(), Vec::new());
                &synthetic
            }
        };
        self.compile_function(&decl.name, constructor, FunctionKind::Constructor)?;
        self.define_binding(&decl.name)?;

        for method in decl.methods.iter().filter(|m| !m.is_constructor()) {
            self.compile_identifier_load(&decl.name)?;
            self.emit_op(OpCode::GetPrototype);
            self.compile_function(&method.name, &method.function, FunctionKind::Method)?;
            let idx = self.name_constant(&method.name)?;
            self.emit_op(OpCode::SetProp);
            self.emit_byte(idx);
            self.emit_op(OpCode::Pop);
        }
        Ok(())
    }

    /// Compile a nested function body and emit its `Closure`
    /// instruction (with capture descriptors) in the enclosing state.
    fn compile_function(
        &mut self,
        name: &str,
        func: &FunctionExpr,
        kind: FunctionKind,
    ) -> Result<()> {
        if func.is_async && func.is_generator {
            return Err(CompileError::AsyncGenerator);
        }
        if func.params.len() > 255 {
            return Err(CompileError::TooManyParameters);
        }
        let slot0_name = match kind {
            FunctionKind::Method | FunctionKind::Constructor => "this",
            FunctionKind::Function => name,
            FunctionKind::Script => "",
        };
        self.states.push(FuncState::new(
            name,
            slot0_name,
            kind,
            func.is_async,
            func.is_generator,
        ));
        for param in &func.params {
            self.declare_local(param)?;
        }
        self.state().arity = func.params.len() as u8;
        for stmt in &func.body {
            self.compile_stmt(stmt)?;
        }
        if kind == FunctionKind::Constructor {
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::PushNull);
        }
        self.emit_op(OpCode::Return);

        let state = self.states.pop().expect("function state");
        let function = Rc::new(state.into_function());
        let idx = self.add_constant(Value::Function(function.clone()))?;
        self.emit_op(OpCode::Closure);
        self.emit_byte(idx);
        for upvalue in function.upvalues.iter() {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::NumericLiteral(n) => self.emit_const(Value::Number(*n)),
            Expr::StringLiteral(s) => self.emit_const(Value::string(s.as_str())),
            Expr::BooleanLiteral(true) => {
                self.emit_op(OpCode::PushTrue);
                Ok(())
            }
            Expr::BooleanLiteral(false) => {
                self.emit_op(OpCode::PushFalse);
                Ok(())
            }
            Expr::NullLiteral => {
                self.emit_op(OpCode::PushNull);
                Ok(())
            }
            Expr::Identifier(name) => self.compile_identifier_load(name),
            Expr::ThisExpression => {
                self.emit_op(OpCode::GetLocal);
                self.emit_byte(0);
                Ok(())
            }
            Expr::TemplateLiteral(template) => self.compile_template(template),
            Expr::ArrayExpression(elements) => {
                if elements.len() > 255 {
                    return Err(CompileError::TooManyArguments);
                }
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit_op(OpCode::NewArray);
                self.emit_byte(elements.len() as u8);
                Ok(())
            }
            Expr::ObjectExpression(properties) => {
                if properties.len() > 255 {
                    return Err(CompileError::TooManyArguments);
                }
                for property in properties {
                    self.emit_const(Value::string(property.key.as_str()))?;
                    self.compile_expr(&property.value)?;
                }
                self.emit_op(OpCode::NewObject);
                self.emit_byte(properties.len() as u8);
                Ok(())
            }
            Expr::FunctionExpression(func) | Expr::ArrowFunctionExpression(func) => {
                self.compile_function("", func, FunctionKind::Function)
            }
            Expr::BinaryExpression { op, left, right } => self.compile_binary(*op, left, right),
            Expr::UnaryExpression { op, argument } => {
                self.compile_expr(argument)?;
                self.emit_op(match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Not => OpCode::Not,
                });
                Ok(())
            }
            Expr::UpdateExpression {
                op,
                prefix,
                argument,
            } => self.compile_update(*op, *prefix, argument),
            Expr::AssignmentExpression { op, target, value } => {
                self.compile_assignment(*op, target, value)
            }
            Expr::CallExpression { callee, arguments } => self.compile_call(callee, arguments),
            Expr::NewExpression { callee, arguments } => {
                if arguments.len() > 255 {
                    return Err(CompileError::TooManyArguments);
                }
                self.compile_expr(callee)?;
                for argument in arguments {
                    self.compile_expr(argument)?;
                }
                self.emit_op(OpCode::New);
                self.emit_byte(arguments.len() as u8);
                Ok(())
            }
            Expr::MemberExpression { object, property } => {
                self.compile_expr(object)?;
                match property {
                    MemberProperty::Identifier(name) => {
                        let idx = self.name_constant(name)?;
                        self.emit_op(OpCode::GetProp);
                        self.emit_byte(idx);
                    }
                    MemberProperty::Computed(key) => {
                        self.compile_expr(key)?;
                        self.emit_op(OpCode::GetIndex);
                    }
                }
                Ok(())
            }
            Expr::AwaitExpression(argument) => {
                if !self.state_ref().is_async {
                    return Err(CompileError::AwaitOutsideAsync);
                }
                self.compile_expr(argument)?;
                self.emit_op(OpCode::Await);
                Ok(())
            }
            Expr::YieldExpression(argument) => {
                if !self.state_ref().is_generator {
                    return Err(CompileError::YieldOutsideGenerator);
                }
                match argument {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_op(OpCode::PushNull),
                }
                self.emit_op(OpCode::Yield);
                Ok(())
            }
        }
    }

    fn compile_template(&mut self, template: &TemplateLiteral) -> Result<()> {
        let first = template.quasis.first().map(String::as_str).unwrap_or("");
        self.emit_const(Value::string(first))?;
        for (i, expr) in template.expressions.iter().enumerate() {
            self.compile_expr(expr)?;
            self.emit_op(OpCode::Add);
            let quasi = template.quasis.get(i + 1).map(String::as_str).unwrap_or("");
            self.emit_const(Value::string(quasi))?;
            self.emit_op(OpCode::Add);
        }
        Ok(())
    }

    fn compile_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<()> {
        match op {
            BinaryOp::And => {
                self.compile_expr(left)?;
                let end = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.compile_expr(right)?;
                self.patch_jump(end)
            }
            BinaryOp::Or => {
                self.compile_expr(left)?;
                let rhs = self.emit_jump(OpCode::JumpIfFalse);
                let end = self.emit_jump(OpCode::Jump);
                self.patch_jump(rhs)?;
                self.emit_op(OpCode::Pop);
                self.compile_expr(right)?;
                self.patch_jump(end)
            }
            _ => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit_op(binary_opcode(op));
                Ok(())
            }
        }
    }

    fn compile_update(&mut self, op: UpdateOp, prefix: bool, argument: &Expr) -> Result<()> {
        match argument {
            Expr::Identifier(name) => {
                let var = self.resolve_variable(name)?;
                if prefix {
                    self.emit_var_update(op, &var, name)?;
                    self.emit_var_load(&var, name)?;
                } else {
                    self.emit_var_load(&var, name)?;
                    self.emit_var_update(op, &var, name)?;
                }
                Ok(())
            }
            Expr::MemberExpression { object, property } => match property {
                MemberProperty::Identifier(name) => {
                    self.compile_expr(object)?;
                    let idx = self.name_constant(name)?;
                    self.emit_op(match op {
                        UpdateOp::Increment => OpCode::IncProp,
                        UpdateOp::Decrement => OpCode::DecProp,
                    });
                    self.emit_byte(idx);
                    self.emit_byte(if prefix { 1 } else { 0 });
                    Ok(())
                }
                MemberProperty::Computed(_) => Err(CompileError::ComputedUpdateTarget),
            },
            _ => Err(CompileError::InvalidAssignmentTarget),
        }
    }

    fn compile_assignment(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Result<()> {
        match target {
            Expr::Identifier(name) => {
                let var = self.resolve_variable(name)?;
                if op != AssignOp::Assign {
                    self.emit_var_load(&var, name)?;
                }
                self.compile_expr(value)?;
                if let Some(arith) = compound_opcode(op) {
                    self.emit_op(arith);
                }
                self.emit_var_store(&var, name)
            }
            Expr::MemberExpression { object, property } => match property {
                MemberProperty::Identifier(name) => {
                    self.compile_expr(object)?;
                    if name == "__proto__" && op == AssignOp::Assign {
                        self.compile_expr(value)?;
                        self.emit_op(OpCode::SetPrototype);
                        return Ok(());
                    }
                    if op != AssignOp::Assign {
                        self.emit_op(OpCode::Duplicate);
                        let idx = self.name_constant(name)?;
                        self.emit_op(OpCode::GetProp);
                        self.emit_byte(idx);
                    }
                    self.compile_expr(value)?;
                    if let Some(arith) = compound_opcode(op) {
                        self.emit_op(arith);
                    }
                    let idx = self.name_constant(name)?;
                    self.emit_op(OpCode::SetProp);
                    self.emit_byte(idx);
                    Ok(())
                }
                MemberProperty::Computed(key) => {
                    self.compile_expr(object)?;
                    self.compile_expr(key)?;
                    if op != AssignOp::Assign {
                        // The target pair is re-evaluated for the read;
                        // there is no two-slot duplicate instruction.
                        self.compile_expr(object)?;
                        self.compile_expr(key)?;
                        self.emit_op(OpCode::GetIndex);
                    }
                    self.compile_expr(value)?;
                    if let Some(arith) = compound_opcode(op) {
                        self.emit_op(arith);
                    }
                    self.emit_op(OpCode::SetIndex);
                    Ok(())
                }
            },
            _ => Err(CompileError::InvalidAssignmentTarget),
        }
    }

    fn compile_call(&mut self, callee: &Expr, arguments: &[Expr]) -> Result<()> {
        if arguments.len() > 255 {
            return Err(CompileError::TooManyArguments);
        }
        if let Expr::MemberExpression {
            object,
            property: MemberProperty::Identifier(name),
        } = callee
        {
            // `Object.create(proto)` lowers to its dedicated opcode when
            // `Object` still refers to the native.
            if name == "create" && arguments.len() == 1 {
                if let Expr::Identifier(object_name) = object.as_ref() {
                    if object_name == "Object"
                        && matches!(self.resolve_variable("Object")?, VarRef::Native)
                    {
                        self.compile_expr(&arguments[0])?;
                        self.emit_op(OpCode::ObjectCreate);
                        return Ok(());
                    }
                }
            }
            self.compile_expr(object)?;
            for argument in arguments {
                self.compile_expr(argument)?;
            }
            let idx = self.name_constant(name)?;
            self.emit_op(OpCode::CallMethod);
            self.emit_byte(idx);
            self.emit_byte(arguments.len() as u8);
            return Ok(());
        }
        self.compile_expr(callee)?;
        for argument in arguments {
            self.compile_expr(argument)?;
        }
        self.emit_op(OpCode::Call);
        self.emit_byte(arguments.len() as u8);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identifier resolution
    // ------------------------------------------------------------------

    fn compile_identifier_load(&mut self, name: &str) -> Result<()> {
        let var = self.resolve_variable(name)?;
        self.emit_var_load(&var, name)
    }

    fn emit_var_load(&mut self, var: &VarRef, name: &str) -> Result<()> {
        match var {
            VarRef::Local(slot) => {
                self.emit_op(OpCode::GetLocal);
                self.emit_byte(*slot);
            }
            VarRef::Upvalue(index) => {
                self.emit_op(OpCode::GetUpvalue);
                self.emit_byte(*index);
            }
            VarRef::Native => {
                let idx = self.name_constant(name)?;
                self.emit_op(OpCode::GetNative);
                self.emit_byte(idx);
            }
            VarRef::Global => {
                let idx = self.name_constant(name)?;
                self.emit_op(OpCode::GetGlobal);
                self.emit_byte(idx);
            }
        }
        Ok(())
    }

    fn emit_var_store(&mut self, var: &VarRef, name: &str) -> Result<()> {
        match var {
            VarRef::Local(slot) => {
                self.emit_op(OpCode::SetLocal);
                self.emit_byte(*slot);
            }
            VarRef::Upvalue(index) => {
                self.emit_op(OpCode::SetUpvalue);
                self.emit_byte(*index);
            }
            VarRef::Native | VarRef::Global => {
                let idx = self.name_constant(name)?;
                self.emit_op(OpCode::SetGlobal);
                self.emit_byte(idx);
            }
        }
        Ok(())
    }

    fn emit_var_update(&mut self, op: UpdateOp, var: &VarRef, name: &str) -> Result<()> {
        let (local_op, upvalue_op, global_op) = match op {
            UpdateOp::Increment => (OpCode::IncLocal, OpCode::IncUpvalue, OpCode::IncGlobal),
            UpdateOp::Decrement => (OpCode::DecLocal, OpCode::DecUpvalue, OpCode::DecGlobal),
        };
        match var {
            VarRef::Local(slot) => {
                self.emit_op(local_op);
                self.emit_byte(*slot);
            }
            VarRef::Upvalue(index) => {
                self.emit_op(upvalue_op);
                self.emit_byte(*index);
            }
            VarRef::Native | VarRef::Global => {
                let idx = self.name_constant(name)?;
                self.emit_op(global_op);
                self.emit_byte(idx);
            }
        }
        Ok(())
    }

    fn resolve_variable(&mut self, name: &str) -> Result<VarRef> {
        let current = self.states.len() - 1;
        if let Some(slot) = find_local(&self.states[current], name) {
            return Ok(VarRef::Local(slot));
        }
        if let Some(index) = self.resolve_upvalue(current, name)? {
            return Ok(VarRef::Upvalue(index));
        }
        if NATIVE_NAMES.contains(&name) {
            return Ok(VarRef::Native);
        }
        Ok(VarRef::Global)
    }

    /// Resolve `name` against the state at `state_idx`'s enclosing
    /// functions, threading an upvalue through every level between the
    /// source local and the referencing function.
    fn resolve_upvalue(&mut self, state_idx: usize, name: &str) -> Result<Option<u8>> {
        if state_idx == 0 {
            return Ok(None);
        }
        let parent = state_idx - 1;
        if let Some(slot) = find_local(&self.states[parent], name) {
            self.states[parent].locals[slot as usize].is_captured = true;
            return self
                .add_upvalue(
                    state_idx,
                    UpvalueDesc {
                        is_local: true,
                        index: slot,
                    },
                )
                .map(Some);
        }
        if let Some(index) = self.resolve_upvalue(parent, name)? {
            return self
                .add_upvalue(
                    state_idx,
                    UpvalueDesc {
                        is_local: false,
                        index,
                    },
                )
                .map(Some);
        }
        Ok(None)
    }

    /// Closures sharing a source variable share one upvalue slot:
    /// adding an existing (is_local, index) pair returns the old slot.
    fn add_upvalue(&mut self, state_idx: usize, desc: UpvalueDesc) -> Result<u8> {
        let upvalues = &mut self.states[state_idx].upvalues;
        if let Some(existing) = upvalues.iter().position(|u| *u == desc) {
            return Ok(existing as u8);
        }
        if upvalues.len() >= 256 {
            return Err(CompileError::TooManyUpvalues);
        }
        upvalues.push(desc);
        Ok((upvalues.len() - 1) as u8)
    }
}

fn find_local(state: &FuncState, name: &str) -> Option<u8> {
    state
        .locals
        .iter()
        .enumerate()
        .rev()
        .find(|(_, local)| local.name == name)
        .map(|(i, _)| i as u8)
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Mod => OpCode::Mod,
        BinaryOp::Pow => OpCode::Pow,
        BinaryOp::Eq => OpCode::Eq,
        BinaryOp::NotEq => OpCode::NotEq,
        BinaryOp::Lt => OpCode::Lt,
        BinaryOp::Gt => OpCode::Gt,
        BinaryOp::LtEq => OpCode::LtEq,
        BinaryOp::GtEq => OpCode::GtEq,
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators lower to jumps"),
    }
}

fn compound_opcode(op: AssignOp) -> Option<OpCode> {
    match op {
        AssignOp::Assign => None,
        AssignOp::AddAssign => Some(OpCode::Add),
        AssignOp::SubAssign => Some(OpCode::Sub),
        AssignOp::MulAssign => Some(OpCode::Mul),
        AssignOp::DivAssign => Some(OpCode::Div),
        AssignOp::ModAssign => Some(OpCode::Mod),
    }
}
