//! Single-pass AST walk producing the raw analysis facts
//!
//! Each function and class body is scanned by its own [`Scan`] and then
//! absorbed into the enclosing one, so per-definition facts (flags, direct
//! yields, own assignments) fall out of the same walk as the program facts.

use rustpython_parser::ast::{self, Constant, Expr, Stmt};
use std::collections::{BTreeMap, BTreeSet};

use super::{ClassInfo, DecoratorInfo, FunctionInfo, PrintArg, PrintCall, StructuralFlags, WRITE_LINE};
use super::security::top_level_module;

#[derive(Debug, Default)]
pub(crate) struct Scan {
    pub imports: BTreeSet<String>,
    pub function_calls: BTreeSet<String>,
    pub flags: StructuralFlags,
    /// A `yield` reached without crossing a nested definition
    pub direct_yield: bool,
    pub variables_defined: BTreeSet<String>,
    /// Names assigned directly in this body (not in nested definitions)
    pub own_assigned: BTreeSet<String>,
    pub self_attributes: BTreeSet<String>,
    pub variables_used_in_prints: BTreeSet<String>,
    pub print_calls: Vec<PrintCall>,
    /// Definitions made directly in this body, in source order
    pub own_functions: Vec<FunctionInfo>,
    pub functions: BTreeMap<String, FunctionInfo>,
    pub classes: BTreeMap<String, ClassInfo>,
}

impl Scan {
    pub fn of_body(body: &[Stmt]) -> Self {
        let mut scan = Scan::default();
        scan.walk_body(body);
        scan
    }

    /// Fold a nested scan into this one; this body's own definitions win
    fn absorb(&mut self, inner: Scan) {
        self.imports.extend(inner.imports);
        self.function_calls.extend(inner.function_calls);
        self.flags.merge(&inner.flags);
        self.variables_defined.extend(inner.variables_defined);
        self.self_attributes.extend(inner.self_attributes);
        self.variables_used_in_prints
            .extend(inner.variables_used_in_prints);
        self.print_calls.extend(inner.print_calls);
        for (name, info) in inner.functions {
            self.functions.entry(name).or_insert(info);
        }
        for (name, info) in inner.classes {
            self.classes.entry(name).or_insert(info);
        }
    }

    fn walk_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::FunctionDef(ast::StmtFunctionDef {
                name,
                body,
                decorator_list,
                ..
            }) => self.visit_function(name.as_str(), false, body, decorator_list),
            Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
                name,
                body,
                decorator_list,
                ..
            }) => self.visit_function(name.as_str(), true, body, decorator_list),
            Stmt::ClassDef(def) => self.visit_class(def),
            Stmt::Return(ast::StmtReturn { value, .. }) => {
                self.flags.has_return = true;
                self.visit_opt_expr(value.as_deref());
            }
            Stmt::Delete(ast::StmtDelete { targets, .. }) => self.visit_exprs(targets),
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                for target in targets {
                    self.record_target(target);
                }
                self.visit_exprs(targets);
                self.visit_expr(value);
            }
            Stmt::AugAssign(ast::StmtAugAssign { target, value, .. }) => {
                self.record_target(target);
                self.visit_expr(target);
                self.visit_expr(value);
            }
            Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                ..
            }) => {
                self.record_target(target);
                self.visit_expr(target);
                self.visit_expr(annotation);
                self.visit_opt_expr(value.as_deref());
            }
            Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => self.visit_for(target, iter, body, orelse),
            Stmt::AsyncFor(ast::StmtAsyncFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => self.visit_for(target, iter, body, orelse),
            Stmt::While(ast::StmtWhile {
                test, body, orelse, ..
            }) => {
                self.visit_expr(test);
                self.walk_body(body);
                self.walk_body(orelse);
            }
            Stmt::If(ast::StmtIf {
                test, body, orelse, ..
            }) => {
                self.flags.has_if = true;
                self.visit_expr(test);
                self.walk_body(body);
                self.walk_body(orelse);
            }
            Stmt::With(ast::StmtWith { items, body, .. }) => self.visit_with(items, body),
            Stmt::AsyncWith(ast::StmtAsyncWith { items, body, .. }) => {
                self.visit_with(items, body)
            }
            Stmt::Match(ast::StmtMatch { subject, cases, .. }) => {
                self.visit_expr(subject);
                for case in cases {
                    self.visit_opt_expr(case.guard.as_deref());
                    self.walk_body(&case.body);
                }
            }
            Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                self.visit_opt_expr(exc.as_deref());
                self.visit_opt_expr(cause.as_deref());
            }
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => self.visit_try(body, handlers, orelse, finalbody),
            Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => self.visit_try(body, handlers, orelse, finalbody),
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.visit_expr(test);
                self.visit_opt_expr(msg.as_deref());
            }
            Stmt::Import(ast::StmtImport { names, .. }) => {
                for alias in names {
                    self.imports
                        .insert(top_level_module(alias.name.as_str()).to_string());
                }
            }
            Stmt::ImportFrom(ast::StmtImportFrom { module, .. }) => {
                if let Some(module) = module {
                    self.imports
                        .insert(top_level_module(module.as_str()).to_string());
                }
            }
            Stmt::Expr(ast::StmtExpr { value, .. }) => self.visit_expr(value),
            _ => {}
        }
    }

    fn visit_function(&mut self, name: &str, is_async: bool, body: &[Stmt], decorators: &[Expr]) {
        self.visit_exprs(decorators);

        let inner = Scan::of_body(body);
        let info = FunctionInfo {
            name: name.to_string(),
            is_async,
            decorators: decorators.iter().map(decorator_info).collect(),
            is_generator: inner.direct_yield,
            flags: inner.flags.clone(),
            variables_defined: inner.variables_defined.clone(),
            variables_used_in_prints: inner.variables_used_in_prints.clone(),
        };
        self.absorb(inner);
        self.functions.insert(info.name.clone(), info.clone());
        self.own_functions.push(info);
    }

    fn visit_class(&mut self, def: &ast::StmtClassDef) {
        self.visit_exprs(&def.decorator_list);
        self.visit_exprs(&def.bases);

        let mut inner = Scan::of_body(&def.body);
        let mut methods = BTreeMap::new();
        let mut properties = BTreeSet::new();
        for method in std::mem::take(&mut inner.own_functions) {
            if method.decorators.iter().any(DecoratorInfo::is_property) {
                properties.insert(method.name.clone());
            }
            methods.insert(method.name.clone(), method);
        }
        let attributes = inner
            .own_assigned
            .iter()
            .chain(inner.self_attributes.iter())
            .cloned()
            .collect();

        let info = ClassInfo {
            name: def.name.to_string(),
            decorators: def.decorator_list.iter().map(decorator_info).collect(),
            bases: def.bases.iter().filter_map(dotted_name).collect(),
            methods,
            properties,
            attributes,
            flags: inner.flags.clone(),
            variables_defined: inner.variables_defined.clone(),
            variables_used_in_prints: inner.variables_used_in_prints.clone(),
        };
        self.absorb(inner);
        self.classes.insert(info.name.clone(), info);
    }

    fn visit_for(&mut self, target: &Expr, iter: &Expr, body: &[Stmt], orelse: &[Stmt]) {
        self.flags.has_for = true;
        self.record_target(target);
        self.visit_expr(target);
        self.visit_expr(iter);
        self.walk_body(body);
        self.walk_body(orelse);
    }

    fn visit_with(&mut self, items: &[ast::WithItem], body: &[Stmt]) {
        self.flags.has_with = true;
        for item in items {
            self.visit_expr(&item.context_expr);
            if let Some(vars) = &item.optional_vars {
                self.record_target(vars);
                self.visit_expr(vars);
            }
        }
        self.walk_body(body);
    }

    fn visit_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ast::ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) {
        if !handlers.is_empty() {
            self.flags.has_try_except = true;
        }
        self.walk_body(body);
        for handler in handlers {
            let ast::ExceptHandler::ExceptHandler(handler) = handler;
            self.visit_opt_expr(handler.type_.as_deref());
            self.walk_body(&handler.body);
        }
        self.walk_body(orelse);
        self.walk_body(finalbody);
    }

    fn visit_exprs(&mut self, exprs: &[Expr]) {
        for expr in exprs {
            self.visit_expr(expr);
        }
    }

    fn visit_opt_expr(&mut self, expr: Option<&Expr>) {
        if let Some(expr) = expr {
            self.visit_expr(expr);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::BoolOp(ast::ExprBoolOp { values, .. }) => self.visit_exprs(values),
            Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
                self.record_target(target);
                self.visit_expr(target);
                self.visit_expr(value);
            }
            Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => self.visit_expr(operand),
            Expr::Lambda(ast::ExprLambda { body, .. }) => {
                self.flags.has_lambda = true;
                self.visit_expr(body);
            }
            Expr::IfExp(ast::ExprIfExp {
                test, body, orelse, ..
            }) => {
                self.visit_expr(test);
                self.visit_expr(body);
                self.visit_expr(orelse);
            }
            Expr::Dict(ast::ExprDict { keys, values, .. }) => {
                for key in keys.iter().flatten() {
                    self.visit_expr(key);
                }
                self.visit_exprs(values);
            }
            Expr::Set(ast::ExprSet { elts, .. }) => self.visit_exprs(elts),
            Expr::ListComp(ast::ExprListComp {
                elt, generators, ..
            }) => {
                self.flags.has_list_comp = true;
                self.visit_comprehensions(generators);
                self.visit_expr(elt);
            }
            Expr::SetComp(ast::ExprSetComp {
                elt, generators, ..
            }) => {
                self.flags.has_set_comp = true;
                self.visit_comprehensions(generators);
                self.visit_expr(elt);
            }
            Expr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                ..
            }) => {
                self.flags.has_dict_comp = true;
                self.visit_comprehensions(generators);
                self.visit_expr(key);
                self.visit_expr(value);
            }
            Expr::GeneratorExp(ast::ExprGeneratorExp {
                elt, generators, ..
            }) => {
                self.visit_comprehensions(generators);
                self.visit_expr(elt);
            }
            Expr::Await(ast::ExprAwait { value, .. }) => {
                self.flags.has_await = true;
                self.visit_expr(value);
            }
            Expr::Yield(ast::ExprYield { value, .. }) => {
                self.flags.has_yield = true;
                self.direct_yield = true;
                self.visit_opt_expr(value.as_deref());
            }
            Expr::YieldFrom(ast::ExprYieldFrom { value, .. }) => {
                self.flags.has_yield = true;
                self.direct_yield = true;
                self.visit_expr(value);
            }
            Expr::Compare(ast::ExprCompare {
                left, comparators, ..
            }) => {
                self.visit_expr(left);
                self.visit_exprs(comparators);
            }
            Expr::Call(call) => self.visit_call(call),
            Expr::FormattedValue(ast::ExprFormattedValue {
                value, format_spec, ..
            }) => {
                self.visit_expr(value);
                self.visit_opt_expr(format_spec.as_deref());
            }
            Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => self.visit_exprs(values),
            Expr::Attribute(ast::ExprAttribute { value, .. }) => self.visit_expr(value),
            Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.visit_expr(value);
                self.visit_expr(slice);
            }
            Expr::Starred(ast::ExprStarred { value, .. }) => self.visit_expr(value),
            Expr::List(ast::ExprList { elts, .. }) => self.visit_exprs(elts),
            Expr::Tuple(ast::ExprTuple { elts, .. }) => self.visit_exprs(elts),
            Expr::Slice(ast::ExprSlice {
                lower, upper, step, ..
            }) => {
                self.visit_opt_expr(lower.as_deref());
                self.visit_opt_expr(upper.as_deref());
                self.visit_opt_expr(step.as_deref());
            }
            _ => {}
        }
    }

    fn visit_comprehensions(&mut self, generators: &[ast::Comprehension]) {
        for generator in generators {
            self.record_target(&generator.target);
            self.visit_expr(&generator.target);
            self.visit_expr(&generator.iter);
            self.visit_exprs(&generator.ifs);
        }
    }

    fn visit_call(&mut self, call: &ast::ExprCall) {
        if let Expr::Name(ast::ExprName { id, .. }) = call.func.as_ref() {
            self.function_calls.insert(id.to_string());
            if id.as_str() == WRITE_LINE {
                self.record_print(&call.args);
            }
        }
        self.visit_expr(&call.func);
        self.visit_exprs(&call.args);
        for keyword in &call.keywords {
            self.visit_expr(&keyword.value);
        }
    }

    fn record_print(&mut self, args: &[Expr]) {
        let mut record = PrintCall::default();
        for arg in args {
            match arg {
                Expr::Name(ast::ExprName { id, .. }) => {
                    self.variables_used_in_prints.insert(id.to_string());
                    record.args.push(PrintArg::variable(id.as_str()));
                }
                Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => {
                    record.is_formatted_string = true;
                    for part in values {
                        if let Expr::FormattedValue(ast::ExprFormattedValue { value, .. }) = part {
                            if let Expr::Name(ast::ExprName { id, .. }) = value.as_ref() {
                                self.variables_used_in_prints.insert(id.to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        self.print_calls.push(record);
    }

    fn record_target(&mut self, target: &Expr) {
        match target {
            Expr::Name(ast::ExprName { id, .. }) => {
                self.variables_defined.insert(id.to_string());
                self.own_assigned.insert(id.to_string());
            }
            Expr::Tuple(ast::ExprTuple { elts, .. }) | Expr::List(ast::ExprList { elts, .. }) => {
                for elt in elts {
                    self.record_target(elt);
                }
            }
            Expr::Starred(ast::ExprStarred { value, .. }) => self.record_target(value),
            Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                if let Expr::Name(ast::ExprName { id, .. }) = value.as_ref() {
                    if id.as_str() == "self" {
                        self.self_attributes.insert(attr.to_string());
                    }
                }
            }
            _ => {}
        }
    }
}

/// `a.b.c` for name/attribute chains
pub(crate) fn dotted_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Name(ast::ExprName { id, .. }) => Some(id.to_string()),
        Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
            dotted_name(value).map(|base| format!("{}.{}", base, attr.as_str()))
        }
        _ => None,
    }
}

fn decorator_info(expr: &Expr) -> DecoratorInfo {
    match expr {
        Expr::Call(ast::ExprCall { func, keywords, .. }) => DecoratorInfo {
            name: dotted_name(func).unwrap_or_default(),
            keywords: keywords
                .iter()
                .filter_map(|kw| {
                    let arg = kw.arg.as_ref()?;
                    Some((arg.to_string(), literal_text(&kw.value)))
                })
                .collect(),
        },
        other => DecoratorInfo {
            name: dotted_name(other).unwrap_or_default(),
            keywords: BTreeMap::new(),
        },
    }
}

fn literal_text(expr: &Expr) -> String {
    match expr {
        Expr::Constant(ast::ExprConstant { value, .. }) => match value {
            Constant::Bool(true) => "True".to_string(),
            Constant::Bool(false) => "False".to_string(),
            Constant::None => "None".to_string(),
            Constant::Str(s) => s.clone(),
            Constant::Int(i) => i.to_string(),
            Constant::Float(f) => f.to_string(),
            _ => "...".to_string(),
        },
        other => dotted_name(other).unwrap_or_else(|| "...".to_string()),
    }
}
