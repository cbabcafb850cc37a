//! Tree-walking evaluator for parsed formulas.
//!
//! Runtime values are richer than [`Value`]: they can reference bots, the
//! `tags` view of a bot and functions. [`Interpreter::export`] flattens a
//! result back to copiable data before it leaves the sandbox.

use std::collections::BTreeMap;
use std::rc::Rc;

use super::Host;
use super::library::{self, BotFilter, Builtin};
use super::parser::{BinaryOp, Expr, LogicalOp, UnaryOp};
use crate::dependency::Dependency;
use crate::error::{ErrorKind, EvalError};
use crate::value::{Value, number_to_string};

/// Closure nesting allowed before reporting a stack overflow.
const MAX_CALL_DEPTH: usize = 256;

// ---------------------------------------------------------------------------
// Runtime values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) enum RtValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<RtValue>),
    Object(BTreeMap<String, RtValue>),
    /// A bot, by id.
    Bot(String),
    /// The `tags` view of a bot, by id.
    Tags(String),
    Function(Rc<Function>),
}

#[derive(Debug)]
pub(crate) enum Function {
    Closure {
        params: Rc<[String]>,
        body: Rc<Expr>,
        scope: Rc<Scope>,
    },
    Builtin(Builtin),
    /// A method bound to its receiver, e.g. `items.map`.
    Method { receiver: RtValue, name: String },
    Filter(BotFilter),
}

impl Function {
    fn name(&self) -> &str {
        match self {
            Self::Closure { .. } => "(anonymous)",
            Self::Builtin(builtin) => builtin.name(),
            Self::Method { name, .. } => name,
            Self::Filter(_) => "filter",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Scope {
    vars: Vec<(String, RtValue)>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    fn lookup(&self, name: &str) -> Option<&RtValue> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some((_, value)) = current.vars.iter().find(|(var, _)| var == name) {
                return Some(value);
            }
            scope = current.parent.as_deref();
        }
        None
    }
}

pub(crate) fn function(function: Function) -> RtValue {
    RtValue::Function(Rc::new(function))
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Lift a stored value into the runtime.
pub(crate) fn import(value: Value) -> RtValue {
    match value {
        Value::Null => RtValue::Null,
        Value::Bool(b) => RtValue::Bool(b),
        Value::Number(n) => RtValue::Number(n),
        Value::String(s) => RtValue::Str(s),
        Value::Array(items) => RtValue::Array(items.into_iter().map(import).collect()),
        Value::Assignment(assignment) => import(assignment.cached()),
        Value::Object(map) => RtValue::Object(map.into_iter().map(|(k, v)| (k, import(v))).collect()),
    }
}

/// Lift a computed tag value; an absent tag reads as `undefined`.
pub(crate) fn import_tag(value: Value) -> RtValue {
    if value.is_empty() {
        RtValue::Undefined
    } else {
        import(value)
    }
}

/// Convert a primitive runtime value to a stored one. Composite and
/// reference values have no stable stored form here.
pub(crate) fn primitive(value: &RtValue) -> Option<Value> {
    match value {
        RtValue::Null => Some(Value::Null),
        RtValue::Bool(b) => Some(Value::Bool(*b)),
        RtValue::Number(n) => Some(Value::Number(*n)),
        RtValue::Str(s) => Some(Value::String(s.clone())),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn count(n: usize) -> f64 {
    n as f64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_index(n: f64) -> Option<usize> {
    (n.is_finite() && n >= 0.0 && n.fract() == 0.0).then_some(n as usize)
}

/// Resolve a JS-style relative index (`slice`) against `len`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn relative_index(arg: Option<&RtValue>, len: usize, default: usize) -> usize {
    let Some(arg) = arg.filter(|arg| !matches!(arg, RtValue::Undefined)) else {
        return default;
    };
    let n = to_number(arg);
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (count(len) + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

pub(crate) const fn is_nullish(value: &RtValue) -> bool {
    matches!(value, RtValue::Undefined | RtValue::Null)
}

pub(crate) fn truthy(value: &RtValue) -> bool {
    match value {
        RtValue::Undefined | RtValue::Null => false,
        RtValue::Bool(b) => *b,
        RtValue::Number(n) => *n != 0.0 && !n.is_nan(),
        RtValue::Str(s) => !s.is_empty(),
        _ => true,
    }
}

pub(crate) fn to_number(value: &RtValue) -> f64 {
    match value {
        RtValue::Null => 0.0,
        RtValue::Bool(b) => f64::from(u8::from(*b)),
        RtValue::Number(n) => *n,
        RtValue::Str(s) => {
            let s = s.trim();
            match s {
                "" => 0.0,
                "Infinity" | "+Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                _ if s.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b)) => {
                    s.parse().unwrap_or(f64::NAN)
                }
                _ => f64::NAN,
            }
        }
        RtValue::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => to_number(single),
            _ => f64::NAN,
        },
        _ => f64::NAN,
    }
}

pub(crate) fn to_js_string(value: &RtValue) -> String {
    match value {
        RtValue::Undefined => "undefined".to_string(),
        RtValue::Null => "null".to_string(),
        RtValue::Bool(b) => b.to_string(),
        RtValue::Number(n) => number_to_string(*n),
        RtValue::Str(s) => s.clone(),
        RtValue::Array(items) => items
            .iter()
            .map(|item| if is_nullish(item) { String::new() } else { to_js_string(item) })
            .collect::<Vec<_>>()
            .join(","),
        RtValue::Object(_) | RtValue::Tags(_) => "[object Object]".to_string(),
        RtValue::Bot(id) => id.clone(),
        RtValue::Function(f) => format!("[Function {}]", f.name()),
    }
}

fn type_of(value: &RtValue) -> &'static str {
    match value {
        RtValue::Undefined => "undefined",
        RtValue::Bool(_) => "boolean",
        RtValue::Number(_) => "number",
        RtValue::Str(_) => "string",
        RtValue::Function(_) => "function",
        RtValue::Null
        | RtValue::Array(_)
        | RtValue::Object(_)
        | RtValue::Bot(_)
        | RtValue::Tags(_) => "object",
    }
}

/// `===`, with structural comparison for arrays and objects.
pub(crate) fn strict_equals(a: &RtValue, b: &RtValue) -> bool {
    match (a, b) {
        (RtValue::Undefined, RtValue::Undefined) | (RtValue::Null, RtValue::Null) => true,
        (RtValue::Bool(x), RtValue::Bool(y)) => x == y,
        (RtValue::Number(x), RtValue::Number(y)) => x == y,
        (RtValue::Str(x), RtValue::Str(y)) | (RtValue::Bot(x), RtValue::Bot(y)) | (RtValue::Tags(x), RtValue::Tags(y)) => {
            x == y
        }
        (RtValue::Array(x), RtValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| strict_equals(a, b))
        }
        (RtValue::Object(x), RtValue::Object(y)) => {
            x.len() == y.len()
                && x.iter().zip(y).all(|((ka, va), (kb, vb))| ka == kb && strict_equals(va, vb))
        }
        (RtValue::Function(x), RtValue::Function(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// `==`: nullish values equal each other, primitives coerce to numbers.
fn loose_equals(a: &RtValue, b: &RtValue) -> bool {
    match (a, b) {
        (RtValue::Undefined | RtValue::Null, RtValue::Undefined | RtValue::Null) => true,
        (RtValue::Undefined | RtValue::Null, _) | (_, RtValue::Undefined | RtValue::Null) => false,
        (RtValue::Number(_), RtValue::Str(_) | RtValue::Bool(_))
        | (RtValue::Str(_) | RtValue::Bool(_), RtValue::Number(_))
        | (RtValue::Bool(_), RtValue::Str(_))
        | (RtValue::Str(_), RtValue::Bool(_)) => to_number(a) == to_number(b),
        (RtValue::Array(_), RtValue::Str(_) | RtValue::Number(_)) => {
            loose_equals(&RtValue::Str(to_js_string(a)), b)
        }
        (RtValue::Str(_) | RtValue::Number(_), RtValue::Array(_)) => {
            loose_equals(a, &RtValue::Str(to_js_string(b)))
        }
        _ => strict_equals(a, b),
    }
}

/// `SameValueZero`, used by `includes`.
fn same_value_zero(a: &RtValue, b: &RtValue) -> bool {
    match (a, b) {
        (RtValue::Number(x), RtValue::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

fn compare(op: BinaryOp, a: &RtValue, b: &RtValue) -> bool {
    if let (RtValue::Str(x), RtValue::Str(y)) = (a, b) {
        return match op {
            BinaryOp::Lt => x < y,
            BinaryOp::Le => x <= y,
            BinaryOp::Gt => x > y,
            _ => x >= y,
        };
    }
    let (x, y) = (to_number(a), to_number(b));
    match op {
        BinaryOp::Lt => x < y,
        BinaryOp::Le => x <= y,
        BinaryOp::Gt => x > y,
        _ => x >= y,
    }
}

/// Operands that make `+` concatenate instead of add.
const fn is_stringish(value: &RtValue) -> bool {
    matches!(
        value,
        RtValue::Str(_)
            | RtValue::Array(_)
            | RtValue::Object(_)
            | RtValue::Bot(_)
            | RtValue::Tags(_)
            | RtValue::Function(_)
    )
}

fn binary(op: BinaryOp, a: &RtValue, b: &RtValue) -> RtValue {
    match op {
        BinaryOp::Add if is_stringish(a) || is_stringish(b) => {
            RtValue::Str(format!("{}{}", to_js_string(a), to_js_string(b)))
        }
        BinaryOp::Add => RtValue::Number(to_number(a) + to_number(b)),
        BinaryOp::Sub => RtValue::Number(to_number(a) - to_number(b)),
        BinaryOp::Mul => RtValue::Number(to_number(a) * to_number(b)),
        BinaryOp::Div => RtValue::Number(to_number(a) / to_number(b)),
        BinaryOp::Rem => RtValue::Number(to_number(a) % to_number(b)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => RtValue::Bool(compare(op, a, b)),
        BinaryOp::LooseEq => RtValue::Bool(loose_equals(a, b)),
        BinaryOp::LooseNe => RtValue::Bool(!loose_equals(a, b)),
        BinaryOp::StrictEq => RtValue::Bool(strict_equals(a, b)),
        BinaryOp::StrictNe => RtValue::Bool(!strict_equals(a, b)),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member { object, property, .. } => format!("{}.{property}", describe(object)),
        Expr::Index { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

pub(crate) struct Interpreter<'h> {
    pub(super) host: &'h mut dyn Host,
    this: Option<String>,
    steps: usize,
    max_steps: usize,
    call_depth: usize,
}

impl<'h> Interpreter<'h> {
    pub(crate) fn new(host: &'h mut dyn Host, this: Option<&str>, max_steps: usize) -> Self {
        Self {
            host,
            this: this.map(str::to_string),
            steps: 0,
            max_steps,
            call_depth: 0,
        }
    }

    /// Evaluate a whole program and export the result.
    pub(crate) fn run(&mut self, program: &Expr) -> Result<Value, EvalError> {
        let scope = Rc::new(Scope::default());
        let result = self.eval(program, &scope)?;
        self.export(result)
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(EvalError::range(format!(
                "Formula exceeded the limit of {} evaluation steps",
                self.max_steps
            )));
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<RtValue, EvalError> {
        self.tick()?;
        match expr {
            Expr::Undefined => Ok(RtValue::Undefined),
            Expr::Null => Ok(RtValue::Null),
            Expr::Bool(b) => Ok(RtValue::Bool(*b)),
            Expr::Number(n) => Ok(RtValue::Number(*n)),
            Expr::Str(s) => Ok(RtValue::Str(s.clone())),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item, scope))
                .collect::<Result<Vec<_>, _>>()
                .map(RtValue::Array),
            Expr::Ident(name) => self.resolve(name, scope),
            Expr::This => Ok(self.this.clone().map_or(RtValue::Undefined, RtValue::Bot)),
            Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => {
                Ok(self.chain(expr, scope)?.unwrap_or(RtValue::Undefined))
            }
            Expr::Unary { op, operand } => self.unary(*op, operand, scope),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !truthy(&left),
                    LogicalOp::Or => truthy(&left),
                    LogicalOp::Nullish => !is_nullish(&left),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional { test, consequent, alternate } => {
                if truthy(&self.eval(test, scope)?) {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Arrow { params, body } => Ok(function(Function::Closure {
                params: Rc::clone(params),
                body: Rc::clone(body),
                scope: Rc::clone(scope),
            })),
        }
    }

    /// Evaluate a member/index/call chain. `None` means an optional link
    /// (`?.`) short-circuited the rest of the chain.
    fn chain(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Option<RtValue>, EvalError> {
        match expr {
            Expr::Member { object, property, optional } => {
                let Some(target) = self.chain_operand(object, scope)? else {
                    return Ok(None);
                };
                if *optional && is_nullish(&target) {
                    return Ok(None);
                }
                self.member(&target, property).map(Some)
            }
            Expr::Index { object, index } => {
                let Some(target) = self.chain_operand(object, scope)? else {
                    return Ok(None);
                };
                let key = self.eval(index, scope)?;
                self.index(&target, &key).map(Some)
            }
            Expr::Call { callee, args } => {
                let Some(callee_value) = self.chain_operand(callee, scope)? else {
                    return Ok(None);
                };
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let RtValue::Function(target) = callee_value else {
                    return Err(EvalError::type_error(format!(
                        "{} is not a function",
                        describe(callee)
                    )));
                };
                self.apply(&target, args).map(Some)
            }
            other => self.eval(other, scope).map(Some),
        }
    }

    fn chain_operand(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Option<RtValue>, EvalError> {
        match expr {
            Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => {
                self.tick()?;
                self.chain(expr, scope)
            }
            other => self.eval(other, scope).map(Some),
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, scope: &Rc<Scope>) -> Result<RtValue, EvalError> {
        if op == UnaryOp::TypeOf {
            // `typeof missing` is "undefined", not a ReferenceError.
            return match self.eval(operand, scope) {
                Ok(value) => Ok(RtValue::Str(type_of(&value).to_string())),
                Err(err) if matches!(operand, Expr::Ident(_)) && err.kind == ErrorKind::Reference => {
                    Ok(RtValue::Str("undefined".to_string()))
                }
                Err(err) => Err(err),
            };
        }
        let value = self.eval(operand, scope)?;
        Ok(match op {
            UnaryOp::Not => RtValue::Bool(!truthy(&value)),
            UnaryOp::Neg => RtValue::Number(-to_number(&value)),
            UnaryOp::Plus | UnaryOp::TypeOf => RtValue::Number(to_number(&value)),
        })
    }

    fn resolve(&self, name: &str, scope: &Scope) -> Result<RtValue, EvalError> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value.clone());
        }
        match name {
            "tags" => Ok(self.this.clone().map_or(RtValue::Undefined, RtValue::Tags)),
            "math" | "Math" => Ok(library::math_namespace()),
            _ => Builtin::lookup(name)
                .map(|builtin| function(Function::Builtin(builtin)))
                .ok_or_else(|| EvalError::reference(format!("{name} is not defined"))),
        }
    }

    // -----------------------------------------------------------------------
    // Property access
    // -----------------------------------------------------------------------

    fn member(&mut self, target: &RtValue, property: &str) -> Result<RtValue, EvalError> {
        let value = match target {
            RtValue::Undefined | RtValue::Null => {
                return Err(EvalError::type_error(format!(
                    "Cannot read properties of {} (reading '{property}')",
                    to_js_string(target)
                )));
            }
            RtValue::Bot(id) => match property {
                "id" => RtValue::Str(id.clone()),
                "space" => self.space_of(id).map_or(RtValue::Undefined, RtValue::Str),
                "tags" => RtValue::Tags(id.clone()),
                _ => RtValue::Undefined,
            },
            RtValue::Tags(id) => return self.read_tag(id, property),
            RtValue::Object(map) => map.get(property).cloned().unwrap_or(RtValue::Undefined),
            RtValue::Array(items) => match property {
                "length" => RtValue::Number(count(items.len())),
                _ if ARRAY_METHODS.contains(&property) => bind(target, property),
                _ => RtValue::Undefined,
            },
            RtValue::Str(s) => match property {
                "length" => RtValue::Number(count(s.chars().count())),
                _ if STRING_METHODS.contains(&property) => bind(target, property),
                _ => RtValue::Undefined,
            },
            RtValue::Number(_) if NUMBER_METHODS.contains(&property) => bind(target, property),
            RtValue::Number(_) | RtValue::Bool(_) | RtValue::Function(_) => RtValue::Undefined,
        };
        Ok(value)
    }

    fn index(&mut self, target: &RtValue, key: &RtValue) -> Result<RtValue, EvalError> {
        match (target, key) {
            (RtValue::Array(items), RtValue::Number(n)) => Ok(to_index(*n)
                .and_then(|idx| items.get(idx))
                .cloned()
                .unwrap_or(RtValue::Undefined)),
            (RtValue::Str(s), RtValue::Number(n)) => Ok(to_index(*n)
                .and_then(|idx| s.chars().nth(idx))
                .map_or(RtValue::Undefined, |ch| RtValue::Str(ch.to_string()))),
            _ => self.member(target, &to_js_string(key)),
        }
    }

    /// Read a computed tag through the host, recording the read.
    pub(super) fn read_tag(&mut self, id: &str, tag: &str) -> Result<RtValue, EvalError> {
        self.host.record(Dependency::bot_tag(id, tag));
        self.host.tag_value(id, tag).map(import_tag)
    }

    /// Read a bot's space through the host, recording the read.
    fn space_of(&mut self, id: &str) -> Option<String> {
        self.host.record(Dependency::bot_space(id));
        self.host.bot_space(id)
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Call a runtime value that is expected to be a function.
    pub(super) fn invoke(&mut self, callee: &RtValue, args: Vec<RtValue>) -> Result<RtValue, EvalError> {
        match callee {
            RtValue::Function(target) => self.apply(target, args),
            other => Err(EvalError::type_error(format!(
                "{} is not a function",
                to_js_string(other)
            ))),
        }
    }

    fn apply(&mut self, target: &Rc<Function>, args: Vec<RtValue>) -> Result<RtValue, EvalError> {
        match &**target {
            Function::Closure { params, body, scope } => {
                if self.call_depth >= MAX_CALL_DEPTH {
                    return Err(EvalError::range("Maximum call stack size exceeded"));
                }
                let mut args = args.into_iter();
                let vars = params
                    .iter()
                    .map(|param| (param.clone(), args.next().unwrap_or(RtValue::Undefined)))
                    .collect();
                let inner = Rc::new(Scope {
                    vars,
                    parent: Some(Rc::clone(scope)),
                });
                self.call_depth += 1;
                let result = self.eval(body, &inner);
                self.call_depth -= 1;
                result
            }
            Function::Builtin(builtin) => self.call_builtin(*builtin, args),
            Function::Method { receiver, name } => self.call_method(receiver, name, args),
            Function::Filter(filter) => match args.first().and_then(|arg| self.bot_id_of(arg)) {
                Some(id) => self.filter_matches(filter, &id).map(RtValue::Bool),
                None => Ok(RtValue::Bool(false)),
            },
        }
    }

    fn call_method(&mut self, receiver: &RtValue, name: &str, args: Vec<RtValue>) -> Result<RtValue, EvalError> {
        match receiver {
            RtValue::Array(items) => self.array_method(items, name, args),
            RtValue::Str(s) => string_method(s, name, &args),
            RtValue::Number(n) => number_method(*n, name, &args),
            _ => Err(EvalError::type_error(format!("{name} is not a function"))),
        }
    }

    fn array_method(&mut self, items: &[RtValue], name: &str, args: Vec<RtValue>) -> Result<RtValue, EvalError> {
        let callback = args.first().cloned().unwrap_or(RtValue::Undefined);
        let value = match name {
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    out.push(self.invoke(&callback, vec![item.clone(), RtValue::Number(count(idx))])?);
                }
                RtValue::Array(out)
            }
            "filter" => {
                let mut out = Vec::new();
                for (idx, item) in items.iter().enumerate() {
                    if truthy(&self.invoke(&callback, vec![item.clone(), RtValue::Number(count(idx))])?) {
                        out.push(item.clone());
                    }
                }
                RtValue::Array(out)
            }
            "find" | "some" | "every" => {
                for (idx, item) in items.iter().enumerate() {
                    let hit = truthy(&self.invoke(&callback, vec![item.clone(), RtValue::Number(count(idx))])?);
                    match name {
                        "find" if hit => return Ok(item.clone()),
                        "some" if hit => return Ok(RtValue::Bool(true)),
                        "every" if !hit => return Ok(RtValue::Bool(false)),
                        _ => {}
                    }
                }
                match name {
                    "find" => RtValue::Undefined,
                    "some" => RtValue::Bool(false),
                    _ => RtValue::Bool(true),
                }
            }
            "includes" => RtValue::Bool(items.iter().any(|item| same_value_zero(item, &callback))),
            "indexOf" => RtValue::Number(
                items
                    .iter()
                    .position(|item| strict_equals(item, &callback))
                    .map_or(-1.0, count),
            ),
            "join" => {
                let separator = if matches!(callback, RtValue::Undefined) {
                    ",".to_string()
                } else {
                    to_js_string(&callback)
                };
                RtValue::Str(
                    items
                        .iter()
                        .map(|item| if is_nullish(item) { String::new() } else { to_js_string(item) })
                        .collect::<Vec<_>>()
                        .join(&separator),
                )
            }
            "slice" => {
                let start = relative_index(args.first(), items.len(), 0);
                let end = relative_index(args.get(1), items.len(), items.len());
                RtValue::Array(items.get(start..end.max(start)).unwrap_or_default().to_vec())
            }
            "concat" => {
                let mut out = items.to_vec();
                for arg in args {
                    match arg {
                        RtValue::Array(more) => out.extend(more),
                        other => out.push(other),
                    }
                }
                RtValue::Array(out)
            }
            "reverse" => RtValue::Array(items.iter().rev().cloned().collect()),
            "sort" => {
                let comparator = (!matches!(callback, RtValue::Undefined)).then_some(&callback);
                RtValue::Array(self.sort_values(items.to_vec(), comparator)?)
            }
            _ => return Err(EvalError::type_error(format!("{name} is not a function"))),
        };
        Ok(value)
    }

    /// Stable merge sort with a fallible comparator.
    fn sort_values(&mut self, mut items: Vec<RtValue>, comparator: Option<&RtValue>) -> Result<Vec<RtValue>, EvalError> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.sort_values(items, comparator)?;
        let right = self.sort_values(right, comparator)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
            let take_right = self.sorts_after(a, b, comparator)?;
            let next = if take_right { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }

    fn sorts_after(&mut self, a: &RtValue, b: &RtValue, comparator: Option<&RtValue>) -> Result<bool, EvalError> {
        if let Some(comparator) = comparator {
            let order = self.invoke(comparator, vec![a.clone(), b.clone()])?;
            return Ok(to_number(&order) > 0.0);
        }
        Ok(match (a, b) {
            (RtValue::Undefined, RtValue::Undefined) | (_, RtValue::Undefined) => false,
            (RtValue::Undefined, _) => true,
            _ => to_js_string(a) > to_js_string(b),
        })
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Flatten a runtime value into copiable data.
    pub(crate) fn export(&mut self, value: RtValue) -> Result<Value, EvalError> {
        Ok(match value {
            RtValue::Undefined | RtValue::Null => Value::Null,
            RtValue::Bool(b) => Value::Bool(b),
            RtValue::Number(n) => Value::Number(n),
            RtValue::Str(s) => Value::String(s),
            RtValue::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.export(item))
                    .collect::<Result<_, _>>()?,
            ),
            RtValue::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    out.insert(key, self.export(item)?);
                }
                Value::Object(out)
            }
            RtValue::Bot(id) => {
                let mut out = BTreeMap::new();
                if let Some(space) = self.space_of(&id) {
                    out.insert("space".to_string(), Value::String(space));
                }
                out.insert("id".to_string(), Value::String(id));
                Value::Object(out)
            }
            RtValue::Tags(id) => {
                // The tag set itself can change, so any change may matter.
                self.host.record(Dependency::All);
                let mut out = BTreeMap::new();
                for tag in self.host.tag_names(&id) {
                    let value = self.host.tag_value(&id, &tag)?;
                    if !value.is_empty() {
                        out.insert(tag, value);
                    }
                }
                Value::Object(out)
            }
            RtValue::Function(f) => Value::String(format!("[Function {}]", f.name())),
        })
    }
}

// ---------------------------------------------------------------------------
// Methods on primitives
// ---------------------------------------------------------------------------

const ARRAY_METHODS: &[&str] = &[
    "map", "filter", "find", "some", "every", "includes", "indexOf", "join", "slice", "concat",
    "reverse", "sort",
];

const STRING_METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "includes",
    "startsWith",
    "endsWith",
    "split",
    "indexOf",
    "slice",
    "toString",
];

const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];

fn bind(receiver: &RtValue, name: &str) -> RtValue {
    function(Function::Method {
        receiver: receiver.clone(),
        name: name.to_string(),
    })
}

fn string_method(s: &str, name: &str, args: &[RtValue]) -> Result<RtValue, EvalError> {
    let arg = |idx: usize| args.get(idx).map_or_else(|| "undefined".to_string(), to_js_string);
    let value = match name {
        "toUpperCase" => RtValue::Str(s.to_uppercase()),
        "toLowerCase" => RtValue::Str(s.to_lowercase()),
        "trim" => RtValue::Str(s.trim().to_string()),
        "toString" => RtValue::Str(s.to_string()),
        "includes" => RtValue::Bool(s.contains(arg(0).as_str())),
        "startsWith" => RtValue::Bool(s.starts_with(arg(0).as_str())),
        "endsWith" => RtValue::Bool(s.ends_with(arg(0).as_str())),
        "indexOf" => RtValue::Number(
            s.find(arg(0).as_str())
                .map_or(-1.0, |byte| count(s[..byte].chars().count())),
        ),
        "split" => match args.first() {
            None | Some(RtValue::Undefined) => RtValue::Array(vec![RtValue::Str(s.to_string())]),
            Some(separator) => {
                let separator = to_js_string(separator);
                let parts: Vec<RtValue> = if separator.is_empty() {
                    s.chars().map(|ch| RtValue::Str(ch.to_string())).collect()
                } else {
                    s.split(separator.as_str())
                        .map(|part| RtValue::Str(part.to_string()))
                        .collect()
                };
                RtValue::Array(parts)
            }
        },
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = relative_index(args.first(), chars.len(), 0);
            let end = relative_index(args.get(1), chars.len(), chars.len());
            RtValue::Str(chars.get(start..end.max(start)).unwrap_or_default().iter().collect())
        }
        _ => return Err(EvalError::type_error(format!("{name} is not a function"))),
    };
    Ok(value)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn number_method(n: f64, name: &str, args: &[RtValue]) -> Result<RtValue, EvalError> {
    match name {
        "toFixed" => {
            let digits = args.first().map_or(0.0, to_number);
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::range("toFixed() digits argument must be between 0 and 100"));
            }
            let digits = digits as usize;
            Ok(RtValue::Str(if n.is_finite() {
                format!("{n:.digits$}")
            } else {
                number_to_string(n)
            }))
        }
        "toString" => Ok(RtValue::Str(number_to_string(n))),
        _ => Err(EvalError::type_error(format!("{name} is not a function"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> RtValue {
        RtValue::Str(text.to_string())
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&RtValue::Number(0.0)));
        assert!(!truthy(&RtValue::Number(f64::NAN)));
        assert!(!truthy(&s("")));
        assert!(!truthy(&RtValue::Null));
        assert!(truthy(&RtValue::Array(Vec::new())));
        assert!(truthy(&s("0")));
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(loose_equals(&RtValue::Number(1.0), &s("1")));
        assert!(loose_equals(&RtValue::Bool(true), &RtValue::Number(1.0)));
        assert!(loose_equals(&RtValue::Null, &RtValue::Undefined));
        assert!(!loose_equals(&RtValue::Null, &RtValue::Number(0.0)));
        assert!(!strict_equals(&RtValue::Number(1.0), &s("1")));
    }

    #[test]
    fn plus_concatenates_with_strings() {
        let out = binary(BinaryOp::Add, &s("a"), &RtValue::Number(1.0));
        assert!(matches!(out, RtValue::Str(ref t) if t == "a1"));
        let out = binary(BinaryOp::Add, &RtValue::Bool(true), &RtValue::Number(1.0));
        assert!(matches!(out, RtValue::Number(n) if n == 2.0));
    }

    #[test]
    fn number_coercion() {
        assert_eq!(to_number(&s(" 12 ")), 12.0);
        assert_eq!(to_number(&s("")), 0.0);
        assert!(to_number(&s("abc")).is_nan());
        assert_eq!(to_number(&RtValue::Array(vec![s("3")])), 3.0);
    }

    #[test]
    fn string_methods() {
        let split = string_method("a,b", "split", &[s(",")]).expect("split");
        assert!(matches!(split, RtValue::Array(ref parts) if parts.len() == 2));
        let sliced = string_method("hello", "slice", &[RtValue::Number(-3.0)]).expect("slice");
        assert!(matches!(sliced, RtValue::Str(ref t) if t == "llo"));
        assert!(string_method("x", "nope", &[]).is_err());
    }

    #[test]
    fn to_fixed() {
        let out = number_method(1.005, "toFixed", &[RtValue::Number(1.0)]).expect("toFixed");
        assert!(matches!(out, RtValue::Str(ref t) if t == "1.0"));
        assert!(number_method(1.0, "toFixed", &[RtValue::Number(101.0)]).is_err());
    }
}
