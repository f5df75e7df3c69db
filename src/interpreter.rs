pub mod environment;
pub mod value;

use crate::config::RuntimeConfig;
use crate::interpreter::environment::Environment;
use crate::interpreter::value::{Function, Value};
use crate::parser::ast::{Expr, Stmt};
use crate::scanner::token::{Token, TokenType};
use crate::stack::ensure_sufficient_stack;
use smallvec::SmallVec;
use std::io::Write;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Operands must be two numbers or two strings.")]
    OperandsMustBeNumbersOrStrings,
    #[error("Division by zero.")]
    DivisionByZero,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Can only call functions, not {0}.")]
    NotCallable(&'static str),
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: usize, got: usize },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Failed to write output: {0}")]
    Output(String),
    // Operator/node combinations the parser never produces. Seeing this
    // means a bug in the interpreter, not in the program.
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// A failure that aborts the rest of the current run. Always points at the
/// token that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Error: {} around '{}': {}", .token.line, .token.display_lexeme(), .kind)]
pub struct RuntimeError {
    pub token: Token,
    pub kind: RuntimeErrorKind,
}

impl RuntimeError {
    pub fn new(token: &Token, kind: RuntimeErrorKind) -> Self {
        Self {
            token: token.clone(),
            kind,
        }
    }
}

// How a statement finished. `Returned` unwinds through blocks and loops up
// to the nearest call; errors travel separately in the `Err` side.
// NOT public because a return must never leak past a call boundary.
#[derive(Debug, Clone)]
enum Flow {
    Completed,
    Returned(Value),
}

// Run a statement and stop the enclosing block/loop if it returned
macro_rules! prop {
    ($expr:expr) => {
        match $expr? {
            Flow::Completed => {}
            returned => return Ok(returned),
        }
    };
}

pub struct Interpreter<W: Write> {
    // Every environment passed around during a run descends from this one.
    globals: Rc<Environment>,
    out: W,
    runtime_config: RuntimeConfig,
    call_depth: usize,
}

impl<W: Write> Interpreter<W> {
    pub fn new(out: W, runtime_config: RuntimeConfig) -> Self {
        Self {
            globals: Rc::new(Environment::new()),
            out,
            runtime_config,
            call_depth: 0,
        }
    }

    pub fn globals(&self) -> &Rc<Environment> {
        &self.globals
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Execute `statements` against the global environment, which persists
    /// across calls.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<(), RuntimeError> {
        let globals = Rc::clone(&self.globals);
        self.run(statements, &globals)
    }

    /// Execute `statements` in order against `env`, stopping at the first
    /// runtime error. A `return` at this level (which the parser rejects)
    /// just ends the run.
    pub fn run(&mut self, statements: &[Stmt], env: &Rc<Environment>) -> Result<(), RuntimeError> {
        tracing::debug!(statements = statements.len(), "running program");
        self.call_depth = 0;
        for stmt in statements {
            if let Flow::Returned(_) = self.execute(stmt, env)? {
                break;
            }
        }
        Ok(())
    }

    fn execute(&mut self, stmt: &Stmt, env: &Rc<Environment>) -> Result<Flow, RuntimeError> {
        ensure_sufficient_stack(|| self.execute_stmt(stmt, env))
    }

    fn execute_stmt(&mut self, stmt: &Stmt, env: &Rc<Environment>) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr, env)?;
            }
            Stmt::Print { keyword, expr } => {
                let value = self.evaluate(expr, env)?;
                writeln!(self.out, "{}", value).map_err(|e| {
                    RuntimeError::new(keyword, RuntimeErrorKind::Output(e.to_string()))
                })?;
            }
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr, env)?,
                    None => Value::Nil,
                };
                env.define(name.lexeme.clone(), value);
            }
            Stmt::Block(statements) => {
                // The child scope is dropped on every exit path; the caller's
                // `env` was never replaced, so there is nothing to restore.
                let scope = Rc::new(Environment::new_with_enclosing(Rc::clone(env)));
                return self.execute_block(statements, &scope);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, env)?.is_truthy() {
                    return self.execute(then_branch, env);
                } else if let Some(else_branch) = else_branch {
                    return self.execute(else_branch, env);
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition, env)?.is_truthy() {
                    prop!(self.execute(body, env));
                }
            }
            Stmt::Function(declaration) => {
                let function = Function {
                    declaration: Rc::clone(declaration),
                    closure: Rc::clone(env),
                };
                env.define(declaration.name.lexeme.clone(), Value::Fn(Rc::new(function)));
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr, env)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Returned(value));
            }
        }
        Ok(Flow::Completed)
    }

    fn execute_block(
        &mut self,
        statements: &[Stmt],
        env: &Rc<Environment>,
    ) -> Result<Flow, RuntimeError> {
        for stmt in statements {
            prop!(self.execute(stmt, env));
        }
        Ok(Flow::Completed)
    }

    fn evaluate(&mut self, expression: &Expr, env: &Rc<Environment>) -> Result<Value, RuntimeError> {
        ensure_sufficient_stack(|| self.evaluate_expr(expression, env))
    }

    fn evaluate_expr(
        &mut self,
        expression: &Expr,
        env: &Rc<Environment>,
    ) -> Result<Value, RuntimeError> {
        match expression {
            Expr::Literal(literal) => Ok(Value::from(literal)),
            Expr::Grouping(inner) => self.evaluate(inner, env),
            Expr::Unary { operator, operand } => {
                let operand = self.evaluate(operand, env)?;
                unary(operator, operand)
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, env)?;
                let right = self.evaluate(right, env)?;
                binary(operator, left, right)
            }
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, env)?;
                // handle the short-circuit
                let short_circuits = match operator.token_type {
                    TokenType::Or => left.is_truthy(),
                    TokenType::And => !left.is_truthy(),
                    _ => {
                        return Err(RuntimeError::new(
                            operator,
                            RuntimeErrorKind::Internal("unexpected logical operator"),
                        ))
                    }
                };
                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right, env)
                }
            }
            Expr::Variable(name) => env.get(&name.lexeme).ok_or_else(|| {
                RuntimeError::new(name, RuntimeErrorKind::UndefinedVariable(name.lexeme.clone()))
            }),
            Expr::Assign { name, value } => {
                let value = self.evaluate(value, env)?;
                if env.assign(&name.lexeme, value.clone()) {
                    Ok(value)
                } else {
                    Err(RuntimeError::new(
                        name,
                        RuntimeErrorKind::UndefinedVariable(name.lexeme.clone()),
                    ))
                }
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee, env)?;
                let mut argument_values = SmallVec::with_capacity(arguments.len());
                for argument in arguments {
                    argument_values.push(self.evaluate(argument, env)?);
                }
                self.call_function(callee, argument_values, paren)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(line = paren.line))]
    fn call_function(
        &mut self,
        callee: Value,
        args: SmallVec<[Value; 4]>,
        paren: &Token,
    ) -> Result<Value, RuntimeError> {
        let function = match callee {
            Value::Fn(function) => function,
            other => {
                return Err(RuntimeError::new(
                    paren,
                    RuntimeErrorKind::NotCallable(other.type_name()),
                ))
            }
        };

        if args.len() != function.arity() {
            return Err(RuntimeError::new(
                paren,
                RuntimeErrorKind::ArityMismatch {
                    expected: function.arity(),
                    got: args.len(),
                },
            ));
        }

        if self.call_depth >= self.runtime_config.max_call_depth {
            return Err(RuntimeError::new(paren, RuntimeErrorKind::StackOverflow));
        }

        tracing::trace!(function = function.name(), depth = self.call_depth, "call");

        // Enclosed by the declaration-site scope, not the caller's
        let call_env = Rc::new(Environment::new_for_call(
            Rc::clone(&function.closure),
            &function.declaration.params,
            args,
        ));

        self.call_depth += 1;
        let result = self.execute_block(&function.declaration.body, &call_env);
        self.call_depth -= 1;

        match result? {
            Flow::Returned(value) => Ok(value),
            Flow::Completed => Ok(Value::Nil),
        }
    }
}

fn unary(operator: &Token, operand: Value) -> Result<Value, RuntimeError> {
    match (operator.token_type, operand) {
        (TokenType::Bang, value) => Ok(Value::Bool(!value.is_truthy())),
        (TokenType::Minus, Value::Num(n)) => Ok(Value::Num(-n)),
        (TokenType::Minus, _) => Err(RuntimeError::new(
            operator,
            RuntimeErrorKind::OperandMustBeNumber,
        )),
        _ => Err(RuntimeError::new(
            operator,
            RuntimeErrorKind::Internal("unexpected unary operator"),
        )),
    }
}

fn binary(operator: &Token, left: Value, right: Value) -> Result<Value, RuntimeError> {
    let fail = |kind| Err(RuntimeError::new(operator, kind));

    match (operator.token_type, left, right) {
        // equality never fails, whatever the operand types
        (TokenType::EqualEqual, l, r) => Ok(Value::Bool(l == r)),
        (TokenType::BangEqual, l, r) => Ok(Value::Bool(l != r)),

        // arithmetic
        (TokenType::Plus, Value::Num(n1), Value::Num(n2)) => Ok(Value::Num(n1 + n2)),
        (TokenType::Plus, Value::Str(s1), Value::Str(s2)) => {
            let mut s = String::with_capacity(s1.len() + s2.len());
            s.push_str(&s1);
            s.push_str(&s2);
            Ok(Value::Str(Rc::from(s)))
        }
        (TokenType::Plus, _, _) => fail(RuntimeErrorKind::OperandsMustBeNumbersOrStrings),
        (TokenType::Minus, Value::Num(n1), Value::Num(n2)) => Ok(Value::Num(n1 - n2)),
        (TokenType::Star, Value::Num(n1), Value::Num(n2)) => Ok(Value::Num(n1 * n2)),
        (TokenType::Slash, Value::Num(n1), Value::Num(n2)) => {
            if n2 == 0.0 {
                fail(RuntimeErrorKind::DivisionByZero)
            } else {
                Ok(Value::Num(n1 / n2))
            }
        }

        // comparison
        (TokenType::Greater, Value::Num(n1), Value::Num(n2)) => Ok(Value::Bool(n1 > n2)),
        (TokenType::GreaterEqual, Value::Num(n1), Value::Num(n2)) => Ok(Value::Bool(n1 >= n2)),
        (TokenType::Less, Value::Num(n1), Value::Num(n2)) => Ok(Value::Bool(n1 < n2)),
        (TokenType::LessEqual, Value::Num(n1), Value::Num(n2)) => Ok(Value::Bool(n1 <= n2)),

        (
            TokenType::Minus
            | TokenType::Star
            | TokenType::Slash
            | TokenType::Greater
            | TokenType::GreaterEqual
            | TokenType::Less
            | TokenType::LessEqual,
            _,
            _,
        ) => fail(RuntimeErrorKind::OperandsMustBeNumbers),

        _ => fail(RuntimeErrorKind::Internal("unexpected binary operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_CALL_DEPTH;
    use crate::parser::parse;
    use crate::scanner::scan;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn run_with(source: &str, config: RuntimeConfig) -> (String, Result<(), RuntimeError>) {
        let (statements, errors) = parse(scan(source).unwrap());
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
        let mut interpreter = Interpreter::new(Vec::new(), config);
        let result = interpreter.interpret(&statements);
        let output = String::from_utf8(interpreter.into_output()).unwrap();
        (output, result)
    }

    fn run(source: &str) -> (String, Result<(), RuntimeError>) {
        run_with(source, RuntimeConfig::default())
    }

    fn output_of(source: &str) -> String {
        let (output, result) = run(source);
        if let Err(e) = result {
            panic!("runtime error: {}", e);
        }
        output
    }

    fn error_of(source: &str) -> RuntimeError {
        run(source).1.expect_err("expected a runtime error")
    }

    fn token(token_type: TokenType, lexeme: &str) -> Token {
        Token::new(token_type, lexeme, 1)
    }

    #[test]
    fn print_renders_values() {
        assert_eq!(
            output_of(r#"print 3; print 2.5; print -0.5; print "hi"; print nil; print true; print false;"#),
            "3\n2.5\n-0.5\nhi\nnil\ntrue\nfalse\n"
        );
    }

    #[test]
    fn print_renders_functions() {
        assert_eq!(output_of("fun f() {} print f;"), "<fn f>\n");
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(output_of("print 1 + 2 * 3;"), "7\n");
        assert_eq!(output_of("print (1 + 2) * 3;"), "9\n");
        assert_eq!(output_of("print 2 - 3 - 4;"), "-5\n");
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(output_of(r#"print "foo" + "bar";"#), "foobar\n");
    }

    #[test]
    fn string_plus_number_is_an_error() {
        let error = error_of(r#"print "a" + 1;"#);
        assert_eq!(error.kind, RuntimeErrorKind::OperandsMustBeNumbersOrStrings);
        assert_eq!(error.token.lexeme, "+");
    }

    #[test]
    fn comparison_requires_numbers() {
        let error = error_of(r#"print "a" < "b";"#);
        assert_eq!(error.kind, RuntimeErrorKind::OperandsMustBeNumbers);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let error = error_of("print 1 / 0;");
        assert_eq!(error.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(error.to_string(), "Error: 1 around '/': Division by zero.");
    }

    #[test]
    fn negation_requires_a_number() {
        let error = error_of(r#"print -"x";"#);
        assert_eq!(error.kind, RuntimeErrorKind::OperandMustBeNumber);
    }

    #[test]
    fn bang_applies_truthiness() {
        assert_eq!(
            output_of(r#"print !nil; print !false; print !0; print !""; print !!true;"#),
            "true\ntrue\nfalse\nfalse\ntrue\n"
        );
    }

    #[test]
    fn equality_across_types_is_false() {
        assert_eq!(output_of(r#"print 1 == "1";"#), "false\n");
        assert_eq!(output_of(r#"print nil == false;"#), "false\n");
        assert_eq!(output_of(r#"print nil == nil;"#), "true\n");
        assert_eq!(output_of(r#"print "a" != "a";"#), "false\n");
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(
            output_of(r#"print nil or "x"; print 1 or 2; print nil and 1; print 1 and 2;"#),
            "x\n1\nnil\n2\n"
        );
    }

    #[test]
    fn logical_operators_short_circuit() {
        // the right operand would fail if it were evaluated
        assert_eq!(output_of("print true or undefined; print false and undefined;"), "true\nfalse\n");
    }

    #[test]
    fn undefined_variable_read() {
        let error = error_of("print x;");
        assert_eq!(error.kind, RuntimeErrorKind::UndefinedVariable("x".into()));
    }

    #[test]
    fn assignment_never_declares() {
        let error = error_of("x = 1;");
        assert_eq!(error.kind, RuntimeErrorKind::UndefinedVariable("x".into()));
    }

    #[test]
    fn assignment_evaluates_to_assigned_value() {
        assert_eq!(output_of("var a; var b; a = b = 3; print a; print b;"), "3\n3\n");
    }

    #[test]
    fn uninitialized_variable_is_nil() {
        assert_eq!(output_of("var a; print a;"), "nil\n");
    }

    #[test]
    fn block_scope_is_dropped_after_error() {
        let source = "var a = 1; { var a = 2; print undefined; }";
        let mut interpreter = Interpreter::new(Vec::new(), RuntimeConfig::default());
        let (statements, _) = parse(scan(source).unwrap());
        assert!(interpreter.interpret(&statements).is_err());
        assert_eq!(interpreter.globals().get("a"), Some(Value::Num(1.0)));
    }

    #[test]
    fn non_callable_is_an_error() {
        let error = error_of(r#""str"();"#);
        assert_eq!(error.kind, RuntimeErrorKind::NotCallable("string"));
        assert_eq!(error.token.lexeme, ")");
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let error = error_of("fun f(a, b) {} f(1);");
        assert_eq!(
            error.kind,
            RuntimeErrorKind::ArityMismatch {
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn function_without_return_yields_nil() {
        assert_eq!(output_of("fun f() { 1; } print f();"), "nil\n");
    }

    #[test]
    fn return_exits_loops_and_blocks() {
        let source = "
            fun first_over(limit) {
                for (var i = 0; ; i = i + 1) {
                    { if (i > limit) return i; }
                }
            }
            print first_over(3);";
        assert_eq!(output_of(source), "4\n");
    }

    #[test]
    fn call_depth_is_limited() {
        let config = RuntimeConfig { max_call_depth: 16 };
        let (_, result) = run_with("fun f() { f(); } f();", config);
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::StackOverflow);
    }

    #[test]
    fn recursion_within_limit_works() {
        let config = RuntimeConfig { max_call_depth: 16 };
        let (output, result) = run_with(
            "fun count(n) { if (n == 0) return 0; return 1 + count(n - 1); } print count(15);",
            config,
        );
        assert!(result.is_ok());
        assert_eq!(output, "15\n");
    }

    const COUNT_DOWN: &str = "fun count(n) { if (n == 0) return 0; return 1 + count(n - 1); }";

    #[test]
    fn default_call_depth_is_reachable() {
        let depth = DEFAULT_MAX_CALL_DEPTH - 1;
        let source = format!("{} print count({});", COUNT_DOWN, depth);
        let (output, result) = run_with(&source, RuntimeConfig::default());
        assert_eq!(result, Ok(()));
        assert_eq!(output, format!("{}\n", depth));
    }

    #[test]
    fn default_call_depth_overflows_with_an_error() {
        let source = format!("{} print count({});", COUNT_DOWN, DEFAULT_MAX_CALL_DEPTH);
        let (output, result) = run_with(&source, RuntimeConfig::default());
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::StackOverflow);
        assert_eq!(output, "");
    }

    #[test]
    fn deep_call_limit_is_reported_not_crashed() {
        let config = RuntimeConfig {
            max_call_depth: 2_000,
        };
        let (_, result) = run_with("fun f() { f(); } f();", config);
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::StackOverflow);
    }

    #[test]
    fn depth_counter_resets_after_a_failed_run() {
        let config = RuntimeConfig { max_call_depth: 4 };
        let mut interpreter = Interpreter::new(Vec::new(), config);
        let (overflow, _) = parse(scan("fun f() { f(); } f();").unwrap());
        assert!(interpreter.interpret(&overflow).is_err());
        let (ok, _) = parse(scan("fun g(n) { if (n > 0) g(n - 1); } g(3);").unwrap());
        assert!(interpreter.interpret(&ok).is_ok());
    }

    #[test]
    fn runtime_error_stops_remaining_statements() {
        let (output, result) = run("print 1; print nil + 1; print 2;");
        assert!(result.is_err());
        assert_eq!(output, "1\n");
    }

    // --- Operator totality ---

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Nil),
            any::<bool>().prop_map(Value::Bool),
            any::<f64>().prop_map(Value::Num),
            "[a-z]{0,4}".prop_map(|s| Value::Str(s.into())),
        ]
    }

    fn binary_operator_strategy() -> impl Strategy<Value = Token> {
        prop::sample::select(vec![
            (TokenType::Plus, "+"),
            (TokenType::Minus, "-"),
            (TokenType::Star, "*"),
            (TokenType::Slash, "/"),
            (TokenType::Greater, ">"),
            (TokenType::GreaterEqual, ">="),
            (TokenType::Less, "<"),
            (TokenType::LessEqual, "<="),
            (TokenType::EqualEqual, "=="),
            (TokenType::BangEqual, "!="),
        ])
        .prop_map(|(t, lexeme)| token(t, lexeme))
    }

    proptest! {
        #[test]
        fn binary_operators_never_hit_internal_errors(
            operator in binary_operator_strategy(),
            left in value_strategy(),
            right in value_strategy(),
        ) {
            if let Err(error) = binary(&operator, left, right) {
                prop_assert!(!matches!(error.kind, RuntimeErrorKind::Internal(_)), "{}", error);
            }
        }

        #[test]
        fn unary_operators_never_hit_internal_errors(
            minus in any::<bool>(),
            operand in value_strategy(),
        ) {
            let operator = if minus {
                token(TokenType::Minus, "-")
            } else {
                token(TokenType::Bang, "!")
            };
            if let Err(error) = unary(&operator, operand) {
                prop_assert!(!matches!(error.kind, RuntimeErrorKind::Internal(_)), "{}", error);
            }
        }
    }

    #[test]
    fn unparseable_operator_is_reported_as_internal() {
        let error = binary(&token(TokenType::Comma, ","), Value::Nil, Value::Nil).unwrap_err();
        assert!(matches!(error.kind, RuntimeErrorKind::Internal(_)));
    }
}
