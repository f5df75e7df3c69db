use crate::interpreter::value::Value;
use crate::scanner::token::Token;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One lexical scope. Scopes are shared (`Rc`) so a closure keeps its
/// defining scope alive after the block that created it has finished.
#[derive(Debug, Default)]
pub struct Environment {
    enclosing: Option<Rc<Environment>>,
    values: RefCell<HashMap<String, Value>>,
}

impl Environment {
    /// A global scope, with no enclosing environment.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_enclosing(enclosing: Rc<Environment>) -> Self {
        Self {
            enclosing: Some(enclosing),
            values: RefCell::new(HashMap::new()),
        }
    }

    /// Create a function-call environment with `params` bound to `args` in
    /// order. The caller has already checked that the counts match.
    pub fn new_for_call(
        enclosing: Rc<Environment>,
        params: &[Token],
        args: SmallVec<[Value; 4]>,
    ) -> Self {
        let values = params
            .iter()
            .map(|p| p.lexeme.clone())
            .zip(args)
            .collect();
        Self {
            enclosing: Some(enclosing),
            values: RefCell::new(values),
        }
    }

    /// Bind `name` in this scope. Redeclaring overwrites the old binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.values.borrow_mut().insert(name.into(), value);
    }

    /// Look `name` up in this scope, then outward along the chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut current = self;
        loop {
            if let Some(value) = current.values.borrow().get(name) {
                return Some(value.clone());
            }
            current = current.enclosing.as_deref()?;
        }
    }

    /// Overwrite the innermost existing binding of `name`. Returns `false`
    /// when no scope on the chain defines it; assignment never declares.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut current = self;
        loop {
            if let Some(slot) = current.values.borrow_mut().get_mut(name) {
                *slot = value;
                return true;
            }
            match current.enclosing.as_deref() {
                Some(enclosing) => current = enclosing,
                None => return false,
            }
        }
    }
}
