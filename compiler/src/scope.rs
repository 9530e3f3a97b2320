use crate::error::{KdlError, Location};
use crate::token::Token;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A native callback bound into a scope. Functions return their result
/// rather than writing into captured state.
pub type NativeFunction = Rc<dyn Fn(&[Token], &Location) -> Result<Token, KdlError>>;

pub fn native<F>(function: F) -> NativeFunction
where
    F: Fn(&[Token], &Location) -> Result<Token, KdlError> + 'static,
{
    Rc::new(function)
}

/// A lexical binding environment. Child scopes borrow their parent, so a
/// scope can never outlive the frame that created it, and lookups walk the
/// chain innermost first without ever writing to an ancestor.
#[derive(Default)]
pub struct Scope<'p> {
    parent:    Option<&'p Scope<'p>>,
    variables: HashMap<String, Token>,
    functions: HashMap<String, NativeFunction>,
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        f.debug_struct("Scope")
            .field("variables", &self.variables)
            .field("functions", &functions)
            .field("parent", &self.parent)
            .finish()
    }
}

impl<'p> Scope<'p> {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn child(&self) -> Scope<'_> {
        Scope {
            parent:    Some(self),
            variables: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    /// Binds in this scope only; an ancestor's binding of the same name is
    /// shadowed, never replaced.
    pub fn set_variable(&mut self, name: &str, value: Token) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Token> {
        match self.variables.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.variable(name)),
        }
    }

    /// Variables bound directly in this scope whose name starts with
    /// `prefix`, sorted by name.
    pub fn local_variables_with_prefix(&self, prefix: &str) -> Vec<(String, Token)> {
        let mut out: Vec<(String, Token)> = self
            .variables
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn add_function(&mut self, name: &str, function: NativeFunction) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn function(&self, name: &str) -> Option<NativeFunction> {
        match self.functions.get(name) {
            Some(function) => Some(Rc::clone(function)),
            None => self.parent.and_then(|parent| parent.function(name)),
        }
    }
}
