use tt_core::Term;

use crate::{InterpretError, Interpreter};

/// Binds every discrete free dim to its `Arange` and evaluates with
/// `interpreter`. Continuous dims stay symbolic.
pub fn materialize(interpreter: &Interpreter, term: &Term) -> Result<Term, InterpretError> {
    let bindings = term.materialize_bindings();
    tracing::debug!(term = %term.id(), bound = bindings.len(), "materialize");
    if bindings.is_empty() {
        return interpreter.interpret(term);
    }
    interpreter.interpret(&term.call(bindings)?)
}
