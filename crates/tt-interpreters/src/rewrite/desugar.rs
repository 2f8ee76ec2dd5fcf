use tt_core::{Term, TermKind, View};
use tt_dispatch::Signature;

use crate::InterpretError;
use crate::interpreter::{Ctx, Stage};

/// `Unary` and `Binary` nodes become single-op `Finitary` nodes so later
/// stages only match one combine shape.
#[must_use]
pub fn desugar_stage() -> Stage {
    let stage = Stage::new("desugar");
    stage.register(Signature::new(TermKind::Unary), desugar);
    stage.register(Signature::new(TermKind::Binary), desugar);
    stage
}

fn desugar(term: &Term, _: &Ctx<'_>) -> Result<Option<Term>, InterpretError> {
    let rewritten = match term.view() {
        View::Unary { op, arg } => Term::finitary(op, vec![arg.clone()])?,
        View::Binary { op, lhs, rhs } => Term::finitary(op, vec![lhs.clone(), rhs.clone()])?,
        _ => return Ok(None),
    };
    Ok(Some(rewritten))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::desugar_stage;
    use crate::{Environment, Interpreter};
    use tt_core::{Op, Size, Term, View};

    #[test]
    fn unary_and_binary_become_finitary() {
        let x = Term::variable("x", Size::Discrete(2));
        let y = Term::variable("y", Size::Discrete(3));
        let term = x.exp().expect("exp").mul(&y).expect("mul");
        let interp = Interpreter::new(vec![Rc::new(desugar_stage())], Rc::new(Environment::cpu()));
        let out = interp.interpret(&term).expect("desugar");
        let View::Finitary { op, operands } = out.view() else {
            panic!("expected finitary, got {out:?}");
        };
        assert_eq!(op, Op::Mul);
        assert_eq!(operands[1], y);
        assert_eq!(
            operands[0],
            Term::finitary(Op::Exp, vec![x]).expect("finitary exp")
        );
    }
}
