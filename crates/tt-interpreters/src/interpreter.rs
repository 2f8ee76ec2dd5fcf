use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tt_core::{Term, TermId};
use tt_dispatch::{DispatchKey, Dispatched, Registry, Signature};
use tt_lax::NumericBackend;

use crate::contract::ContractionAlgebra;
use crate::rewrite::{self, CostModel};
use crate::trampoline::Trampoline;
use crate::{InterpretError, eager};

/// A stage handler. `Ok(None)` declines and lets the term fall through.
pub type Handler = dyn Fn(&Term, &Ctx<'_>) -> Result<Option<Term>, InterpretError>;

/// Resources shared by every stage of an interpreter.
pub struct Environment {
    backend: Rc<dyn NumericBackend>,
    contraction: Rc<ContractionAlgebra>,
    cost_model: CostModel,
}

impl Environment {
    #[must_use]
    pub fn new(
        backend: Rc<dyn NumericBackend>,
        contraction: Rc<ContractionAlgebra>,
        cost_model: CostModel,
    ) -> Self {
        Self {
            backend,
            contraction,
            cost_model,
        }
    }

    /// CPU backend, default contraction handlers, default cost model.
    #[must_use]
    pub fn cpu() -> Self {
        Self::new(
            Rc::new(tt_lax::CpuBackend),
            Rc::new(ContractionAlgebra::with_defaults()),
            CostModel::default(),
        )
    }

    #[must_use]
    pub fn backend(&self) -> &dyn NumericBackend {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn contraction(&self) -> &ContractionAlgebra {
        &self.contraction
    }

    #[must_use]
    pub fn cost_model(&self) -> CostModel {
        self.cost_model
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("backend", &self.backend.name())
            .field("cost_model", &self.cost_model)
            .finish_non_exhaustive()
    }
}

/// One layer of an interpreter: a named handler registry.
#[derive(Debug)]
pub struct Stage {
    registry: Registry<Handler>,
}

impl Stage {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            registry: Registry::new(name),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.registry.name()
    }

    #[must_use]
    pub fn registry(&self) -> &Registry<Handler> {
        &self.registry
    }

    pub fn register<F>(&self, signature: Signature, handler: F)
    where
        F: Fn(&Term, &Ctx<'_>) -> Result<Option<Term>, InterpretError> + 'static,
    {
        self.registry.register(signature, Rc::new(handler));
    }
}

/// What a handler sees besides the term: the environment and a way to send
/// freshly built subterms through the remaining stages.
pub struct Ctx<'a> {
    interpreter: &'a Interpreter,
    stage: usize,
}

impl Ctx<'_> {
    #[must_use]
    pub fn backend(&self) -> &dyn NumericBackend {
        self.interpreter.env.backend()
    }

    #[must_use]
    pub fn contraction(&self) -> &ContractionAlgebra {
        self.interpreter.env.contraction()
    }

    #[must_use]
    pub fn cost_model(&self) -> CostModel {
        self.interpreter.env.cost_model()
    }

    #[must_use]
    pub fn stage_name(&self) -> &'static str {
        self.interpreter.stages[self.stage].name()
    }

    /// Runs `term` through the stages after the current one.
    pub fn forward(&self, term: Term) -> Result<Term, InterpretError> {
        self.interpreter.apply_from(term, self.stage + 1)
    }

    /// Runs `term` through the current stage and every later one.
    pub fn revisit(&self, term: Term) -> Result<Term, InterpretError> {
        self.interpreter.apply_from(term, self.stage)
    }

    /// Walks all of `term` bottom-up through the current stage and every
    /// later one, on a fresh queue program.
    pub fn reinterpret(&self, term: &Term) -> Result<Term, InterpretError> {
        self.interpreter.interpret_from(term, self.stage)
    }
}

/// An ordered stack of stages applied bottom-up over a term DAG.
#[derive(Debug, Clone)]
pub struct Interpreter {
    stages: Vec<Rc<Stage>>,
    env: Rc<Environment>,
}

impl Interpreter {
    #[must_use]
    pub fn new(stages: Vec<Rc<Stage>>, env: Rc<Environment>) -> Self {
        Self { stages, env }
    }

    /// No stages: every node is reflected as built.
    #[must_use]
    pub fn reflect(env: Rc<Environment>) -> Self {
        Self::new(Vec::new(), env)
    }

    #[must_use]
    pub fn eager(env: Rc<Environment>) -> Self {
        Self::new(vec![Rc::new(eager::eager_stage())], env)
    }

    #[must_use]
    pub fn stages(&self) -> &[Rc<Stage>] {
        &self.stages
    }

    #[must_use]
    pub fn env(&self) -> &Rc<Environment> {
        &self.env
    }

    /// Hands a single, already-rebuilt node to the stages from `start` on.
    pub(crate) fn apply_from(&self, mut term: Term, start: usize) -> Result<Term, InterpretError> {
        for (index, stage) in self.stages.iter().enumerate().skip(start) {
            let ctx = Ctx {
                interpreter: self,
                stage: index,
            };
            let key = DispatchKey::of(&term);
            match stage.registry.dispatch(&key, |handler| handler(&term, &ctx))? {
                Dispatched::Handled(next) => {
                    tracing::trace!(stage = stage.name(), key = %key, result = %next.id(), "rewrote");
                    term = next;
                }
                Dispatched::Declined | Dispatched::NoHandler => {}
            }
        }
        Ok(term)
    }

    /// Re-interprets every node of `root` bottom-up, children before parents.
    pub fn interpret(&self, root: &Term) -> Result<Term, InterpretError> {
        self.interpret_from(root, 0)
    }

    pub(crate) fn interpret_from(&self, root: &Term, start: usize) -> Result<Term, InterpretError> {
        if self.stages.len() <= start {
            return Ok(root.clone());
        }
        let program = QueueProgram::compile(root);
        tracing::debug!(
            nodes = program.node_count,
            levels = program.levels.len(),
            shared = program.shared.len(),
            "compiled queue program"
        );

        let memo: RefCell<FxHashMap<TermId, Term>> = RefCell::new(FxHashMap::default());
        let mut driver: Trampoline<'_, Term, InterpretError> = Trampoline::new();
        for level in program.levels.iter().rev() {
            for slot in level.iter().rev() {
                let term = slot.term.clone();
                if slot.expand {
                    let remember = program.shared.contains(&term.id());
                    let nargs = term.args().len();
                    let memo = &memo;
                    driver.schedule(
                        Box::new(move |args, _| {
                            let rebuilt = term.with_args(&args)?;
                            let result = self.apply_from(rebuilt, start)?;
                            if remember {
                                memo.borrow_mut().insert(term.id(), result.clone());
                            }
                            Ok(result)
                        }),
                        nargs,
                        0,
                    );
                } else {
                    let memo = &memo;
                    driver.schedule(
                        Box::new(move |_, _| {
                            memo.borrow().get(&term.id()).cloned().ok_or_else(|| {
                                InterpretError::Driver {
                                    detail: format!(
                                        "shared subterm {} recalled before evaluation",
                                        term.id()
                                    ),
                                }
                            })
                        }),
                        0,
                        0,
                    );
                }
            }
        }
        Ok(driver.run()?)
    }
}

/// One occurrence of a node in the level-ordered traversal.
struct Slot {
    term: Term,
    /// Evaluated here (its deepest occurrence) rather than recalled.
    expand: bool,
}

/// Level-ordered occurrence lists for a term DAG.
///
/// Executing the levels deepest first, each level right to left, leaves every
/// node's children at the front of the positional queue in argument order.
struct QueueProgram {
    levels: Vec<Vec<Slot>>,
    shared: FxHashSet<TermId>,
    node_count: usize,
}

impl QueueProgram {
    fn compile(root: &Term) -> Self {
        let order = post_order(root);

        // Longest path from the root; parents precede children in `order.rev()`.
        let mut depth: FxHashMap<TermId, usize> = FxHashMap::default();
        depth.insert(root.id(), 0);
        for term in order.iter().rev() {
            let here = depth.get(&term.id()).copied().unwrap_or(0);
            for child in term.args() {
                let entry = depth.entry(child.id()).or_insert(0);
                *entry = (*entry).max(here + 1);
            }
        }

        let mut levels: Vec<Vec<Slot>> = Vec::new();
        let mut expanded: FxHashSet<TermId> = FxHashSet::default();
        let mut shared: FxHashSet<TermId> = FxHashSet::default();
        let mut current = vec![Slot {
            term: root.clone(),
            expand: false,
        }];
        let mut level = 0;
        while !current.is_empty() {
            // The last occurrence at a node's deepest level runs first.
            for slot in current.iter_mut().rev() {
                let id = slot.term.id();
                if depth.get(&id) == Some(&level) && expanded.insert(id) {
                    slot.expand = true;
                } else {
                    shared.insert(id);
                }
            }
            let next: Vec<Slot> = current
                .iter()
                .filter(|slot| slot.expand)
                .flat_map(|slot| slot.term.args().iter().rev())
                .map(|child| Slot {
                    term: child.clone(),
                    expand: false,
                })
                .collect();
            levels.push(current);
            current = next;
            level += 1;
        }

        Self {
            levels,
            shared,
            node_count: order.len(),
        }
    }
}

/// Unique nodes, children before parents, without recursion.
fn post_order(root: &Term) -> Vec<Term> {
    let mut order = Vec::new();
    let mut visited: FxHashSet<TermId> = FxHashSet::default();
    let mut stack = vec![(root.clone(), false)];
    while let Some((term, children_done)) = stack.pop() {
        if children_done {
            order.push(term);
            continue;
        }
        if !visited.insert(term.id()) {
            continue;
        }
        let children: Vec<Term> = term
            .args()
            .iter()
            .filter(|child| !visited.contains(&child.id()))
            .cloned()
            .collect();
        stack.push((term, true));
        stack.extend(children.into_iter().map(|child| (child, false)));
    }
    order
}

/// Two bottom-up passes: the rewrite stages, then eager evaluation.
///
/// Keeping eager evaluation in its own pass means a concrete subterm is
/// never evaluated before the optimizer has seen its enclosing reduction.
#[derive(Debug, Clone)]
pub struct Pipeline {
    rewrite: Interpreter,
    eager: Interpreter,
}

impl Pipeline {
    #[must_use]
    pub fn new(rewrite: Interpreter, eager: Interpreter) -> Self {
        Self { rewrite, eager }
    }

    /// desugar → canonicalize → optimize, then eager.
    #[must_use]
    pub fn standard(env: Rc<Environment>) -> Self {
        let rewrite = Interpreter::new(
            vec![
                Rc::new(rewrite::desugar_stage()),
                Rc::new(rewrite::canonicalize_stage()),
                Rc::new(rewrite::optimize_stage()),
            ],
            Rc::clone(&env),
        );
        Self::new(rewrite, Interpreter::eager(env))
    }

    #[must_use]
    pub fn rewriter(&self) -> &Interpreter {
        &self.rewrite
    }

    #[must_use]
    pub fn evaluator(&self) -> &Interpreter {
        &self.eager
    }

    /// Rewrite pass only; the result stays lazy.
    pub fn optimize(&self, term: &Term) -> Result<Term, InterpretError> {
        self.rewrite.interpret(term)
    }

    pub fn run(&self, term: &Term) -> Result<Term, InterpretError> {
        let rewritten = self.rewrite.interpret(term)?;
        self.eager.interpret(&rewritten)
    }
}
