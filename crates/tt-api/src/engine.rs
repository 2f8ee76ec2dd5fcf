use std::cell::Cell;
use std::rc::Rc;

use tracing::instrument;
use tt_core::{DimSet, Op, Term};
use tt_dispatch::Signature;
use tt_interpreters::{
    ArgReduced, ContractRequest, ContractionAlgebra, CostModel, Ctx, Environment, InterpretError,
    Interpreter, Pipeline, Stage, rewrite,
};
use tt_lax::threefry::{random_fold_in, random_key};
use tt_lax::{NumericBackend, PRNGKey, backend_by_name};

use crate::config::{EngineConfig, EvalMode};
use crate::errors::ApiError;

/// Owns one backend, one contraction algebra and the interpreters built on
/// them. Handlers registered on the engine are seen by every mode that runs
/// the eager stage.
pub struct Engine {
    config: EngineConfig,
    env: Rc<Environment>,
    eager_stage: Rc<Stage>,
    lazy: Interpreter,
    eager: Interpreter,
    pipeline: Pipeline,
    draws: Cell<u32>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ApiError> {
        config.validate()?;
        let backend = backend_by_name(&config.backend).ok_or_else(|| ApiError::UnknownBackend {
            name: config.backend.clone(),
        })?;
        let env = Rc::new(Environment::new(
            backend,
            Rc::new(ContractionAlgebra::with_defaults()),
            CostModel {
                continuous_size: config.continuous_size,
            },
        ));
        let eager_stage = Rc::new(tt_interpreters::eager_stage());
        let eager = Interpreter::new(vec![Rc::clone(&eager_stage)], Rc::clone(&env));
        let rewrite = Interpreter::new(
            vec![
                Rc::new(rewrite::desugar_stage()),
                Rc::new(rewrite::canonicalize_stage()),
                Rc::new(rewrite::optimize_stage()),
            ],
            Rc::clone(&env),
        );
        tracing::debug!(
            mode = config.mode.as_str(),
            backend = %config.backend,
            "engine ready"
        );
        Ok(Self {
            lazy: Interpreter::reflect(Rc::clone(&env)),
            pipeline: Pipeline::new(rewrite, eager.clone()),
            eager,
            eager_stage,
            env,
            config,
            draws: Cell::new(0),
        })
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(EngineConfig::default().with_env_overrides()?)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &dyn NumericBackend {
        self.env.backend()
    }

    /// The term as built; no handler runs.
    #[instrument(level = "debug", skip_all, fields(term = %term.id()))]
    pub fn reflect(&self, term: &Term) -> Result<Term, ApiError> {
        Ok(self.lazy.interpret(term)?)
    }

    #[instrument(level = "debug", skip_all, fields(term = %term.id()))]
    pub fn eager(&self, term: &Term) -> Result<Term, ApiError> {
        self.finish(self.eager.interpret(term))
    }

    #[instrument(level = "debug", skip_all, fields(term = %term.id()))]
    pub fn pipeline(&self, term: &Term) -> Result<Term, ApiError> {
        self.finish(self.pipeline.run(term))
    }

    /// Interprets `term` under the configured mode.
    pub fn evaluate(&self, term: &Term) -> Result<Term, ApiError> {
        match self.config.mode {
            EvalMode::Lazy => self.reflect(term),
            EvalMode::Eager => self.eager(term),
            EvalMode::Pipeline => self.pipeline(term),
        }
    }

    /// Rewrite pass only: sum-product reductions come back as pairwise
    /// contraction sequences, still lazy.
    #[instrument(level = "debug", skip_all, fields(term = %term.id()))]
    pub fn optimize(&self, term: &Term) -> Result<Term, ApiError> {
        self.finish(self.pipeline.optimize(term))
    }

    /// Substitutes `Arange` for every discrete free dim and evaluates eagerly.
    #[instrument(level = "debug", skip_all, fields(term = %term.id()))]
    pub fn materialize(&self, term: &Term) -> Result<Term, ApiError> {
        self.finish(tt_interpreters::materialize(&self.eager, term))
    }

    #[instrument(level = "debug", skip_all, fields(sum = sum_op.as_str(), prod = prod_op.as_str()))]
    pub fn contract(
        &self,
        sum_op: Op,
        prod_op: Op,
        lhs: &Term,
        rhs: &Term,
        reduce_dims: &DimSet,
    ) -> Result<Term, ApiError> {
        Ok(self.env.contraction().contract(
            self.env.backend(),
            sum_op,
            prod_op,
            lhs,
            rhs,
            reduce_dims,
        )?)
    }

    /// Argmin/argmax/sample over one dim. Each call draws a fresh key from
    /// the configured seed.
    #[instrument(level = "debug", skip_all, fields(op = op.as_str(), dims = ?dims))]
    pub fn argreduce(&self, term: &Term, op: Op, dims: &DimSet) -> Result<ArgReduced, ApiError> {
        let key = self.next_key();
        Ok(tt_interpreters::argreduce(
            self.env.backend(),
            term,
            op,
            dims,
            key,
        )?)
    }

    /// Adds an eager handler; it applies to `eager`, `pipeline` and
    /// `materialize` from the next call on.
    pub fn register_eager<F>(&self, signature: Signature, handler: F)
    where
        F: Fn(&Term, &Ctx<'_>) -> Result<Option<Term>, InterpretError> + 'static,
    {
        self.eager_stage.register(signature, handler);
    }

    pub fn register_contraction<F>(&self, signature: Signature, handler: F)
    where
        F: Fn(&ContractRequest<'_>, &dyn NumericBackend) -> Result<Option<Term>, InterpretError>
            + 'static,
    {
        self.env.contraction().register(signature, handler);
    }

    fn next_key(&self) -> PRNGKey {
        let draw = self.draws.get();
        self.draws.set(draw.wrapping_add(1));
        random_fold_in(random_key(self.config.seed), draw)
    }

    fn finish(&self, result: Result<Term, InterpretError>) -> Result<Term, ApiError> {
        let term = result?;
        let live = tt_core::interned_count();
        if live > self.config.sweep_threshold {
            tt_core::sweep_interner();
            tracing::debug!(
                before = live,
                after = tt_core::interned_count(),
                "swept interner"
            );
        }
        Ok(term)
    }
}
