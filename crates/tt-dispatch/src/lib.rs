#![forbid(unsafe_code)]

//! Handler registry keyed by term kind, operator tags and operand kinds.
//!
//! Handlers are registered against a [`Signature`] pattern and selected for
//! a concrete [`DispatchKey`] most-specific-first. A selected handler may
//! decline, in which case the next candidate is tried; this is reported
//! separately from the case where no signature matches at all.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;

use tt_core::{Op, Term, TermKind};

// ── Keys and patterns ──────────────────────────────────────────────

/// Runtime discriminator of a dispatch request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub head: TermKind,
    pub ops: SmallVec<[Op; 2]>,
    pub operands: SmallVec<[TermKind; 4]>,
}

impl DispatchKey {
    #[must_use]
    pub fn new(
        head: TermKind,
        ops: impl IntoIterator<Item = Op>,
        operands: impl IntoIterator<Item = TermKind>,
    ) -> Self {
        Self {
            head,
            ops: ops.into_iter().collect(),
            operands: operands.into_iter().collect(),
        }
    }

    /// Key of a term node: its kind, its operator tags and its children's kinds.
    #[must_use]
    pub fn of(term: &Term) -> Self {
        Self {
            head: term.kind(),
            ops: term.ops(),
            operands: term.args().iter().map(Term::kind).collect(),
        }
    }
}

impl std::fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.head)?;
        for op in &self.ops {
            write!(f, ":{op}")?;
        }
        write!(f, "(")?;
        for (i, kind) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{kind}")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindPattern {
    Any,
    Exact(TermKind),
}

impl KindPattern {
    #[must_use]
    pub fn matches(self, kind: TermKind) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpPattern {
    Any,
    Exact(SmallVec<[Op; 2]>),
}

/// Pattern over dispatch keys.
///
/// `Signature::new(head)` matches every key with that head. Narrow it with
/// [`Signature::ops`], [`Signature::operands`] and [`Signature::variadic`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    head: TermKind,
    ops: OpPattern,
    operands: SmallVec<[KindPattern; 4]>,
    rest: Option<KindPattern>,
}

impl Signature {
    #[must_use]
    pub fn new(head: TermKind) -> Self {
        Self {
            head,
            ops: OpPattern::Any,
            operands: SmallVec::new(),
            rest: Some(KindPattern::Any),
        }
    }

    #[must_use]
    pub fn op(self, op: Op) -> Self {
        self.ops([op])
    }

    #[must_use]
    pub fn ops(mut self, ops: impl IntoIterator<Item = Op>) -> Self {
        self.ops = OpPattern::Exact(ops.into_iter().collect());
        self
    }

    /// Fixes the operand list; no further operands are accepted unless
    /// [`Signature::variadic`] is called afterwards.
    #[must_use]
    pub fn operands(mut self, operands: impl IntoIterator<Item = KindPattern>) -> Self {
        self.operands = operands.into_iter().collect();
        self.rest = None;
        self
    }

    /// Accepts any number of further operands matching `pattern`.
    #[must_use]
    pub fn variadic(mut self, pattern: KindPattern) -> Self {
        self.rest = Some(pattern);
        self
    }

    #[must_use]
    pub fn head(&self) -> TermKind {
        self.head
    }

    #[must_use]
    pub fn matches(&self, key: &DispatchKey) -> bool {
        if self.head != key.head {
            return false;
        }
        if let OpPattern::Exact(ops) = &self.ops
            && ops.as_slice() != key.ops.as_slice()
        {
            return false;
        }
        if key.operands.len() < self.operands.len() {
            return false;
        }
        let (fixed, extra) = key.operands.split_at(self.operands.len());
        let fixed_ok = self
            .operands
            .iter()
            .zip(fixed)
            .all(|(pattern, kind)| pattern.matches(*kind));
        let extra_ok = match self.rest {
            None => extra.is_empty(),
            Some(pattern) => extra.iter().all(|kind| pattern.matches(*kind)),
        };
        fixed_ok && extra_ok
    }

    /// Higher sorts first: exact operator tags, then exact operand kinds,
    /// then fixed arity over variadic.
    fn specificity(&self) -> (u8, usize, u8, u8) {
        let exact_ops = u8::from(matches!(self.ops, OpPattern::Exact(_)));
        let exact_operands = self
            .operands
            .iter()
            .filter(|pattern| matches!(pattern, KindPattern::Exact(_)))
            .count();
        let exact_rest = u8::from(matches!(self.rest, Some(KindPattern::Exact(_))));
        let fixed = u8::from(self.rest.is_none());
        (exact_ops, exact_operands, exact_rest, fixed)
    }
}

// ── Registry ───────────────────────────────────────────────────────

/// Outcome of [`Registry::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched<T> {
    Handled(T),
    /// Every matching handler declined.
    Declined,
    /// No signature matched the key.
    NoHandler,
}

struct Entry<H: ?Sized> {
    signature: Signature,
    handler: Rc<H>,
}

/// Additive handler table with a per-key resolution cache.
///
/// Registration goes through `&self` so a registry shared by several
/// interpreters can be extended at any time; each registration invalidates
/// the cache.
pub struct Registry<H: ?Sized> {
    name: &'static str,
    entries: RefCell<Vec<Entry<H>>>,
    resolved: RefCell<FxHashMap<DispatchKey, Rc<[Rc<H>]>>>,
}

impl<H: ?Sized> Registry<H> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RefCell::new(Vec::new()),
            resolved: RefCell::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn register(&self, signature: Signature, handler: Rc<H>) {
        tracing::trace!(registry = self.name, signature = ?signature, "register handler");
        self.entries.borrow_mut().push(Entry { signature, handler });
        self.resolved.borrow_mut().clear();
    }

    /// Matching handlers, most specific first; ties keep registration order.
    #[must_use]
    pub fn candidates(&self, key: &DispatchKey) -> Rc<[Rc<H>]> {
        if let Some(hit) = self.resolved.borrow().get(key) {
            return Rc::clone(hit);
        }
        let entries = self.entries.borrow();
        let mut matching: Vec<&Entry<H>> = entries
            .iter()
            .filter(|entry| entry.signature.matches(key))
            .collect();
        // Stable sort keeps registration order among equals.
        matching.sort_by(|a, b| b.signature.specificity().cmp(&a.signature.specificity()));
        let resolved: Rc<[Rc<H>]> = matching
            .into_iter()
            .map(|entry| Rc::clone(&entry.handler))
            .collect();
        drop(entries);
        self.resolved
            .borrow_mut()
            .insert(key.clone(), Rc::clone(&resolved));
        resolved
    }

    /// Most specific handler for `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &DispatchKey) -> Option<Rc<H>> {
        self.candidates(key).first().cloned()
    }

    /// Tries candidates in order until one returns `Some`.
    ///
    /// The candidate list is resolved before any handler runs, so handlers
    /// may register new entries without affecting the current call.
    pub fn dispatch<T, E>(
        &self,
        key: &DispatchKey,
        mut invoke: impl FnMut(&H) -> Result<Option<T>, E>,
    ) -> Result<Dispatched<T>, E> {
        let candidates = self.candidates(key);
        if candidates.is_empty() {
            tracing::trace!(registry = self.name, key = %key, "no handler");
            return Ok(Dispatched::NoHandler);
        }
        for handler in candidates.iter() {
            if let Some(result) = invoke(handler)? {
                return Ok(Dispatched::Handled(result));
            }
        }
        tracing::trace!(registry = self.name, key = %key, "all handlers declined");
        Ok(Dispatched::Declined)
    }
}

impl<H: ?Sized> std::fmt::Debug for Registry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish()
    }
}
