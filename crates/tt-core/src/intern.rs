//! Thread-local hash-consing table.
//!
//! The table holds weak references only, so a term is freed as soon as the
//! last strong handle goes away. Dead slots are swept every
//! [`SWEEP_INTERVAL`] insertions or on demand via [`sweep_interner`].
//!
//! Construction is single-threaded: terms are `Rc`-based and each thread has
//! its own table. Term ids are process-unique.

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::term::{Node, Term, TermData, TermId};
use crate::{Dim, Size};

const SWEEP_INTERVAL: usize = 4096;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static INTERNER: RefCell<Interner> = RefCell::new(Interner::default());
}

#[derive(Default)]
struct Interner {
    buckets: FxHashMap<u64, SmallVec<[Weak<TermData>; 1]>>,
    inserts_since_sweep: usize,
}

impl Interner {
    fn find(&self, key: u64, node: &Node, args: &[Term]) -> Option<Rc<TermData>> {
        self.buckets.get(&key)?.iter().find_map(|weak| {
            let existing = weak.upgrade()?;
            let same = existing.node == *node
                && existing.args.len() == args.len()
                && existing
                    .args
                    .iter()
                    .zip(args)
                    .all(|(lhs, rhs)| lhs.id() == rhs.id());
            same.then_some(existing)
        })
    }

    fn sweep(&mut self) {
        self.buckets.retain(|_, bucket| {
            bucket.retain(|weak| weak.strong_count() > 0);
            !bucket.is_empty()
        });
        self.inserts_since_sweep = 0;
    }

    fn live_count(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter())
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

fn structural_key(node: &Node, args: &[Term]) -> u64 {
    let mut hasher = FxHasher::default();
    node.hash(&mut hasher);
    for arg in args {
        arg.id().hash(&mut hasher);
    }
    hasher.finish()
}

/// Returns the canonical term for `(node, args)`, creating it if needed.
///
/// `dims`/`shape` must already be derived from `node` and `args` by the
/// caller; they are not part of the identity key.
pub(crate) fn intern(
    node: Node,
    args: SmallVec<[Term; 2]>,
    dims: Vec<Dim>,
    shape: Vec<Size>,
) -> Term {
    let key = structural_key(&node, &args);
    INTERNER.with(|cell| {
        let mut interner = cell.borrow_mut();
        if let Some(existing) = interner.find(key, &node, &args) {
            return Term::from_rc(existing);
        }

        let data = Rc::new(TermData {
            id: TermId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            node,
            args,
            dims,
            shape,
        });
        interner
            .buckets
            .entry(key)
            .or_default()
            .push(Rc::downgrade(&data));
        interner.inserts_since_sweep += 1;
        if interner.inserts_since_sweep >= SWEEP_INTERVAL {
            interner.sweep();
        }
        Term::from_rc(data)
    })
}

/// Drops table slots whose terms have been freed.
pub fn sweep_interner() {
    INTERNER.with(|cell| cell.borrow_mut().sweep());
}

/// Number of live terms in this thread's table.
#[must_use]
pub fn interned_count() -> usize {
    INTERNER.with(|cell| cell.borrow().live_count())
}

#[cfg(test)]
mod tests {
    use super::{interned_count, sweep_interner};
    use crate::{Literal, Size, Term};

    #[test]
    fn identical_constructions_share_one_instance() {
        let a = Term::variable("i", Size::Discrete(3));
        let b = Term::variable("i", Size::Discrete(3));
        assert_eq!(a.id(), b.id());
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn different_literal_types_are_distinct() {
        let int_one = Term::number(Literal::I64(1));
        let float_one = Term::number(Literal::from_f64(1.0));
        assert_ne!(int_one, float_one);
    }

    #[test]
    fn dropped_terms_leave_the_table() {
        sweep_interner();
        let before = interned_count();
        {
            let x = Term::variable("interner_drop_target", Size::Discrete(7));
            let _y = x.neg().expect("neg is unary");
            assert_eq!(interned_count(), before + 2);
        }
        sweep_interner();
        assert_eq!(interned_count(), before);
    }
}
