use smallvec::{SmallVec, smallvec};
use std::rc::Rc;

use crate::intern::intern;
use crate::{
    Dim, DimSet, Literal, Op, OpArity, Schema, Size, TensorValue, TermError, TermKind,
};

/// Process-unique identity of an interned term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub u64);

impl std::fmt::Display for TermId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-term parameters of a node. Child terms live in the node's argument
/// list, see [`Term::args`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Variable {
        name: Dim,
        size: Size,
    },
    Number(Literal),
    Tensor {
        dims: Vec<Dim>,
        data: TensorValue,
    },
    Unary {
        op: Op,
    },
    Binary {
        op: Op,
    },
    Finitary {
        op: Op,
    },
    Reduction {
        op: Op,
        reduce_dims: DimSet,
    },
    /// `args[0]` is the target, `args[1..]` the values bound to `dims`.
    Substitution {
        dims: Vec<Dim>,
    },
    Align {
        dims: Vec<Dim>,
        shape: Vec<Size>,
    },
    Contract {
        sum_op: Op,
        prod_op: Op,
        reduce_dims: DimSet,
    },
}

impl Node {
    #[must_use]
    pub fn kind(&self) -> TermKind {
        match self {
            Self::Variable { .. } => TermKind::Variable,
            Self::Number(_) => TermKind::Number,
            Self::Tensor { .. } => TermKind::Tensor,
            Self::Unary { .. } => TermKind::Unary,
            Self::Binary { .. } => TermKind::Binary,
            Self::Finitary { .. } => TermKind::Finitary,
            Self::Reduction { .. } => TermKind::Reduction,
            Self::Substitution { .. } => TermKind::Substitution,
            Self::Align { .. } => TermKind::Align,
            Self::Contract { .. } => TermKind::Contract,
        }
    }
}

pub(crate) struct TermData {
    pub(crate) id: TermId,
    pub(crate) node: Node,
    pub(crate) args: SmallVec<[Term; 2]>,
    pub(crate) dims: Vec<Dim>,
    pub(crate) shape: Vec<Size>,
}

impl Drop for TermData {
    // Unlinks children onto an explicit stack so freeing a deep chain does
    // not recurse once per level.
    fn drop(&mut self) {
        let mut stack: Vec<Term> = self.args.drain(..).collect();
        while let Some(term) = stack.pop() {
            if let Ok(mut data) = Rc::try_unwrap(term.0) {
                stack.extend(data.args.drain(..));
            }
        }
    }
}

/// Borrowed, pattern-matchable shape of a term.
#[derive(Debug, Clone, Copy)]
pub enum View<'a> {
    Variable {
        name: &'a str,
        size: Size,
    },
    Number(Literal),
    Tensor {
        dims: &'a [Dim],
        data: &'a TensorValue,
    },
    Unary {
        op: Op,
        arg: &'a Term,
    },
    Binary {
        op: Op,
        lhs: &'a Term,
        rhs: &'a Term,
    },
    Finitary {
        op: Op,
        operands: &'a [Term],
    },
    Reduction {
        op: Op,
        arg: &'a Term,
        reduce_dims: &'a DimSet,
    },
    Substitution {
        arg: &'a Term,
        dims: &'a [Dim],
        values: &'a [Term],
    },
    Align {
        arg: &'a Term,
        dims: &'a [Dim],
        shape: &'a [Size],
    },
    Contract {
        sum_op: Op,
        prod_op: Op,
        lhs: &'a Term,
        rhs: &'a Term,
        reduce_dims: &'a DimSet,
    },
}

/// Handle to an immutable, interned expression node.
#[derive(Clone)]
pub struct Term(Rc<TermData>);

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Term {}

impl std::hash::Hash for Term {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{:?}", self.kind(), self.id(), self.dims())
    }
}

const DISPLAY_DEPTH_LIMIT: usize = 24;

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_expr(f, 0)
    }
}

fn validate_binary(op: Op, role: &'static str) -> Result<(), TermError> {
    if op.is_binary() {
        Ok(())
    } else {
        Err(TermError::WrongOperator { op, expected: role })
    }
}

fn validate_reduce_op(op: Op) -> Result<(), TermError> {
    if op.is_associative() {
        Ok(())
    } else {
        Err(TermError::WrongOperator {
            op,
            expected: "a reduction operator",
        })
    }
}

fn union_schema<'a>(terms: impl IntoIterator<Item = &'a Term>) -> Result<Schema, TermError> {
    let mut schema = Schema::new();
    for term in terms {
        schema.extend_from(&term.schema())?;
    }
    Ok(schema)
}

impl Term {
    pub(crate) fn from_rc(data: Rc<TermData>) -> Self {
        Self(data)
    }

    fn build(node: Node, args: SmallVec<[Term; 2]>, schema: Schema) -> Term {
        let (dims, shape) = schema.into_parts();
        intern(node, args, dims, shape)
    }

    // ----- constructors -----

    #[must_use]
    pub fn variable(name: impl Into<Dim>, size: Size) -> Term {
        let name = name.into();
        let node = Node::Variable {
            name: name.clone(),
            size,
        };
        intern(node, SmallVec::new(), vec![name], vec![size])
    }

    #[must_use]
    pub fn number(value: Literal) -> Term {
        intern(Node::Number(value), SmallVec::new(), Vec::new(), Vec::new())
    }

    #[must_use]
    pub fn scalar_f64(value: f64) -> Term {
        Self::number(Literal::from_f64(value))
    }

    #[must_use]
    pub fn scalar_i64(value: i64) -> Term {
        Self::number(Literal::I64(value))
    }

    #[must_use]
    pub fn scalar_bool(value: bool) -> Term {
        Self::number(Literal::Bool(value))
    }

    /// Dense tensor whose axes are labelled by `dims`, in storage order.
    pub fn tensor<S: Into<Dim>>(
        dims: impl IntoIterator<Item = S>,
        data: TensorValue,
    ) -> Result<Term, TermError> {
        let dims: Vec<Dim> = dims.into_iter().map(Into::into).collect();
        if dims.len() != data.rank() {
            return Err(TermError::TensorRank {
                dims: dims.len(),
                rank: data.rank(),
            });
        }
        let shape: Vec<Size> = data.shape.dims.iter().map(|n| Size::Discrete(*n)).collect();
        // Validates uniqueness.
        Schema::from_parts(&dims, &shape)?;
        let node = Node::Tensor {
            dims: dims.clone(),
            data,
        };
        Ok(intern(node, SmallVec::new(), dims, shape))
    }

    /// `Tensor((name,), [0, 1, ..., size - 1])`.
    #[must_use]
    pub fn arange(name: impl Into<Dim>, size: u32) -> Term {
        let name = name.into();
        let node = Node::Tensor {
            dims: vec![name.clone()],
            data: TensorValue::arange(size),
        };
        intern(node, SmallVec::new(), vec![name], vec![Size::Discrete(size)])
    }

    pub fn unary(op: Op, arg: Term) -> Result<Term, TermError> {
        if !op.is_unary() {
            return Err(TermError::WrongOperator {
                op,
                expected: "a unary operator",
            });
        }
        let schema = arg.schema();
        Ok(Self::build(Node::Unary { op }, smallvec![arg], schema))
    }

    pub fn binary(op: Op, lhs: Term, rhs: Term) -> Result<Term, TermError> {
        validate_binary(op, "a binary operator")?;
        let schema = union_schema([&lhs, &rhs])?;
        Ok(Self::build(Node::Binary { op }, smallvec![lhs, rhs], schema))
    }

    /// N-ary combination, a left fold of `op` over `operands`. A unary `op`
    /// takes exactly one operand.
    pub fn finitary(op: Op, operands: Vec<Term>) -> Result<Term, TermError> {
        if operands.is_empty() {
            return Err(TermError::EmptyOperands { op });
        }
        match op.arity() {
            OpArity::Unary if operands.len() != 1 => {
                return Err(TermError::WrongOperator {
                    op,
                    expected: "a combine operator over several operands",
                });
            }
            OpArity::Selector => {
                return Err(TermError::WrongOperator {
                    op,
                    expected: "a combine operator",
                });
            }
            OpArity::Unary | OpArity::Binary => {}
        }
        let schema = union_schema(&operands)?;
        Ok(Self::build(
            Node::Finitary { op },
            operands.into_iter().collect(),
            schema,
        ))
    }

    /// Reduces `arg` over `reduce_dims ∩ arg.dims`. An empty intersection
    /// returns `arg`; a same-operator reduction argument is fused.
    pub fn reduction(op: Op, arg: Term, reduce_dims: DimSet) -> Result<Term, TermError> {
        validate_reduce_op(op)?;
        let mut reduce_dims: DimSet = reduce_dims
            .into_iter()
            .filter(|dim| arg.has_dim(dim))
            .collect();
        if reduce_dims.is_empty() {
            return Ok(arg);
        }

        let fused = match arg.view() {
            View::Reduction {
                op: inner_op,
                arg: inner,
                reduce_dims: inner_dims,
            } if inner_op == op => Some((inner.clone(), inner_dims.clone())),
            _ => None,
        };
        let arg = match fused {
            Some((inner, inner_dims)) => {
                reduce_dims.extend(inner_dims);
                inner
            }
            None => arg,
        };

        let schema: Schema = arg
            .schema()
            .iter()
            .filter(|(dim, _)| !reduce_dims.contains(*dim))
            .map(|(dim, size)| (dim.to_owned(), size))
            .collect();
        Ok(Self::build(
            Node::Reduction { op, reduce_dims },
            smallvec![arg],
            schema,
        ))
    }

    /// Binds free dims of `arg` to replacement terms. Bindings are stored in
    /// `arg`'s dim order; an empty binding list returns `arg`.
    pub fn substitution(arg: Term, subs: Vec<(Dim, Term)>) -> Result<Term, TermError> {
        if subs.is_empty() {
            return Ok(arg);
        }
        let mut positioned = Vec::with_capacity(subs.len());
        for (dim, value) in subs {
            let Some(position) = arg.dim_position(&dim) else {
                return Err(TermError::MissingDim {
                    dim,
                    available: arg.dims().to_vec(),
                });
            };
            if positioned.iter().any(|(pos, _, _)| *pos == position) {
                return Err(TermError::DuplicateSubstitution { dim });
            }
            positioned.push((position, dim, value));
        }
        positioned.sort_by_key(|(position, _, _)| *position);

        let mut schema: Schema = arg
            .schema()
            .iter()
            .filter(|(dim, _)| !positioned.iter().any(|(_, bound, _)| bound.as_str() == *dim))
            .map(|(dim, size)| (dim.to_owned(), size))
            .collect();
        let retained = schema.clone();
        for (_, _, value) in &positioned {
            for (dim, size) in value.schema().iter() {
                if retained.contains(dim) {
                    return Err(TermError::SubstitutionCollision {
                        dim: dim.to_owned(),
                    });
                }
                schema.insert(dim, size)?;
            }
        }

        let mut dims = Vec::with_capacity(positioned.len());
        let mut args: SmallVec<[Term; 2]> = SmallVec::with_capacity(positioned.len() + 1);
        args.push(arg);
        for (_, dim, value) in positioned {
            dims.push(dim);
            args.push(value);
        }
        Ok(Self::build(Node::Substitution { dims }, args, schema))
    }

    /// Reorders (and optionally broadcasts) `arg` to `dims`/`shape`. Every
    /// free dim of `arg` must appear with its own size.
    pub fn aligned(arg: Term, dims: Vec<Dim>, shape: Vec<Size>) -> Result<Term, TermError> {
        let target = Schema::from_parts(&dims, &shape)?;
        let inner = match arg.view() {
            View::Align { arg: inner, .. } => Some(inner.clone()),
            _ => None,
        };
        let arg = inner.unwrap_or(arg);
        for (dim, size) in arg.schema().iter() {
            match target.get(dim) {
                Some(requested) if requested == size => {}
                Some(requested) => {
                    return Err(TermError::SizeConflict {
                        dim: dim.to_owned(),
                        left: size,
                        right: requested,
                    });
                }
                None => {
                    return Err(TermError::AlignMismatch {
                        requested: dims,
                        available: arg.dims().to_vec(),
                    });
                }
            }
        }
        if arg.dims() == dims.as_slice() {
            return Ok(arg);
        }
        let node = Node::Align {
            dims: dims.clone(),
            shape: shape.clone(),
        };
        Ok(intern(node, smallvec![arg], dims, shape))
    }

    /// Lazy contraction node: `sum_op` over `reduce_dims` of `lhs prod_op rhs`.
    pub fn contract(
        sum_op: Op,
        prod_op: Op,
        lhs: Term,
        rhs: Term,
        reduce_dims: DimSet,
    ) -> Result<Term, TermError> {
        validate_reduce_op(sum_op)?;
        validate_binary(prod_op, "a product operator")?;
        let joint = union_schema([&lhs, &rhs])?;
        let reduce_dims: DimSet = reduce_dims
            .into_iter()
            .filter(|dim| joint.contains(dim))
            .collect();
        let schema: Schema = joint
            .iter()
            .filter(|(dim, _)| !reduce_dims.contains(*dim))
            .map(|(dim, size)| (dim.to_owned(), size))
            .collect();
        Ok(Self::build(
            Node::Contract {
                sum_op,
                prod_op,
                reduce_dims,
            },
            smallvec![lhs, rhs],
            schema,
        ))
    }

    // ----- accessors -----

    #[must_use]
    pub fn id(&self) -> TermId {
        self.0.id
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Term) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn node(&self) -> &Node {
        &self.0.node
    }

    #[must_use]
    pub fn kind(&self) -> TermKind {
        self.0.node.kind()
    }

    /// Child terms in canonical order.
    #[must_use]
    pub fn args(&self) -> &[Term] {
        &self.0.args
    }

    #[must_use]
    pub fn dims(&self) -> &[Dim] {
        &self.0.dims
    }

    #[must_use]
    pub fn shape(&self) -> &[Size] {
        &self.0.shape
    }

    #[must_use]
    pub fn schema(&self) -> Schema {
        self.0
            .dims
            .iter()
            .cloned()
            .zip(self.0.shape.iter().copied())
            .collect()
    }

    #[must_use]
    pub fn has_dim(&self, dim: &str) -> bool {
        self.0.dims.iter().any(|d| d == dim)
    }

    #[must_use]
    pub fn dim_position(&self, dim: &str) -> Option<usize> {
        self.0.dims.iter().position(|d| d == dim)
    }

    #[must_use]
    pub fn size_of(&self, dim: &str) -> Option<Size> {
        self.dim_position(dim).map(|position| self.0.shape[position])
    }

    #[must_use]
    pub fn dim_set(&self) -> DimSet {
        self.0.dims.iter().cloned().collect()
    }

    /// Operator tags carried by the node, in dispatch order.
    #[must_use]
    pub fn ops(&self) -> SmallVec<[Op; 2]> {
        match &self.0.node {
            Node::Unary { op }
            | Node::Binary { op }
            | Node::Finitary { op }
            | Node::Reduction { op, .. } => smallvec![*op],
            Node::Contract {
                sum_op, prod_op, ..
            } => smallvec![*sum_op, *prod_op],
            _ => SmallVec::new(),
        }
    }

    #[must_use]
    pub fn view(&self) -> View<'_> {
        let args = self.args();
        match &self.0.node {
            Node::Variable { name, size } => View::Variable { name, size: *size },
            Node::Number(literal) => View::Number(*literal),
            Node::Tensor { dims, data } => View::Tensor { dims, data },
            Node::Unary { op } => View::Unary {
                op: *op,
                arg: &args[0],
            },
            Node::Binary { op } => View::Binary {
                op: *op,
                lhs: &args[0],
                rhs: &args[1],
            },
            Node::Finitary { op } => View::Finitary { op: *op, operands: args },
            Node::Reduction { op, reduce_dims } => View::Reduction {
                op: *op,
                arg: &args[0],
                reduce_dims,
            },
            Node::Substitution { dims } => View::Substitution {
                arg: &args[0],
                dims,
                values: &args[1..],
            },
            Node::Align { dims, shape } => View::Align {
                arg: &args[0],
                dims,
                shape,
            },
            Node::Contract {
                sum_op,
                prod_op,
                reduce_dims,
            } => View::Contract {
                sum_op: *sum_op,
                prod_op: *prod_op,
                lhs: &args[0],
                rhs: &args[1],
                reduce_dims,
            },
        }
    }

    /// Rebuilds this node over new children through the regular
    /// constructors, so normalization rules apply again.
    pub fn with_args(&self, args: &[Term]) -> Result<Term, TermError> {
        if args.len() == self.args().len()
            && args.iter().zip(self.args()).all(|(new, old)| new == old)
        {
            return Ok(self.clone());
        }
        if args.len() != self.args().len() {
            return Err(TermError::ArityMismatch {
                kind: self.kind(),
                expected: self.args().len(),
                actual: args.len(),
            });
        }
        match &self.0.node {
            Node::Variable { .. } | Node::Number(_) | Node::Tensor { .. } => Ok(self.clone()),
            Node::Unary { op } => Self::unary(*op, args[0].clone()),
            Node::Binary { op } => Self::binary(*op, args[0].clone(), args[1].clone()),
            Node::Finitary { op } => Self::finitary(*op, args.to_vec()),
            Node::Reduction { op, reduce_dims } => {
                Self::reduction(*op, args[0].clone(), reduce_dims.clone())
            }
            Node::Substitution { dims } => Self::substitution(
                args[0].clone(),
                dims.iter().cloned().zip(args[1..].iter().cloned()).collect(),
            ),
            Node::Align { dims, shape } => {
                Self::aligned(args[0].clone(), dims.clone(), shape.clone())
            }
            Node::Contract {
                sum_op,
                prod_op,
                reduce_dims,
            } => Self::contract(
                *sum_op,
                *prod_op,
                args[0].clone(),
                args[1].clone(),
                reduce_dims.clone(),
            ),
        }
    }

    // ----- lazy operations -----

    pub fn apply(&self, op: Op) -> Result<Term, TermError> {
        Self::unary(op, self.clone())
    }

    pub fn combine(&self, op: Op, other: &Term) -> Result<Term, TermError> {
        Self::binary(op, self.clone(), other.clone())
    }

    pub fn neg(&self) -> Result<Term, TermError> {
        self.apply(Op::Neg)
    }

    pub fn exp(&self) -> Result<Term, TermError> {
        self.apply(Op::Exp)
    }

    pub fn log(&self) -> Result<Term, TermError> {
        self.apply(Op::Log)
    }

    pub fn add(&self, other: &Term) -> Result<Term, TermError> {
        self.combine(Op::Add, other)
    }

    pub fn sub(&self, other: &Term) -> Result<Term, TermError> {
        self.combine(Op::Sub, other)
    }

    pub fn mul(&self, other: &Term) -> Result<Term, TermError> {
        self.combine(Op::Mul, other)
    }

    pub fn div(&self, other: &Term) -> Result<Term, TermError> {
        self.combine(Op::Div, other)
    }

    /// Reduces over `dims ∩ self.dims`, or over every free dim for `None`.
    pub fn reduce(&self, op: Op, dims: Option<&DimSet>) -> Result<Term, TermError> {
        validate_reduce_op(op)?;
        let reduce_dims: DimSet = match dims {
            Some(dims) => dims.iter().filter(|dim| self.has_dim(dim)).cloned().collect(),
            None => self.dim_set(),
        };
        if reduce_dims.is_empty() {
            return Ok(self.clone());
        }
        Self::reduction(op, self.clone(), reduce_dims)
    }

    pub fn sum(&self, dims: &DimSet) -> Result<Term, TermError> {
        self.reduce(Op::Add, Some(dims))
    }

    pub fn prod(&self, dims: &DimSet) -> Result<Term, TermError> {
        self.reduce(Op::Mul, Some(dims))
    }

    pub fn logsumexp(&self, dims: &DimSet) -> Result<Term, TermError> {
        self.reduce(Op::LogAddExp, Some(dims))
    }

    pub fn all(&self, dims: &DimSet) -> Result<Term, TermError> {
        self.reduce(Op::And, Some(dims))
    }

    pub fn any(&self, dims: &DimSet) -> Result<Term, TermError> {
        self.reduce(Op::Or, Some(dims))
    }

    pub fn reduce_min(&self, dims: &DimSet) -> Result<Term, TermError> {
        self.reduce(Op::Min, Some(dims))
    }

    pub fn reduce_max(&self, dims: &DimSet) -> Result<Term, TermError> {
        self.reduce(Op::Max, Some(dims))
    }

    /// Partial evaluation: binds the given free dims.
    pub fn call<I, S>(&self, subs: I) -> Result<Term, TermError>
    where
        I: IntoIterator<Item = (S, Term)>,
        S: Into<Dim>,
    {
        let subs: Vec<(Dim, Term)> = subs
            .into_iter()
            .map(|(dim, value)| (dim.into(), value))
            .collect();
        Self::substitution(self.clone(), subs)
    }

    /// Permutes free dims into `dims` order.
    pub fn align<S: AsRef<str>>(&self, dims: &[S]) -> Result<Term, TermError> {
        let mut shape = Vec::with_capacity(dims.len());
        let mut names = Vec::with_capacity(dims.len());
        for dim in dims {
            let dim = dim.as_ref();
            let size = self.size_of(dim).ok_or_else(|| TermError::AlignMismatch {
                requested: dims.iter().map(|d| d.as_ref().to_owned()).collect(),
                available: self.dims().to_vec(),
            })?;
            names.push(dim.to_owned());
            shape.push(size);
        }
        Self::aligned(self.clone(), names, shape)
    }

    /// `Arange` bindings for every discrete free dim.
    #[must_use]
    pub fn materialize_bindings(&self) -> Vec<(Dim, Term)> {
        self.dims()
            .iter()
            .zip(self.shape())
            .filter_map(|(dim, size)| {
                size.cardinality()
                    .map(|n| (dim.clone(), Term::arange(dim.clone(), n)))
            })
            .collect()
    }

    /// Reads a zero-dimensional concrete term as a scalar.
    pub fn item(&self) -> Result<Literal, TermError> {
        if !self.dims().is_empty() {
            return Err(TermError::AmbiguousScalar {
                dims: self.dims().to_vec(),
            });
        }
        match self.view() {
            View::Number(literal) => Ok(literal),
            View::Tensor { data, .. } => data
                .elements
                .first()
                .copied()
                .ok_or(TermError::NotConcrete { kind: TermKind::Tensor }),
            _ => Err(TermError::NotConcrete { kind: self.kind() }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, TermError> {
        let literal = self.item()?;
        literal
            .as_bool()
            .ok_or(TermError::NotConcrete { kind: self.kind() })
    }

    fn write_expr(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        if depth >= DISPLAY_DEPTH_LIMIT {
            return write!(f, "...");
        }
        let next = depth + 1;
        match self.view() {
            View::Variable { name, size } => write!(f, "Variable({name:?}, {size})"),
            View::Number(literal) => write!(f, "Number({literal})"),
            View::Tensor { dims, data } => {
                write!(f, "Tensor({dims:?}, {}{:?})", data.dtype.as_str(), data.shape.dims)
            }
            View::Unary { op, arg } => {
                write!(f, "Unary({op}, ")?;
                arg.write_expr(f, next)?;
                write!(f, ")")
            }
            View::Binary { op, lhs, rhs } => {
                write!(f, "Binary({op}, ")?;
                lhs.write_expr(f, next)?;
                write!(f, ", ")?;
                rhs.write_expr(f, next)?;
                write!(f, ")")
            }
            View::Finitary { op, operands } => {
                write!(f, "Finitary({op}")?;
                for operand in operands {
                    write!(f, ", ")?;
                    operand.write_expr(f, next)?;
                }
                write!(f, ")")
            }
            View::Reduction {
                op,
                arg,
                reduce_dims,
            } => {
                write!(f, "Reduction({op}, ")?;
                arg.write_expr(f, next)?;
                write!(f, ", {reduce_dims:?})")
            }
            View::Substitution { arg, dims, values } => {
                write!(f, "Substitution(")?;
                arg.write_expr(f, next)?;
                for (dim, value) in dims.iter().zip(values) {
                    write!(f, ", {dim}=")?;
                    value.write_expr(f, next)?;
                }
                write!(f, ")")
            }
            View::Align { arg, dims, .. } => {
                write!(f, "Align(")?;
                arg.write_expr(f, next)?;
                write!(f, ", {dims:?})")
            }
            View::Contract {
                sum_op,
                prod_op,
                lhs,
                rhs,
                reduce_dims,
            } => {
                write!(f, "Contract({sum_op}, {prod_op}, ")?;
                lhs.write_expr(f, next)?;
                write!(f, ", ")?;
                rhs.write_expr(f, next)?;
                write!(f, ", {reduce_dims:?})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Term, View};
    use crate::{
        Domain, ErrorCategory, Literal, Op, Size, TensorValue, TermError, TermKind, dim_set,
    };
    use proptest::prelude::*;
    use proptest::test_runner::{Config as ProptestConfig, TestRunner};

    fn var(name: &str, n: u32) -> Term {
        Term::variable(name, Size::Discrete(n))
    }

    #[test]
    fn interning_is_structural_identity() {
        let a = var("i", 3).add(&var("j", 4)).expect("add");
        let b = var("i", 3).add(&var("j", 4)).expect("add");
        assert!(a.ptr_eq(&b));
        let c = var("j", 4).add(&var("i", 3)).expect("add");
        assert_ne!(a, c);
    }

    #[test]
    fn binary_schema_is_ordered_union() {
        let x = Term::tensor(
            ["i", "j"],
            TensorValue::from_f64s(vec![2, 3], &[0.0; 6]).expect("tensor"),
        )
        .expect("tensor term");
        let y = var("k", 5).add(&var("j", 3)).expect("add");
        let z = x.mul(&y).expect("mul");
        assert_eq!(z.dims(), ["i", "j", "k"]);
        assert_eq!(
            z.shape(),
            [Size::Discrete(2), Size::Discrete(3), Size::Discrete(5)]
        );
    }

    #[test]
    fn binary_rejects_size_conflicts() {
        let err = var("i", 2).add(&var("i", 3)).expect_err("conflict");
        assert!(matches!(err, TermError::SizeConflict { .. }));
    }

    #[test]
    fn tensor_rejects_duplicate_dims_and_rank_mismatch() {
        let data = TensorValue::from_f64s(vec![2, 2], &[0.0; 4]).expect("tensor");
        let err = Term::tensor(["i", "i"], data.clone()).expect_err("duplicate dims");
        assert_eq!(err, TermError::DuplicateDim { dim: "i".to_owned() });
        assert_eq!(err.category(), ErrorCategory::MalformedConstruction);

        let err = Term::tensor(["i"], data).expect_err("rank mismatch");
        assert_eq!(err, TermError::TensorRank { dims: 1, rank: 2 });
    }

    #[test]
    fn reduction_fuses_same_operator() {
        let x = var("i", 2).add(&var("j", 3)).expect("add").add(&var("k", 4)).expect("add");
        let once = x.sum(&dim_set(["i"])).expect("sum").sum(&dim_set(["j"])).expect("sum");
        let direct = x.sum(&dim_set(["i", "j"])).expect("sum");
        assert!(once.ptr_eq(&direct));
        assert_eq!(direct.dims(), ["k"]);
        match direct.view() {
            View::Reduction { arg, reduce_dims, .. } => {
                assert_eq!(arg, &x);
                assert_eq!(reduce_dims, &dim_set(["i", "j"]));
            }
            other => panic!("expected reduction, got {other:?}"),
        }
    }

    #[test]
    fn reduction_keeps_different_operators_nested() {
        let x = var("i", 2).add(&var("j", 3)).expect("add");
        let nested = x
            .sum(&dim_set(["i"]))
            .expect("sum")
            .reduce_max(&dim_set(["j"]))
            .expect("max");
        match nested.view() {
            View::Reduction { op, arg, .. } => {
                assert_eq!(op, Op::Max);
                assert_eq!(arg.kind(), TermKind::Reduction);
            }
            other => panic!("expected reduction, got {other:?}"),
        }
    }

    #[test]
    fn reduce_over_absent_dims_is_identity() {
        let x = var("i", 2);
        assert!(x.sum(&dim_set(["q"])).expect("sum").ptr_eq(&x));
        let all = x.reduce(Op::Add, None).expect("sum all");
        assert!(all.dims().is_empty());
    }

    #[test]
    fn reduction_rejects_non_associative_operator() {
        let err = var("i", 2).reduce(Op::Sub, None).expect_err("sub is not a reduction");
        assert!(matches!(err, TermError::WrongOperator { op: Op::Sub, .. }));
    }

    #[test]
    fn substitution_schema_splices_replacement_dims() {
        let x = var("i", 3).add(&var("j", 4)).expect("add");
        let index = Term::tensor(
            ["k"],
            TensorValue::from_i64s(vec![2], &[0, 2]).expect("tensor"),
        )
        .expect("tensor term");
        let y = x.call([("i", index)]).expect("substitute");
        assert_eq!(y.dims(), ["j", "k"]);
        assert_eq!(y.shape(), [Size::Discrete(4), Size::Discrete(2)]);
    }

    #[test]
    fn substitution_orders_bindings_by_target_dims() {
        let x = var("i", 3).add(&var("j", 4)).expect("add");
        let a = x
            .call([("j", Term::scalar_i64(1)), ("i", Term::scalar_i64(2))])
            .expect("substitute");
        let b = x
            .call([("i", Term::scalar_i64(2)), ("j", Term::scalar_i64(1))])
            .expect("substitute");
        assert!(a.ptr_eq(&b));
        assert!(a.dims().is_empty());
    }

    #[test]
    fn substitution_rejects_missing_dim_and_collision() {
        let x = var("i", 3).add(&var("j", 4)).expect("add");
        let err = x.call([("q", Term::scalar_i64(0))]).expect_err("absent dim");
        assert!(matches!(err, TermError::MissingDim { .. }));

        let err = x.call([("i", var("j", 4))]).expect_err("collision");
        assert_eq!(err, TermError::SubstitutionCollision { dim: "j".to_owned() });
    }

    #[test]
    fn empty_substitution_returns_target() {
        let x = var("i", 3);
        let same = x.call(Vec::<(String, Term)>::new()).expect("no-op");
        assert!(same.ptr_eq(&x));
    }

    #[test]
    fn align_to_current_order_is_identity() {
        let x = var("i", 3).add(&var("j", 4)).expect("add");
        assert!(x.align(&["i", "j"]).expect("align").ptr_eq(&x));
        let swapped = x.align(&["j", "i"]).expect("align");
        assert_eq!(swapped.dims(), ["j", "i"]);
        assert!(swapped.align(&["i", "j"]).expect("align").ptr_eq(&x));
    }

    #[test]
    fn align_with_broadcast_dim() {
        let x = var("i", 3);
        let y = Term::aligned(
            x.clone(),
            vec!["b".to_owned(), "i".to_owned()],
            vec![Size::Discrete(2), Size::Discrete(3)],
        )
        .expect("broadcast align");
        assert_eq!(y.dims(), ["b", "i"]);
        let err = Term::aligned(x, vec!["b".to_owned()], vec![Size::Discrete(2)])
            .expect_err("dropping a free dim");
        assert!(matches!(err, TermError::AlignMismatch { .. }));
    }

    #[test]
    fn item_requires_zero_dimensional_concrete_term() {
        assert_eq!(Term::scalar_f64(2.5).item().expect("scalar"), Literal::from_f64(2.5));
        let err = var("i", 2).item().expect_err("free dim");
        assert_eq!(err.category(), ErrorCategory::SemanticAmbiguity);
        let lazy = var("i", 2).sum(&dim_set(["i"])).expect("sum");
        assert!(matches!(
            lazy.item(),
            Err(TermError::NotConcrete {
                kind: TermKind::Reduction
            })
        ));
        assert!(Term::scalar_bool(true).as_bool().expect("bool"));
    }

    #[test]
    fn materialize_bindings_skip_continuous_dims() {
        let x = var("i", 2).add(&Term::variable("x", Size::Continuous(Domain::Real))).expect("add");
        let bindings = x.materialize_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, "i");
        assert_eq!(bindings[0].1, Term::arange("i", 2));
    }

    #[test]
    fn with_args_reapplies_normalization() {
        let inner = var("i", 2).add(&var("j", 3)).expect("add");
        let outer = Term::unary(Op::Neg, inner.clone()).expect("neg");
        assert!(outer.with_args(&[inner]).expect("same args").ptr_eq(&outer));
        let replaced = outer.with_args(&[var("k", 5)]).expect("new args");
        assert_eq!(replaced.dims(), ["k"]);
    }

    #[test]
    fn deep_chain_drops_without_recursion() {
        let mut term = var("i", 2);
        for _ in 0..100_000 {
            term = term.neg().expect("neg");
        }
        drop(term);
    }

    #[test]
    fn display_renders_nested_structure() {
        let x = var("i", 2).add(&Term::scalar_i64(1)).expect("add");
        assert_eq!(x.to_string(), "Binary(add, Variable(\"i\", 2), Number(1))");
    }

    #[test]
    fn prop_schema_invariants_hold() {
        let mut runner = TestRunner::new(ProptestConfig::with_cases(
            tt_test_utils::property_test_case_count(),
        ));
        runner
            .run(&crate::proptest_strategies::arb_term(), |term| {
                prop_assert_eq!(term.dims().len(), term.shape().len());
                let unique: std::collections::BTreeSet<_> = term.dims().iter().collect();
                prop_assert_eq!(unique.len(), term.dims().len());
                let rebuilt = term.with_args(term.args()).expect("rebuild");
                prop_assert!(rebuilt.ptr_eq(&term));
                Ok(())
            })
            .expect("schema invariants");
    }
}
