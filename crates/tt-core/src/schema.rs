use smallvec::SmallVec;

use crate::{Dim, Size, TermError};

/// Ordered mapping from dimension name to size.
///
/// Order is the storage order of a term's dims; the semantic content is the
/// set of pairs, see [`Schema::same_entries`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    entries: SmallVec<[(Dim, Size); 4]>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zips parallel `dims`/`shape` lists, validating length and uniqueness.
    pub fn from_parts(dims: &[Dim], shape: &[Size]) -> Result<Self, TermError> {
        if dims.len() != shape.len() {
            return Err(TermError::DimShapeMismatch {
                dims: dims.len(),
                shape: shape.len(),
            });
        }
        let mut schema = Self::new();
        for (dim, size) in dims.iter().zip(shape) {
            if schema.contains(dim) {
                return Err(TermError::DuplicateDim { dim: dim.clone() });
            }
            schema.entries.push((dim.clone(), *size));
        }
        Ok(schema)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, dim: &str) -> Option<Size> {
        self.entries
            .iter()
            .find(|(name, _)| name == dim)
            .map(|(_, size)| *size)
    }

    #[must_use]
    pub fn contains(&self, dim: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == dim)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Size)> {
        self.entries.iter().map(|(dim, size)| (dim.as_str(), *size))
    }

    pub fn dims(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(dim, _)| dim.as_str())
    }

    /// Appends `dim`, or checks agreement when it is already present.
    pub fn insert(&mut self, dim: &str, size: Size) -> Result<(), TermError> {
        match self.get(dim) {
            Some(existing) if existing == size => Ok(()),
            Some(existing) => Err(TermError::SizeConflict {
                dim: dim.to_owned(),
                left: existing,
                right: size,
            }),
            None => {
                self.entries.push((dim.to_owned(), size));
                Ok(())
            }
        }
    }

    /// Order-preserving union: entries of `other` not already present are
    /// appended in `other`'s order.
    pub fn extend_from(&mut self, other: &Schema) -> Result<(), TermError> {
        for (dim, size) in other.iter() {
            self.insert(dim, size)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, dim: &str) -> Option<Size> {
        let index = self.entries.iter().position(|(name, _)| name == dim)?;
        Some(self.entries.remove(index).1)
    }

    /// Same pairs regardless of order.
    #[must_use]
    pub fn same_entries(&self, other: &Schema) -> bool {
        self.len() == other.len() && self.iter().all(|(dim, size)| other.get(dim) == Some(size))
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<Dim>, Vec<Size>) {
        self.entries.into_iter().unzip()
    }
}

impl FromIterator<(Dim, Size)> for Schema {
    /// Collects without conflict checks; later duplicates are dropped.
    fn from_iter<I: IntoIterator<Item = (Dim, Size)>>(iter: I) -> Self {
        let mut schema = Self::new();
        for (dim, size) in iter {
            if !schema.contains(&dim) {
                schema.entries.push((dim, size));
            }
        }
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::Schema;
    use crate::{Domain, Size, TermError};

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test]
    fn from_parts_rejects_duplicates_and_length_mismatch() {
        let err = Schema::from_parts(&dims(&["i", "i"]), &[Size::Discrete(2), Size::Discrete(2)])
            .expect_err("duplicate dims should fail");
        assert_eq!(err, TermError::DuplicateDim { dim: "i".to_owned() });

        let err = Schema::from_parts(&dims(&["i"]), &[]).expect_err("length mismatch");
        assert_eq!(err, TermError::DimShapeMismatch { dims: 1, shape: 0 });
    }

    #[test]
    fn union_preserves_first_seen_order() {
        let mut schema =
            Schema::from_parts(&dims(&["j", "i"]), &[Size::Discrete(3), Size::Discrete(2)])
                .expect("valid schema");
        let other = Schema::from_parts(
            &dims(&["i", "x"]),
            &[Size::Discrete(2), Size::Continuous(Domain::Real)],
        )
        .expect("valid schema");
        schema.extend_from(&other).expect("compatible union");
        assert_eq!(schema.dims().collect::<Vec<_>>(), vec!["j", "i", "x"]);
    }

    #[test]
    fn union_detects_size_conflict() {
        let mut schema =
            Schema::from_parts(&dims(&["i"]), &[Size::Discrete(2)]).expect("valid schema");
        let err = schema
            .insert("i", Size::Discrete(3))
            .expect_err("conflicting size");
        assert!(matches!(err, TermError::SizeConflict { .. }));
    }

    #[test]
    fn same_entries_ignores_order() {
        let a = Schema::from_parts(&dims(&["i", "j"]), &[Size::Discrete(2), Size::Discrete(3)])
            .expect("valid schema");
        let b = Schema::from_parts(&dims(&["j", "i"]), &[Size::Discrete(3), Size::Discrete(2)])
            .expect("valid schema");
        assert!(a.same_entries(&b));
        assert_ne!(a, b);
    }
}
