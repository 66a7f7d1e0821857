use serde::{Deserialize, Serialize};

use crate::{Scalar, Shape};

/// A tensor's elements copied out into nested lists, outermost dimension first.
///
/// Rank-0 tensors become a bare [Nested::Scalar].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Nested {
    Scalar(Scalar),
    List(Vec<Nested>),
}

impl Nested {
    /// Builds the tree for `shape` from elements in logical order.
    ///
    /// `values` must hold exactly `shape.numel()` elements.
    pub(crate) fn from_flat(shape: &Shape, values: &[Scalar]) -> Self {
        fn build(dims: &[usize], values: &[Scalar], cursor: &mut usize) -> Nested {
            match dims.split_first() {
                None => {
                    let value = values[*cursor];
                    *cursor += 1;
                    Nested::Scalar(value)
                }
                Some((&size, rest)) => {
                    Nested::List((0..size).map(|_| build(rest, values, cursor)).collect())
                }
            }
        }
        build(shape.inner(), values, &mut 0)
    }

    /// Number of list levels above the leaves.
    pub fn depth(&self) -> usize {
        match self {
            Nested::Scalar(_) => 0,
            Nested::List(items) => 1 + items.first().map_or(0, Nested::depth),
        }
    }

    pub fn flatten(&self) -> Vec<Scalar> {
        let mut out = vec![];
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<Scalar>) {
        match self {
            Nested::Scalar(s) => out.push(*s),
            Nested::List(items) => items.iter().for_each(|i| i.flatten_into(out)),
        }
    }
}

impl std::fmt::Display for Nested {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Nested::Scalar(s) => write!(f, "{}", s),
            Nested::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
