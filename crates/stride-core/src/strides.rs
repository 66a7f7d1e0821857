use crate::{rvec, RVec, Shape};

#[derive(Clone, PartialEq, Eq, Default, Hash)]
pub struct Strides(RVec<isize>);

impl Strides {
    pub fn new(strides: RVec<isize>) -> Self {
        Self(strides)
    }

    pub fn to_vec(&self) -> Vec<isize> {
        self.0.to_vec()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, isize> {
        self.0.iter()
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, index: usize, stride: isize) {
        self.0.insert(index, stride);
    }

    pub fn remove(&mut self, index: usize) -> isize {
        self.0.remove(index)
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        self.0.swap(a, b);
    }

    /// Column-major strides, as produced by Fortran-ordered sources.
    pub fn fortran(shape: &Shape) -> Self {
        let mut strides = rvec![];
        let mut stride = 1;
        for size in shape.iter() {
            strides.push(stride);
            stride *= *size as isize;
        }
        Self(strides)
    }
}

impl std::fmt::Debug for Strides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims = self
            .0
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("x");
        write!(f, "[{}]", dims)
    }
}

impl std::ops::Index<usize> for Strides {
    type Output = isize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for Strides {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl From<&Shape> for Strides {
    fn from(shape: &Shape) -> Self {
        let mut strides = rvec![];
        let mut stride = 1;
        for size in shape.inner().iter().rev() {
            strides.push(stride);
            stride *= *size as isize;
        }
        strides.reverse();
        Self(strides)
    }
}

impl From<Vec<isize>> for Strides {
    fn from(strides: Vec<isize>) -> Self {
        Self(strides.into())
    }
}

impl From<&[isize]> for Strides {
    fn from(strides: &[isize]) -> Self {
        Self(strides.into())
    }
}

/// Walks the physical element offsets of a strided view in logical (row-major) order.
#[derive(Debug, Clone)]
pub struct StridedIndex<'a> {
    next: Option<isize>,
    index: RVec<usize>,
    shape: &'a Shape,
    strides: &'a Strides,
}

impl<'a> StridedIndex<'a> {
    pub fn new(shape: &'a Shape, strides: &'a Strides, offset: usize) -> Self {
        let next = if shape.numel() == 0 {
            None
        } else {
            Some(offset as isize)
        };
        Self {
            next,
            index: rvec![0; shape.rank()],
            shape,
            strides,
        }
    }
}

impl Iterator for StridedIndex<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let mut next = current;
        let mut advanced = false;
        for ((i, &size), &stride) in self
            .index
            .iter_mut()
            .zip(self.shape.iter())
            .zip(self.strides.iter())
            .rev()
        {
            if *i + 1 < size {
                *i += 1;
                next += stride;
                advanced = true;
                break;
            }
            next -= *i as isize * stride;
            *i = 0;
        }
        self.next = advanced.then_some(next);
        Some(current as usize)
    }
}
