use super::CxCyWH;
use crate::{common::*, Size};

/// Per-axis scaling followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sx: T,
    pub sy: T,
    pub tx: T,
    pub ty: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    /// Maps unit-square normalized coordinates onto an image of `size` pixels.
    pub fn from_unit_to(size: &Size<T>) -> Self {
        Self {
            sx: size.w(),
            sy: size.h(),
            tx: T::zero(),
            ty: T::zero(),
        }
    }
}

impl<T> Mul<&CxCyWH<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = CxCyWH<T>;

    fn mul(self, rhs: &CxCyWH<T>) -> Self::Output {
        rhs.transform(self)
    }
}
