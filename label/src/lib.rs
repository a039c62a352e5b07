//! Class-labeled bounding boxes and the normalized label-file format.

mod annotation;
pub use annotation::*;

use bbox::{CxCyWH, Rect, Transform};
use num_traits::Num;
use std::ops::Mul;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label<R, C>
where
    R: Rect,
{
    pub rect: R,
    pub class: C,
}

impl<'a, T, C> Mul<&'a Label<CxCyWH<T>, C>> for &'a Transform<T>
where
    T: Copy + Num + PartialOrd,
    C: Copy,
{
    type Output = Label<CxCyWH<T>, C>;

    fn mul(self, rhs: &'a Label<CxCyWH<T>, C>) -> Self::Output {
        Label {
            rect: self * &rhs.rect,
            class: rhs.class,
        }
    }
}
