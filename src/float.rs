use std::fmt::{Debug, Display, LowerExp};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Marker trait for base floating-point types (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed throughout pangolin.
/// Solvers, accelerators, and proximal operators are all generic over this
/// trait, so an entire solve runs in a single caller-chosen precision.
pub trait Float:
    NumFloat
    + FloatConst
    + FromPrimitive
    + Copy
    + Send
    + Sync
    + Default
    + Debug
    + Display
    + LowerExp
    + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}
