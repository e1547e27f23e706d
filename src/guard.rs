//! Process-wide registry guarding against concurrent reuse of one
//! solver or problem instance.
//!
//! Solver instances are not reentrant: two threads driving the same
//! instance would race on its working storage. Entering a solve registers
//! the participating instances by address; a second registration of the
//! same instance is rejected with [`SolverError::InstanceInUse`] instead
//! of silently corrupting state. Registration is released on every exit
//! path by the RAII guard. Distinct instances register and deregister
//! concurrently without contention beyond the registry lock itself.
//!
//! Keys carry a [`Kind`] besides the address, one registry partition per
//! participating role, so an outer solver and the inner solver it embeds
//! (which may share a base address) never collide with each other.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use crate::error::SolverError;

/// Which role an address is registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Kind {
    InnerSolver,
    OuterSolver,
    Problem,
}

static REGISTRY: OnceLock<Mutex<HashSet<(Kind, usize)>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashSet<(Kind, usize)>> {
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// RAII registration of an object address for the duration of a solve.
#[derive(Debug)]
pub(crate) struct InUseGuard {
    key: (Kind, usize),
}

impl InUseGuard {
    /// Register an address under `kind`; fails if it is already registered.
    pub fn acquire(kind: Kind, key: usize) -> Result<Self, SolverError> {
        let mut set = registry().lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert((kind, key)) {
            return Err(SolverError::InstanceInUse);
        }
        Ok(InUseGuard { key: (kind, key) })
    }
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        let mut set = registry().lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

/// Address of a (possibly unsized) object, usable as a registry key.
pub(crate) fn identity_of<T: ?Sized>(t: &T) -> usize {
    (t as *const T).cast::<u8>() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_acquire_is_rejected() {
        let x = 42u32;
        let key = identity_of(&x);
        let g1 = InUseGuard::acquire(Kind::Problem, key).unwrap();
        assert_eq!(
            InUseGuard::acquire(Kind::Problem, key).unwrap_err(),
            SolverError::InstanceInUse
        );
        drop(g1);
        // Released on drop: a new solve may start.
        let _g2 = InUseGuard::acquire(Kind::Problem, key).unwrap();
    }

    #[test]
    fn roles_are_independent() {
        let x = 7u8;
        let key = identity_of(&x);
        let _a = InUseGuard::acquire(Kind::OuterSolver, key).unwrap();
        let _b = InUseGuard::acquire(Kind::InnerSolver, key).unwrap();
    }

    #[test]
    fn distinct_instances_coexist() {
        let (a, b) = (1u8, 2u8);
        let _ga = InUseGuard::acquire(Kind::Problem, identity_of(&a)).unwrap();
        let _gb = InUseGuard::acquire(Kind::Problem, identity_of(&b)).unwrap();
    }

    #[test]
    fn release_happens_on_drop_even_after_error_path() {
        let x = 3u16;
        let key = identity_of(&x);
        {
            let _g = InUseGuard::acquire(Kind::Problem, key).unwrap();
            assert!(InUseGuard::acquire(Kind::Problem, key).is_err());
        }
        assert!(InUseGuard::acquire(Kind::Problem, key).is_ok());
    }
}
