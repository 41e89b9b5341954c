use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;

use crate::{CastError, TypeFlags, TypeHandle, Verdict};

/// What the oracle decided and whether that answer may be memoized.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub verdict: Verdict,
    pub cacheable: bool,
}

/// The authoritative, unbounded-cost slow path. Everything the fast paths and the cache answer
/// is an approximation of this.
pub trait CastOracle: Send + Sync {
    fn resolve(&self, source: TypeHandle, target: TypeHandle) -> Resolution;

    /// Resolution for a checked cast site, the only place a `CastIllegal` is born.
    fn check_cast(&self, source: TypeHandle, target: TypeHandle) -> Result<Resolution, CastError> {
        let resolution = self.resolve(source, target);
        match resolution.verdict {
            Verdict::CanCast => Ok(resolution),
            Verdict::CannotCast => Err(CastError::CastIllegal {
                from: source,
                to: target,
            }),
        }
    }
}

impl<O: CastOracle + ?Sized> CastOracle for Arc<O> {
    fn resolve(&self, source: TypeHandle, target: TypeHandle) -> Resolution {
        (**self).resolve(source, target)
    }

    fn check_cast(&self, source: TypeHandle, target: TypeHandle) -> Result<Resolution, CastError> {
        (**self).check_cast(source, target)
    }
}

/// Resolves casts from registry metadata alone.
///
/// On top of what the descriptors say, callers can declare extra compatible pairs with
/// [`MetadataOracle::allow`]. That is how generic variance and custom casting rules are modelled,
/// the fast paths can never see those rules and have to ask.
#[derive(Debug, Default)]
pub struct MetadataOracle {
    rules: RwLock<HashSet<(TypeHandle, TypeHandle), ahash::RandomState>>,
    calls: AtomicUsize,
}

impl MetadataOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `source` assignable to `target` regardless of the hierarchy. Only meaningful for
    /// targets the fast paths defer on, such as variant instantiations.
    pub fn allow(&self, source: TypeHandle, target: TypeHandle) {
        self.rules.write().insert((source, target));
    }

    /// Number of `resolve` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Ground truth, without counting as a call.
    pub fn is_assignable(&self, source: TypeHandle, target: TypeHandle) -> bool {
        let rules = self.rules.read();
        assignable(&rules, source, target)
    }
}

impl CastOracle for MetadataOracle {
    fn resolve(&self, source: TypeHandle, target: TypeHandle) -> Resolution {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let verdict = Verdict::from(self.is_assignable(source, target));
        let cacheable = !source.has_flags(TypeFlags::PROVISIONAL)
            && !target.has_flags(TypeFlags::PROVISIONAL);
        Resolution { verdict, cacheable }
    }
}

fn equivalent(source: TypeHandle, target: TypeHandle) -> bool {
    source.has_flags(TypeFlags::TYPE_EQUIVALENCE)
        && target.has_flags(TypeFlags::TYPE_EQUIVALENCE)
        && source.kind() == target.kind()
        && source.name() == target.name()
}

fn assignable(
    rules: &HashSet<(TypeHandle, TypeHandle), ahash::RandomState>,
    source: TypeHandle,
    target: TypeHandle,
) -> bool {
    if source == target || rules.contains(&(source, target)) || equivalent(source, target) {
        return true;
    }

    // reference arrays are covariant in their element type
    if let (Some(from), Some(to)) = (source.element(), target.element()) {
        if assignable(rules, from, to) {
            return true;
        }
    }

    if source
        .parent()
        .is_some_and(|parent| assignable(rules, parent, target))
    {
        return true;
    }

    source
        .interfaces()
        .iter()
        .any(|&iface| assignable(rules, iface, target))
}
