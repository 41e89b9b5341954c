//! Bounded-cost fast paths. They only read descriptors, never the cache or the oracle, and
//! answer `Indeterminate` whenever the metadata alone cannot decide.
use crate::{CastResult, TypeFlags, TypeHandle, TypeKind};

/// Hops or entries examined per loop iteration.
pub const UNROLL: usize = 4;

/// Static shape of a cast target, picks the strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Class,
    Interface,
    /// No traversal is sound: naked generic parameters, variant instantiations, arrays.
    Any,
}

impl TargetKind {
    pub fn of(target: TypeHandle) -> Self {
        if target.has_flags(TypeFlags::VARIANT) {
            return Self::Any;
        }
        match target.kind() {
            TypeKind::Class => Self::Class,
            TypeKind::Interface => Self::Interface,
            TypeKind::Array | TypeKind::GenericParameter => Self::Any,
        }
    }
}

pub trait CastStrategy {
    const KIND: TargetKind;

    fn fast_path(source: TypeHandle, target: TypeHandle) -> CastResult;
}

pub struct ClassHierarchy;

pub struct InterfaceMembership;

pub struct AnyType;

impl CastStrategy for ClassHierarchy {
    const KIND: TargetKind = TargetKind::Class;

    #[inline]
    fn fast_path(source: TypeHandle, target: TypeHandle) -> CastResult {
        if source == target {
            return CastResult::CanCast;
        }

        let mut current = source.parent();
        'walk: loop {
            for _ in 0..UNROLL {
                match current {
                    Some(ancestor) if ancestor == target => return CastResult::CanCast,
                    Some(ancestor) => current = ancestor.parent(),
                    None => break 'walk,
                }
            }
        }

        // equivalent types are not identical, the walk cannot see them
        if target.has_flags(TypeFlags::TYPE_EQUIVALENCE) {
            CastResult::Indeterminate
        } else {
            CastResult::CannotCast
        }
    }
}

impl CastStrategy for InterfaceMembership {
    const KIND: TargetKind = TargetKind::Interface;

    #[inline]
    fn fast_path(source: TypeHandle, target: TypeHandle) -> CastResult {
        let interfaces = source.interfaces();
        let mut chunks = interfaces.chunks_exact(UNROLL);
        for chunk in &mut chunks {
            if chunk[0] == target || chunk[1] == target || chunk[2] == target || chunk[3] == target
            {
                return CastResult::CanCast;
            }
        }
        if chunks.remainder().contains(&target) {
            return CastResult::CanCast;
        }

        if source.has_flags(TypeFlags::NON_TRIVIAL_INTERFACE_CAST)
            || target.has_flags(TypeFlags::TYPE_EQUIVALENCE)
        {
            CastResult::Indeterminate
        } else {
            CastResult::CannotCast
        }
    }
}

impl CastStrategy for AnyType {
    const KIND: TargetKind = TargetKind::Any;

    #[inline]
    fn fast_path(source: TypeHandle, target: TypeHandle) -> CastResult {
        if source == target {
            CastResult::CanCast
        } else {
            CastResult::Indeterminate
        }
    }
}

/// Element check for covariant array stores. Null values never get here.
#[derive(Debug, Copy, Clone)]
pub struct ArrayElementCovariance {
    universal: TypeHandle,
}

impl ArrayElementCovariance {
    pub fn new(universal: TypeHandle) -> Self {
        Self { universal }
    }

    #[inline]
    pub fn universal(&self) -> TypeHandle {
        self.universal
    }

    /// `CanCast` for the exact element type or an `Object[]`, `Indeterminate` otherwise. Never
    /// `CannotCast`: negatives come from the cache or the oracle.
    #[inline]
    pub fn fast_path(&self, element: TypeHandle, value: TypeHandle) -> CastResult {
        if value == element || element == self.universal {
            CastResult::CanCast
        } else {
            CastResult::Indeterminate
        }
    }
}
