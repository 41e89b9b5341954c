use std::sync::Arc;

use log::trace;

use crate::{
    AnyType, ArrayElementCovariance, CastCache, CastCacheCreateInfo, CastError, CastOracle,
    CastResult, CastStrategy, ClassHierarchy, InterfaceMembership, NoBarrier, ObjectRef,
    Resolution, TargetKind, TypeHandle, Verdict, WriteBarrier,
};

#[derive(Debug, Default, Clone)]
pub struct CastEngineCreateInfo {
    pub cache: CastCacheCreateInfo,
}

/// Dispatch layer: fast path first, the shared cache second, the oracle last.
///
/// Test entry points (`is_instance_of*`) return the value or `None`. Checked casts (`cast*`)
/// return the value or the oracle's `CastIllegal`. A null value passes both unchanged.
pub struct CastEngine<O, B = NoBarrier> {
    pub(crate) cache: Arc<CastCache>,
    pub(crate) oracle: O,
    pub(crate) barrier: B,
    pub(crate) covariance: ArrayElementCovariance,
}

impl<O: CastOracle> CastEngine<O> {
    pub fn without_barrier(universal: TypeHandle, info: CastEngineCreateInfo, oracle: O) -> Self {
        Self::new(universal, info, oracle, NoBarrier)
    }
}

impl<O: CastOracle, B: WriteBarrier> CastEngine<O, B> {
    /// `universal` is the reference type every object is assignable to, `Object[]` stores skip
    /// all type logic.
    pub fn new(universal: TypeHandle, info: CastEngineCreateInfo, oracle: O, barrier: B) -> Self {
        let cache = Arc::new(CastCache::new(info.cache));
        Self::with_cache(universal, cache, oracle, barrier)
    }

    /// Share one cache between engines, e.g. one per mutator thread.
    pub fn with_cache(universal: TypeHandle, cache: Arc<CastCache>, oracle: O, barrier: B) -> Self {
        Self {
            cache,
            oracle,
            barrier,
            covariance: ArrayElementCovariance::new(universal),
        }
    }

    #[inline]
    pub fn cache(&self) -> &Arc<CastCache> {
        &self.cache
    }

    #[inline]
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    #[inline]
    pub fn barrier(&self) -> &B {
        &self.barrier
    }

    #[inline]
    pub fn universal(&self) -> TypeHandle {
        self.covariance.universal()
    }

    pub fn is_instance_of<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Option<&'a ObjectRef> {
        match TargetKind::of(target) {
            TargetKind::Class => self.is_instance_of_class(value, target),
            TargetKind::Interface => self.is_instance_of_interface(value, target),
            TargetKind::Any => self.is_instance_of_any(value, target),
        }
    }

    #[inline]
    pub fn is_instance_of_class<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Option<&'a ObjectRef> {
        self.test::<ClassHierarchy>(value, target)
    }

    #[inline]
    pub fn is_instance_of_interface<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Option<&'a ObjectRef> {
        self.test::<InterfaceMembership>(value, target)
    }

    #[inline]
    pub fn is_instance_of_any<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Option<&'a ObjectRef> {
        self.test::<AnyType>(value, target)
    }

    pub fn cast<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Result<Option<&'a ObjectRef>, CastError> {
        match TargetKind::of(target) {
            TargetKind::Class => self.cast_class(value, target),
            TargetKind::Interface => self.cast_interface(value, target),
            TargetKind::Any => self.cast_any(value, target),
        }
    }

    #[inline]
    pub fn cast_class<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Result<Option<&'a ObjectRef>, CastError> {
        self.checked::<ClassHierarchy>(value, target)
    }

    #[inline]
    pub fn cast_interface<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Result<Option<&'a ObjectRef>, CastError> {
        self.checked::<InterfaceMembership>(value, target)
    }

    #[inline]
    pub fn cast_any<'a>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Result<Option<&'a ObjectRef>, CastError> {
        self.checked::<AnyType>(value, target)
    }

    /// Type-level test, classifies `target` like [`CastEngine::is_instance_of`].
    pub fn is_assignable(&self, source: TypeHandle, target: TypeHandle) -> bool {
        let verdict = match TargetKind::of(target) {
            TargetKind::Class => self.resolve::<ClassHierarchy>(source, target),
            TargetKind::Interface => self.resolve::<InterfaceMembership>(source, target),
            TargetKind::Any => self.resolve::<AnyType>(source, target),
        };
        verdict.can_cast()
    }

    /// Definite answer for a test entry point.
    pub fn resolve<S: CastStrategy>(&self, source: TypeHandle, target: TypeHandle) -> Verdict {
        if let Some(verdict) = S::fast_path(source, target).verdict() {
            return verdict;
        }
        if let Some(verdict) = self.cache.try_get(source, target).verdict() {
            return verdict;
        }
        self.resolve_slow(source, target)
    }

    #[inline]
    fn test<'a, S: CastStrategy>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Option<&'a ObjectRef> {
        let object = value?;
        self.resolve::<S>(object.type_handle(), target)
            .can_cast()
            .then_some(object)
    }

    fn checked<'a, S: CastStrategy>(
        &self,
        value: Option<&'a ObjectRef>,
        target: TypeHandle,
    ) -> Result<Option<&'a ObjectRef>, CastError> {
        let Some(object) = value else {
            return Ok(None);
        };
        let source = object.type_handle();

        // negatives from the fast path or the cache are not enough to fail, only the oracle raises
        if S::fast_path(source, target) == CastResult::CanCast
            || self.cache.try_get(source, target) == CastResult::CanCast
        {
            return Ok(Some(object));
        }

        trace!("checked cast {source} -> {target} ({:?}) falls through to the oracle", S::KIND);
        let resolution = self.oracle.check_cast(source, target)?;
        self.memoize(source, target, resolution);
        Ok(Some(object))
    }

    pub(crate) fn resolve_slow(&self, source: TypeHandle, target: TypeHandle) -> Verdict {
        trace!("cast {source} -> {target} falls through to the oracle");
        let resolution = self.oracle.resolve(source, target);
        self.memoize(source, target, resolution);
        resolution.verdict
    }

    fn memoize(&self, source: TypeHandle, target: TypeHandle, resolution: Resolution) {
        if !resolution.cacheable {
            return;
        }
        trace!("memoizing {source} -> {target} as {:?}", resolution.verdict);
        self.cache.try_set(source, target, resolution.verdict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetadataOracle, Object, TypeFlags, TypeRegistry};

    struct Fixture {
        registry: TypeRegistry,
        base: TypeHandle,
        derived: TypeHandle,
        sibling: TypeHandle,
        shape: TypeHandle,
        oracle: Arc<MetadataOracle>,
        engine: CastEngine<Arc<MetadataOracle>>,
    }

    fn fixture() -> Fixture {
        let registry = TypeRegistry::new();
        let shape = registry.interface("IShape").build();
        let base = registry.class("Base").build();
        let derived = registry.class("Derived").parent(base).implements(&[shape]).build();
        let sibling = registry.class("Sibling").parent(base).build();
        let oracle = Arc::new(MetadataOracle::new());
        let engine = CastEngine::without_barrier(
            registry.object(),
            CastEngineCreateInfo::default(),
            Arc::clone(&oracle),
        );
        Fixture {
            registry,
            base,
            derived,
            sibling,
            shape,
            oracle,
            engine,
        }
    }

    #[test]
    fn instances_are_instances_of_their_own_type() {
        let f = fixture();
        for ty in [f.base, f.derived, f.sibling, f.registry.array_of(f.base)] {
            let obj = Object::new(ty);
            assert!(f.engine.is_instance_of(Some(&obj), ty).is_some(), "{ty}");
        }
        assert_eq!(f.oracle.calls(), 0);
    }

    #[test]
    fn tests_follow_the_hierarchy() {
        let f = fixture();
        let derived = Object::new(f.derived);
        let sibling = Object::new(f.sibling);

        assert!(f.engine.is_instance_of(Some(&derived), f.base).is_some());
        assert!(f.engine.is_instance_of(Some(&derived), f.shape).is_some());
        assert!(f.engine.is_instance_of(Some(&sibling), f.derived).is_none());
        assert!(f.engine.is_instance_of(Some(&sibling), f.shape).is_none());
        // all decided by the fast paths
        assert_eq!(f.oracle.calls(), 0);
    }

    #[test]
    fn null_passes_tests_and_casts() {
        let f = fixture();

        assert!(f.engine.is_instance_of(None, f.derived).is_none());
        assert!(matches!(f.engine.cast(None, f.derived), Ok(None)));
    }

    #[test]
    fn returns_the_same_object() {
        let f = fixture();
        let derived = Object::new(f.derived);

        let tested = f.engine.is_instance_of(Some(&derived), f.base).expect("instance");
        assert!(Arc::ptr_eq(tested, &derived));
        let cast = f.engine.cast(Some(&derived), f.shape).expect("cast").expect("non-null");
        assert!(Arc::ptr_eq(cast, &derived));
    }

    #[test]
    fn failed_casts_raise_cast_illegal() {
        let f = fixture();
        let sibling = Object::new(f.sibling);

        assert_eq!(
            f.engine.cast(Some(&sibling), f.derived).unwrap_err(),
            CastError::CastIllegal {
                from: f.sibling,
                to: f.derived
            }
        );
        assert_eq!(
            f.engine.cast(Some(&sibling), f.shape).unwrap_err(),
            CastError::CastIllegal {
                from: f.sibling,
                to: f.shape
            }
        );
        // only the oracle raises
        assert_eq!(f.oracle.calls(), 2);
    }

    #[test]
    fn oracle_verdicts_are_memoized() {
        let f = fixture();
        let enumerable_derived = f
            .registry
            .interface("IEnumerable<Derived>")
            .flags(TypeFlags::VARIANT)
            .build();
        let enumerable_base = f
            .registry
            .interface("IEnumerable<Base>")
            .flags(TypeFlags::VARIANT)
            .build();
        let list = f.registry.class("List<Derived>").implements(&[enumerable_derived]).build();
        f.oracle.allow(enumerable_derived, enumerable_base);
        let obj = Object::new(list);

        assert!(f.engine.is_instance_of(Some(&obj), enumerable_base).is_some());
        assert_eq!(f.oracle.calls(), 1);
        assert_eq!(f.engine.cache().try_get(list, enumerable_base), CastResult::CanCast);

        assert!(f.engine.is_instance_of(Some(&obj), enumerable_base).is_some());
        assert!(f.engine.cast(Some(&obj), enumerable_base).is_ok());
        assert_eq!(f.oracle.calls(), 1);
    }

    #[test]
    fn cached_negatives_answer_tests_but_not_casts() {
        let f = fixture();
        let param = f.registry.generic_parameter("T").build();
        let obj = Object::new(f.base);

        assert!(f.engine.is_instance_of(Some(&obj), param).is_none());
        assert!(f.engine.is_instance_of(Some(&obj), param).is_none());
        assert_eq!(f.oracle.calls(), 1);
        assert_eq!(f.engine.cache().try_get(f.base, param), CastResult::CannotCast);

        assert!(matches!(
            f.engine.cast(Some(&obj), param),
            Err(CastError::CastIllegal { .. })
        ));
        assert_eq!(f.oracle.calls(), 2);
    }

    #[test]
    fn provisional_verdicts_are_not_cached() {
        let f = fixture();
        let loading = f
            .registry
            .class("Loading")
            .parent(f.base)
            .flags(TypeFlags::PROVISIONAL)
            .build();
        let param = f.registry.generic_parameter("T").build();
        let obj = Object::new(loading);

        assert!(f.engine.is_instance_of(Some(&obj), param).is_none());
        assert!(f.engine.is_instance_of(Some(&obj), param).is_none());
        assert_eq!(f.oracle.calls(), 2);
        assert_eq!(f.engine.cache().try_get(loading, param), CastResult::Indeterminate);
    }

    #[test]
    fn equivalent_class_targets_defer_to_the_oracle() {
        let f = fixture();
        let local = f
            .registry
            .class("Embedded")
            .flags(TypeFlags::TYPE_EQUIVALENCE)
            .build();
        let imported = f
            .registry
            .class("Embedded")
            .flags(TypeFlags::TYPE_EQUIVALENCE)
            .build();
        let obj = Object::new(local);

        assert!(f.engine.cast(Some(&obj), imported).is_ok());
        assert!(f.engine.is_instance_of(Some(&obj), imported).is_some());
        assert_eq!(f.oracle.calls(), 1);
    }

    #[test]
    fn strategy_entry_points_match_classified_ones() {
        let f = fixture();
        let derived = Object::new(f.derived);

        assert!(f.engine.is_instance_of_class(Some(&derived), f.base).is_some());
        assert!(f.engine.is_instance_of_interface(Some(&derived), f.shape).is_some());
        assert!(f.engine.cast_any(Some(&derived), f.base).is_ok());
        assert!(f.engine.is_assignable(f.derived, f.base));
        assert!(!f.engine.is_assignable(f.base, f.derived));
    }

    #[test]
    fn engines_can_share_a_cache() {
        let f = fixture();
        let param = f.registry.generic_parameter("T").build();
        let other = CastEngine::with_cache(
            f.registry.object(),
            Arc::clone(f.engine.cache()),
            Arc::clone(&f.oracle),
            NoBarrier,
        );

        assert!(!f.engine.is_assignable(f.base, param));
        assert!(!other.is_assignable(f.base, param));
        assert_eq!(f.oracle.calls(), 1);
    }
}
