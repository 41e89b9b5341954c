use std::sync::Arc;

use crate::{
    CastEngine, CastError, CastOracle, CastResult, ElementSlot, ObjectRef, TypeHandle,
    WriteBarrier,
};

/// Checked access to one array slot, typed exactly as the array's element type.
pub struct ElementAddress<'a, O, B> {
    engine: &'a CastEngine<O, B>,
    slot: &'a ElementSlot,
    element_type: TypeHandle,
}

/// Null check, array check, bounds check. In that order, before any type logic.
fn array_slot(
    array: Option<&ObjectRef>,
    index: usize,
) -> Result<(&ElementSlot, TypeHandle), CastError> {
    let array = array.ok_or(CastError::NullTarget)?;
    let (slots, element_type) = array
        .array_parts()
        .ok_or(CastError::NotAnArray(array.type_handle()))?;
    let slot = slots.get(index).ok_or(CastError::OutOfBounds {
        index,
        length: slots.len(),
    })?;
    Ok((slot, element_type))
}

impl<O: CastOracle, B: WriteBarrier> CastEngine<O, B> {
    /// Covariant array store: `value` must be compatible with the array's actual element type.
    pub fn store_element(
        &self,
        array: Option<&ObjectRef>,
        index: usize,
        value: Option<ObjectRef>,
    ) -> Result<(), CastError> {
        let (slot, element_type) = array_slot(array, index)?;
        self.store_checked(slot, element_type, value)
    }

    pub fn load_element(
        &self,
        array: Option<&ObjectRef>,
        index: usize,
    ) -> Result<Option<ObjectRef>, CastError> {
        let (slot, _) = array_slot(array, index)?;
        Ok(slot.load())
    }

    /// Address of an element, only handed out when `expected` is exactly the element type.
    pub fn element_address<'a>(
        &'a self,
        array: Option<&'a ObjectRef>,
        index: usize,
        expected: TypeHandle,
    ) -> Result<ElementAddress<'a, O, B>, CastError> {
        let (slot, element_type) = array_slot(array, index)?;
        if element_type != expected {
            return Err(CastError::TypeMismatch {
                element: element_type,
                found: expected,
            });
        }
        Ok(ElementAddress {
            engine: self,
            slot,
            element_type,
        })
    }

    pub(crate) fn store_checked(
        &self,
        slot: &ElementSlot,
        element_type: TypeHandle,
        value: Option<ObjectRef>,
    ) -> Result<(), CastError> {
        let Some(value) = value else {
            slot.write(None);
            return Ok(());
        };

        let found = value.type_handle();
        if !self.element_accepts(element_type, found) {
            return Err(CastError::TypeMismatch {
                element: element_type,
                found,
            });
        }

        slot.write(Some(Arc::clone(&value)));
        self.barrier.record_reference_store(slot.address(), &value);
        Ok(())
    }

    fn element_accepts(&self, element_type: TypeHandle, found: TypeHandle) -> bool {
        if self.covariance.fast_path(element_type, found) == CastResult::CanCast {
            return true;
        }
        match self.cache.try_get(found, element_type) {
            CastResult::CanCast => true,
            CastResult::CannotCast => false,
            CastResult::Indeterminate => self.resolve_slow(found, element_type).can_cast(),
        }
    }
}

impl<O: CastOracle, B: WriteBarrier> ElementAddress<'_, O, B> {
    #[inline]
    pub fn element_type(&self) -> TypeHandle {
        self.element_type
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.slot.address()
    }

    #[inline]
    pub fn load(&self) -> Option<ObjectRef> {
        self.slot.load()
    }

    /// Same checks and barrier as [`CastEngine::store_element`].
    pub fn store(&self, value: Option<ObjectRef>) -> Result<(), CastError> {
        self.engine.store_checked(self.slot, self.element_type, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CardMarkingBarrier, CastEngineCreateInfo, MetadataOracle, Object, TypeRegistry};

    struct Fixture {
        registry: TypeRegistry,
        base: TypeHandle,
        derived: TypeHandle,
        sibling: TypeHandle,
        oracle: Arc<MetadataOracle>,
        barrier: Arc<CardMarkingBarrier>,
        engine: CastEngine<Arc<MetadataOracle>, Arc<CardMarkingBarrier>>,
    }

    fn fixture() -> Fixture {
        let registry = TypeRegistry::new();
        let base = registry.class("Base").build();
        let derived = registry.class("Derived").parent(base).build();
        let sibling = registry.class("Sibling").parent(base).build();
        let oracle = Arc::new(MetadataOracle::new());
        let barrier = Arc::new(CardMarkingBarrier::default());
        let engine = CastEngine::new(
            registry.object(),
            CastEngineCreateInfo::default(),
            Arc::clone(&oracle),
            Arc::clone(&barrier),
        );
        Fixture {
            registry,
            base,
            derived,
            sibling,
            oracle,
            barrier,
            engine,
        }
    }

    fn array(f: &Fixture, element: TypeHandle, length: usize) -> ObjectRef {
        Object::new_array(f.registry.array_of(element), length).expect("array type")
    }

    #[test]
    fn covariance_boundary() {
        let f = fixture();
        // a Derived[] seen through a Base[] reference
        let arr = array(&f, f.derived, 3);

        assert!(f.engine.store_element(Some(&arr), 0, Some(Object::new(f.derived))).is_ok());
        assert_eq!(
            f.engine.store_element(Some(&arr), 1, Some(Object::new(f.sibling))),
            Err(CastError::TypeMismatch {
                element: f.derived,
                found: f.sibling
            })
        );
        assert!(f.engine.store_element(Some(&arr), 2, None).is_ok());
    }

    #[test]
    fn derived_values_go_into_base_arrays() {
        let f = fixture();
        let arr = array(&f, f.base, 2);
        let value = Object::new(f.derived);

        assert!(f.engine.store_element(Some(&arr), 0, Some(Arc::clone(&value))).is_ok());
        let loaded = f.engine.load_element(Some(&arr), 0).expect("in bounds").expect("stored");
        assert!(Arc::ptr_eq(&loaded, &value));
        assert_eq!(f.oracle.calls(), 1);

        // second store of the same pair is answered by the cache
        assert!(f.engine.store_element(Some(&arr), 1, Some(Object::new(f.derived))).is_ok());
        assert_eq!(f.oracle.calls(), 1);
    }

    #[test]
    fn object_arrays_accept_anything() {
        let f = fixture();
        let arr = array(&f, f.registry.object(), 3);

        let values = [
            Object::new(f.sibling),
            array(&f, f.base, 1),
            Object::new(f.registry.object()),
        ];
        for (index, value) in values.into_iter().enumerate() {
            assert!(f.engine.store_element(Some(&arr), index, Some(value)).is_ok());
        }
        assert_eq!(f.oracle.calls(), 0);
    }

    #[test]
    fn derived_array_scenario() {
        let f = fixture();
        let arr = array(&f, f.derived, 3);

        assert_eq!(
            f.engine.store_element(Some(&arr), 1, Some(Object::new(f.base))),
            Err(CastError::TypeMismatch {
                element: f.derived,
                found: f.base
            })
        );
        for value in [Some(Object::new(f.base)), Some(Object::new(f.derived)), None] {
            assert_eq!(
                f.engine.store_element(Some(&arr), 5, value),
                Err(CastError::OutOfBounds {
                    index: 5,
                    length: 3
                })
            );
        }
        assert!(f.engine.load_element(Some(&arr), 1).expect("in bounds").is_none());
    }

    #[test]
    fn bounds_are_checked_before_types() {
        let f = fixture();
        let arr = array(&f, f.derived, 0);

        assert_eq!(
            f.engine.store_element(Some(&arr), 0, Some(Object::new(f.sibling))),
            Err(CastError::OutOfBounds {
                index: 0,
                length: 0
            })
        );
        assert_eq!(f.oracle.calls(), 0);
        assert_eq!(f.engine.cache().try_get(f.sibling, f.derived), CastResult::Indeterminate);
    }

    #[test]
    fn cached_negatives_reject_without_the_oracle() {
        let f = fixture();
        let arr = array(&f, f.derived, 1);

        for _ in 0..3 {
            assert!(matches!(
                f.engine.store_element(Some(&arr), 0, Some(Object::new(f.sibling))),
                Err(CastError::TypeMismatch { .. })
            ));
        }
        assert_eq!(f.oracle.calls(), 1);
    }

    #[test]
    fn null_and_non_array_receivers() {
        let f = fixture();
        let plain = Object::new(f.base);

        assert_eq!(f.engine.store_element(None, 0, None), Err(CastError::NullTarget));
        assert_eq!(
            f.engine.store_element(Some(&plain), 0, None),
            Err(CastError::NotAnArray(f.base))
        );
        assert!(matches!(f.engine.load_element(None, 0), Err(CastError::NullTarget)));
        assert!(matches!(
            f.engine.element_address(Some(&plain), 0, f.base),
            Err(CastError::NotAnArray(_))
        ));
    }

    #[test]
    fn barrier_runs_once_per_accepted_store() {
        let f = fixture();
        let arr = array(&f, f.base, 2);

        f.engine
            .store_element(Some(&arr), 0, Some(Object::new(f.derived)))
            .expect("accepted");
        assert_eq!(f.barrier.stores(), 1);

        // rejected and null stores leave the barrier alone
        let rejected = Object::new(f.registry.object());
        assert!(f.engine.store_element(Some(&arr), 1, Some(rejected)).is_err());
        f.engine.store_element(Some(&arr), 1, None).expect("null store");
        assert_eq!(f.barrier.stores(), 1);

        let address = f
            .engine
            .element_address(Some(&arr), 0, f.base)
            .expect("exact type")
            .address();
        assert!(f.barrier.is_dirty(address));
    }

    #[test]
    fn element_address_requires_exact_type() {
        let f = fixture();
        let arr = array(&f, f.derived, 1);

        // Derived[] is assignable to Base[], the address is still refused
        assert_eq!(
            f.engine.element_address(Some(&arr), 0, f.base).err(),
            Some(CastError::TypeMismatch {
                element: f.derived,
                found: f.base
            })
        );
        assert_eq!(
            f.engine.element_address(Some(&arr), 3, f.sibling).err(),
            Some(CastError::OutOfBounds {
                index: 3,
                length: 1
            })
        );
        assert!(f.engine.element_address(Some(&arr), 0, f.derived).is_ok());
    }

    #[test]
    fn element_address_stores_are_checked() {
        let f = fixture();
        let arr = array(&f, f.base, 1);
        let address = f.engine.element_address(Some(&arr), 0, f.base).expect("exact type");

        assert_eq!(address.element_type(), f.base);
        address.store(Some(Object::new(f.derived))).expect("covariant store");
        assert_eq!(
            address.store(Some(Object::new(f.registry.object()))),
            Err(CastError::TypeMismatch {
                element: f.base,
                found: f.registry.object()
            })
        );
        let loaded = address.load().expect("stored");
        assert_eq!(loaded.type_handle(), f.derived);
        assert_eq!(f.barrier.stores(), 1);
    }
}
