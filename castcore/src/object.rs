use std::{ptr, sync::Arc};

use parking_lot::RwLock;

use crate::TypeHandle;

pub type ObjectRef = Arc<Object>;

/// A managed object: its exact runtime type, plus element slots when that type is an array.
#[derive(Debug)]
pub struct Object {
    ty: TypeHandle,
    elements: Box<[ElementSlot]>,
}

/// One reference slot of an array.
#[derive(Debug, Default)]
pub struct ElementSlot(RwLock<Option<ObjectRef>>);

impl Object {
    pub fn new(ty: TypeHandle) -> ObjectRef {
        Arc::new(Self {
            ty,
            elements: Box::default(),
        })
    }

    /// Returns `None` if `array_type` is not an array type.
    pub fn new_array(array_type: TypeHandle, length: usize) -> Option<ObjectRef> {
        array_type.element()?;
        let elements = (0..length).map(|_| ElementSlot::default()).collect();
        Some(Arc::new(Self {
            ty: array_type,
            elements,
        }))
    }

    #[inline]
    pub fn type_handle(&self) -> TypeHandle {
        self.ty
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.ty.is_array()
    }

    /// Element count, zero for non-arrays.
    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element slots and the array's actual element type.
    #[inline]
    pub(crate) fn array_parts(&self) -> Option<(&[ElementSlot], TypeHandle)> {
        let element_type = self.ty.element()?;
        Some((&self.elements, element_type))
    }
}

impl ElementSlot {
    #[inline]
    pub fn load(&self) -> Option<ObjectRef> {
        self.0.read().clone()
    }

    /// Unchecked store, callers validate the value against the element type first.
    #[inline]
    pub(crate) fn write(&self, value: Option<ObjectRef>) {
        *self.0.write() = value;
    }

    /// Address handed to the write barrier.
    #[inline]
    pub fn address(&self) -> usize {
        ptr::from_ref(self) as usize
    }
}
