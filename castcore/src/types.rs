//! Type metadata as the cast engine sees it.
//!
//! TypeHandle: identity of a runtime type, compared by address only, never structurally.
//!
//! TypeDescriptor: the immutable facts the fast paths read (parent, flattened interface map,
//! array element, flags). Descriptors are leaked on creation, so a handle stays valid for the
//! whole process and its address is never handed to another type.
//!
//! TypeRegistry: builds descriptors. Loading real metadata is not this crate's business, the
//! registry exists so the engine can be driven end to end.
use std::{collections::HashMap, fmt, hash::Hash, ops::Deref, ptr};

use bitflags::bitflags;
use parking_lot::RwLock;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Array,
    GenericParameter,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct TypeFlags: u8 {
        /// absence from the interface map does not prove incompatibility
        const NON_TRIVIAL_INTERFACE_CAST = 1 << 0;
        /// identity is not the only form of sameness for this type
        const TYPE_EQUIVALENCE = 1 << 1;
        /// instantiation of a variant generic definition
        const VARIANT = 1 << 2;
        /// metadata still under construction, verdicts must not be memoized
        const PROVISIONAL = 1 << 3;
    }
}

#[derive(Debug)]
pub struct TypeDescriptor {
    name: Box<str>,
    kind: TypeKind,
    flags: TypeFlags,
    parent: Option<TypeHandle>,
    interfaces: Box<[TypeHandle]>,
    element: Option<TypeHandle>,
}

/// Identity of a runtime type.
#[derive(Clone, Copy)]
pub struct TypeHandle(&'static TypeDescriptor);

impl TypeDescriptor {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    #[inline]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    #[inline]
    pub fn parent(&self) -> Option<TypeHandle> {
        self.parent
    }

    /// Flattened interface map: inherited and transitively implemented interfaces included.
    #[inline]
    pub fn interfaces(&self) -> &[TypeHandle] {
        &self.interfaces
    }

    #[inline]
    pub fn element(&self) -> Option<TypeHandle> {
        self.element
    }

    #[inline]
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.kind == TypeKind::Array
    }

    #[inline]
    pub fn has_flags(&self, flags: TypeFlags) -> bool {
        self.flags.contains(flags)
    }
}

impl TypeHandle {
    fn leak(descriptor: TypeDescriptor) -> Self {
        Self(Box::leak(Box::new(descriptor)))
    }

    /// Address of the descriptor, never zero.
    #[inline]
    pub fn addr(self) -> usize {
        ptr::from_ref(self.0) as usize
    }

    #[inline]
    pub fn descriptor(self) -> &'static TypeDescriptor {
        self.0
    }
}

impl Deref for TypeHandle {
    type Target = TypeDescriptor;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl PartialEq for TypeHandle {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeHandle {}

impl Hash for TypeHandle {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHandle({}@{:#x})", self.name, self.addr())
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Owns the well known types and hands out new descriptors.
pub struct TypeRegistry {
    object: TypeHandle,
    array_base: TypeHandle,
    arrays: RwLock<HashMap<TypeHandle, TypeHandle, ahash::RandomState>>,
}

#[must_use]
pub struct TypeBuilder {
    name: String,
    kind: TypeKind,
    flags: TypeFlags,
    parent: Option<TypeHandle>,
    interfaces: Vec<TypeHandle>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let object = TypeHandle::leak(TypeDescriptor {
            name: "Object".into(),
            kind: TypeKind::Class,
            flags: TypeFlags::empty(),
            parent: None,
            interfaces: Box::default(),
            element: None,
        });
        let array_base = TypeHandle::leak(TypeDescriptor {
            name: "Array".into(),
            kind: TypeKind::Class,
            flags: TypeFlags::empty(),
            parent: Some(object),
            interfaces: Box::default(),
            element: None,
        });
        Self {
            object,
            array_base,
            arrays: RwLock::new(HashMap::default()),
        }
    }

    /// The universal reference type every class derives from.
    #[inline]
    pub fn object(&self) -> TypeHandle {
        self.object
    }

    /// Parent of every array type.
    #[inline]
    pub fn array_base(&self) -> TypeHandle {
        self.array_base
    }

    /// Class deriving from `Object` unless [`TypeBuilder::parent`] says otherwise.
    pub fn class(&self, name: &str) -> TypeBuilder {
        TypeBuilder::new(self.object, name, TypeKind::Class)
    }

    pub fn interface(&self, name: &str) -> TypeBuilder {
        TypeBuilder::new(self.object, name, TypeKind::Interface)
    }

    /// A naked generic type parameter, only the oracle can reason about it.
    pub fn generic_parameter(&self, name: &str) -> TypeBuilder {
        TypeBuilder::new(self.object, name, TypeKind::GenericParameter)
    }

    /// Single-dimensional reference array of `element`. Interned, so asking twice for the same
    /// element type yields the same handle.
    pub fn array_of(&self, element: TypeHandle) -> TypeHandle {
        if let Some(&array) = self.arrays.read().get(&element) {
            return array;
        }

        let mut arrays = self.arrays.write();
        *arrays.entry(element).or_insert_with(|| {
            TypeHandle::leak(TypeDescriptor {
                name: format!("{}[]", element.name()).into_boxed_str(),
                kind: TypeKind::Array,
                // arrays pick up generic collection interfaces through variance
                flags: TypeFlags::NON_TRIVIAL_INTERFACE_CAST,
                parent: Some(self.array_base),
                interfaces: self.array_base.interfaces().into(),
                element: Some(element),
            })
        })
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("object", &self.object)
            .field("array_base", &self.array_base)
            .field("arrays", &self.arrays.read().len())
            .finish()
    }
}

impl TypeBuilder {
    fn new(object: TypeHandle, name: &str, kind: TypeKind) -> Self {
        let parent = match kind {
            TypeKind::Interface => None,
            _ => Some(object),
        };
        Self {
            name: name.to_owned(),
            kind,
            flags: TypeFlags::empty(),
            parent,
            interfaces: Vec::new(),
        }
    }

    /// Ignored for interfaces, which have no parent.
    pub fn parent(mut self, parent: TypeHandle) -> Self {
        if self.kind != TypeKind::Interface {
            self.parent = Some(parent);
        }
        self
    }

    /// Implemented interfaces for classes, extended interfaces for interfaces.
    pub fn implements(mut self, interfaces: &[TypeHandle]) -> Self {
        self.interfaces.extend_from_slice(interfaces);
        self
    }

    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn build(self) -> TypeHandle {
        let mut map: Vec<TypeHandle> = self
            .parent
            .map(|parent| parent.interfaces().to_vec())
            .unwrap_or_default();

        for &declared in &self.interfaces {
            push_unique(&mut map, declared);
            for &inherited in declared.interfaces() {
                push_unique(&mut map, inherited);
            }
        }

        let mut flags = self.flags;
        let inherits_non_trivial = self
            .parent
            .is_some_and(|parent| parent.has_flags(TypeFlags::NON_TRIVIAL_INTERFACE_CAST));
        let has_variant_interface = map
            .iter()
            .any(|iface| iface.has_flags(TypeFlags::VARIANT));
        if inherits_non_trivial || has_variant_interface {
            flags |= TypeFlags::NON_TRIVIAL_INTERFACE_CAST;
        }

        TypeHandle::leak(TypeDescriptor {
            name: self.name.into_boxed_str(),
            kind: self.kind,
            flags,
            parent: self.parent,
            interfaces: map.into_boxed_slice(),
            element: None,
        })
    }
}

fn push_unique(map: &mut Vec<TypeHandle>, iface: TypeHandle) {
    if !map.contains(&iface) {
        map.push(iface);
    }
}
