use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

use indexmap::IndexMap;

/// Type-erased service instance handed to targets.
pub type Service = Arc<dyn Any + Send + Sync>;

/// A target's request for an injected service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    type_id: TypeId,
    type_name: &'static str,
    optional: bool,
}

impl Dependency {
    pub fn of<T: Any + Send + Sync>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            optional: false,
        }
    }

    /// An optional dependency resolves to nothing instead of failing the call.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

/// Service lookup supplied by the host application.
pub trait Services: Send + Sync {
    fn resolve(&self, dependency: &Dependency) -> Option<Service>;
}

/// Empty service provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServices;

impl Services for NoServices {
    fn resolve(&self, _dependency: &Dependency) -> Option<Service> {
        None
    }
}

/// Services keyed by concrete type.
#[derive(Clone, Default)]
pub struct ServiceMap {
    by_type: IndexMap<TypeId, Service>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.by_type.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    pub fn insert_arc<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> &mut Self {
        self.by_type.insert(TypeId::of::<T>(), value);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl Services for ServiceMap {
    fn resolve(&self, dependency: &Dependency) -> Option<Service> {
        self.by_type.get(&dependency.type_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock(u64);

    #[test]
    fn service_map_resolves_by_type() {
        let mut services = ServiceMap::new();
        services.insert(Clock(7));
        let found = services.resolve(&Dependency::of::<Clock>()).unwrap();
        assert_eq!(found.downcast::<Clock>().ok().map(|c| c.0), Some(7));
        assert!(services.resolve(&Dependency::of::<String>()).is_none());
        assert_eq!(services.get::<Clock>().map(|c| c.0), Some(7));
    }
}
