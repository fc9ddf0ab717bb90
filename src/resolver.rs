//! Dependency resolution for consumers and filters.
//!
//! The bus never constructs resolved consumers itself: it asks a
//! [`DependencyResolver`] for a fresh [`ResolverScope`] per message and
//! resolves by type from that scope, so state is never shared between
//! concurrent invocations. [`ServiceRegistry`] is a small reference
//! implementation; any container can plug in by implementing the two traits.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

type Instance = Arc<dyn Any + Send + Sync>;
type ScopedFactory = Arc<dyn Fn(&dyn ResolverScope) -> Instance + Send + Sync>;

/// Creates resolution scopes.
pub trait DependencyResolver: Send + Sync {
    fn create_scope(&self) -> Box<dyn ResolverScope>;
}

/// Resolves instances by type for the lifetime of one scope.
pub trait ResolverScope: Send + Sync {
    fn resolve_any(&self, type_id: TypeId) -> Option<Instance>;
}

impl dyn ResolverScope + '_ {
    /// Resolve an instance of `T`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resolve_any(TypeId::of::<T>())
            .and_then(|instance| instance.downcast::<T>().ok())
    }
}

#[derive(Clone)]
enum Registration {
    Singleton(Instance),
    Scoped(ScopedFactory),
}

/// Registry of singleton instances and per-scope factories.
///
/// ## Example
///
/// ```ignore
/// let registry = ServiceRegistry::new()
///     .with_singleton(PricingClient::new(url))
///     .with_scoped(|scope| SubmitOrderConsumer::new(scope.resolve::<PricingClient>()));
/// let bus = BusBuilder::new(transport).with_resolver(registry).build();
/// ```
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    registrations: Arc<HashMap<TypeId, Registration>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one shared instance for every scope.
    pub fn with_singleton<T: Any + Send + Sync>(self, instance: T) -> Self {
        self.register::<T>(Registration::Singleton(Arc::new(instance)))
    }

    /// Register a factory run at most once per scope.
    pub fn with_scoped<T, F>(self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn ResolverScope) -> T + Send + Sync + 'static,
    {
        self.register::<T>(Registration::Scoped(Arc::new(move |scope| {
            Arc::new(factory(scope)) as Instance
        })))
    }

    /// Whether `T` has a registration.
    pub fn contains<T: Any>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    fn register<T: Any>(self, registration: Registration) -> Self {
        let mut registrations = Arc::unwrap_or_clone(self.registrations);
        registrations.insert(TypeId::of::<T>(), registration);
        Self {
            registrations: Arc::new(registrations),
        }
    }
}

impl DependencyResolver for ServiceRegistry {
    fn create_scope(&self) -> Box<dyn ResolverScope> {
        Box::new(RegistryScope {
            registrations: Arc::clone(&self.registrations),
            instances: Mutex::new(HashMap::new()),
        })
    }
}

struct RegistryScope {
    registrations: Arc<HashMap<TypeId, Registration>>,
    instances: Mutex<HashMap<TypeId, Instance>>,
}

impl ResolverScope for RegistryScope {
    fn resolve_any(&self, type_id: TypeId) -> Option<Instance> {
        match self.registrations.get(&type_id)? {
            Registration::Singleton(instance) => Some(Arc::clone(instance)),
            Registration::Scoped(factory) => {
                if let Some(instance) = self.instances.lock().get(&type_id) {
                    return Some(Arc::clone(instance));
                }
                // Factories may resolve their own dependencies, so the lock is
                // not held while one runs.
                let created = factory(self);
                Some(Arc::clone(
                    self.instances.lock().entry(type_id).or_insert(created),
                ))
            }
        }
    }
}
