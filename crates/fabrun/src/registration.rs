//! # Component Registrations
//!
//! A `Registration` is the immutable static description of one component:
//! its qualified name, interface identity, methods, routing declaration,
//! declared capabilities, and the glue that builds local implementations,
//! client handles, and server stubs.
//!
//! Registrations are assembled with `RegistrationBuilder`. `build()` rejects
//! anything structurally inconsistent, so a published registration is
//! always well formed.

use std::any::Any;
use std::any::TypeId;
use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::config::ComponentConfig;
use crate::config::ConfigDecl;
use crate::context::InitContext;
use crate::dispatch::Dispatcher;
use crate::error;
use crate::registry::Error;
use crate::registry::Result;
use crate::routing::Key;
use crate::routing::Router;
use crate::stub::ServerStub;

/// Runtime identity of a Rust type, with a readable name for diagnostics.
#[derive(Copy, Clone, Debug)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl std::hash::Hash for TypeTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A type-erased `Arc<I>`, where `I` is the component interface.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) type FactoryFn =
    Arc<dyn Fn(InitContext) -> BoxFuture<'static, error::Result<Instance>> + Send + Sync>;
pub(crate) type HandleFn = Arc<dyn Fn(Dispatcher) -> Instance + Send + Sync>;
pub(crate) type ServerFn = Arc<dyn Fn(&Instance) -> Option<Arc<dyn ServerStub>> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDesc {
    pub name: String,
    /// Present iff the method is routed.
    pub key_type: Option<TypeTag>,
}

impl MethodDesc {
    pub fn is_routed(&self) -> bool {
        self.key_type.is_some()
    }
}

/// The mandatory routing declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routing {
    Routed { router: TypeTag, key_type: TypeTag },
    Unrouted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerDecl {
    /// The implementation field the listener is bound into.
    pub field: String,
    /// The configured name, unique across a registry.
    pub name: String,
}

pub struct Registration {
    pub(crate) name: String,
    pub(crate) iface: TypeTag,
    pub(crate) implementation: String,
    pub(crate) methods: Vec<MethodDesc>,
    pub(crate) routing: Routing,
    pub(crate) refs: Vec<String>,
    pub(crate) listeners: Vec<ListenerDecl>,
    pub(crate) config: Option<ConfigDecl>,
    pub(crate) factory: FactoryFn,
    pub(crate) handle: HandleFn,
    pub(crate) server: ServerFn,
}

impl Registration {
    /// Starts a registration for interface `I` (typically `dyn Trait`).
    pub fn builder<I: ?Sized + Send + Sync + 'static>(
        name: impl Into<String>,
    ) -> RegistrationBuilder<I> {
        RegistrationBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iface(&self) -> TypeTag {
        self.iface
    }

    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    pub fn methods(&self) -> &[MethodDesc] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&MethodDesc> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn is_routed(&self) -> bool {
        matches!(self.routing, Routing::Routed { .. })
    }

    pub fn refs(&self) -> &[String] {
        &self.refs
    }

    pub fn listeners(&self) -> &[ListenerDecl] {
        &self.listeners
    }

    pub fn config(&self) -> Option<&ConfigDecl> {
        self.config.as_ref()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("iface", &self.iface.name())
            .field("implementation", &self.implementation)
            .field("methods", &self.methods)
            .field("routing", &self.routing)
            .field("refs", &self.refs)
            .field("listeners", &self.listeners)
            .finish()
    }
}

/// Fluent builder for a `Registration` of interface `I`.
pub struct RegistrationBuilder<I: ?Sized> {
    name: String,
    implementation: Option<String>,
    methods: Vec<MethodDesc>,
    routing: Option<Routing>,
    refs: Vec<String>,
    listeners: Vec<ListenerDecl>,
    config: Option<ConfigDecl>,
    factory: Option<FactoryFn>,
    handle: Option<HandleFn>,
    server: Option<ServerFn>,
    _iface: PhantomData<fn() -> Box<I>>,
}

impl<I: ?Sized + Send + Sync + 'static> RegistrationBuilder<I> {
    fn new(name: String) -> Self {
        Self {
            name,
            implementation: None,
            methods: Vec::new(),
            routing: None,
            refs: Vec::new(),
            listeners: Vec::new(),
            config: None,
            factory: None,
            handle: None,
            server: None,
            _iface: PhantomData,
        }
    }

    /// Names the implementation type, for diagnostics.
    pub fn implementation(mut self, name: impl Into<String>) -> Self {
        self.implementation = Some(name.into());
        self
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodDesc {
            name: name.into(),
            key_type: None,
        });
        self
    }

    /// Declares a method whose calls are steered by a key of type `K`.
    pub fn routed_method<K: Key>(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodDesc {
            name: name.into(),
            key_type: Some(K::key_type()),
        });
        self
    }

    pub fn routed<R: Router>(mut self) -> Self {
        self.routing = Some(Routing::Routed {
            router: TypeTag::of::<R>(),
            key_type: <R::Key as Key>::key_type(),
        });
        self
    }

    pub fn unrouted(mut self) -> Self {
        self.routing = Some(Routing::Unrouted);
        self
    }

    /// Declares a dependency on another component by qualified name.
    pub fn reference(mut self, component: impl Into<String>) -> Self {
        self.refs.push(component.into());
        self
    }

    /// Declares a listener named after its field.
    pub fn listener(self, field: impl Into<String>) -> Self {
        let field = field.into();
        let name = field.clone();
        self.listener_named(field, name)
    }

    pub fn listener_named(mut self, field: impl Into<String>, name: impl Into<String>) -> Self {
        self.listeners.push(ListenerDecl {
            field: field.into(),
            name: name.into(),
        });
        self
    }

    pub fn config<C: ComponentConfig>(mut self) -> Self {
        self.config = Some(ConfigDecl::of::<C>());
        self
    }

    /// Sets the constructor of the local implementation.
    pub fn factory<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(InitContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = error::Result<Arc<I>>> + Send + 'static,
    {
        self.factory = Some(Arc::new(move |ctx| {
            factory(ctx)
                .map(|r| r.map(|imp| Arc::new(imp) as Instance))
                .boxed()
        }));
        self
    }

    /// Sets the constructor of the caller-facing handle.
    pub fn handle<H>(mut self, handle: H) -> Self
    where
        H: Fn(Dispatcher) -> Arc<I> + Send + Sync + 'static,
    {
        self.handle = Some(Arc::new(move |d| Arc::new(handle(d)) as Instance));
        self
    }

    /// Sets the constructor of the server stub that decodes remote calls.
    pub fn server<S>(mut self, server: S) -> Self
    where
        S: Fn(Arc<I>) -> Arc<dyn ServerStub> + Send + Sync + 'static,
    {
        self.server = Some(Arc::new(move |instance: &Instance| {
            instance.downcast_ref::<Arc<I>>().map(|imp| server(imp.clone()))
        }));
        self
    }

    pub fn build(self) -> Result<Registration> {
        let name = self.name;
        let invalid = |reason: String| Error::Invalid {
            name: name.clone(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("empty component name".into()));
        }
        let routing = self.routing.ok_or_else(|| Error::MissingRouting(name.clone()))?;
        let factory = self.factory.ok_or_else(|| Error::MissingFactory(name.clone()))?;
        let handle = self
            .handle
            .ok_or_else(|| invalid("no handle constructor".into()))?;
        let server = self
            .server
            .ok_or_else(|| invalid("no server stub constructor".into()))?;

        let mut seen = HashSet::new();
        for m in &self.methods {
            if !seen.insert(m.name.as_str()) {
                return Err(invalid(format!("duplicate method {}", m.name)));
            }
        }

        match &routing {
            Routing::Unrouted => {
                if let Some(m) = self.methods.iter().find(|m| m.is_routed()) {
                    return Err(invalid(format!(
                        "method {} is routed but the component is unrouted",
                        m.name
                    )));
                }
            }
            Routing::Routed { router, key_type } => {
                let routed: Vec<&MethodDesc> =
                    self.methods.iter().filter(|m| m.is_routed()).collect();
                if routed.is_empty() {
                    return Err(invalid(format!(
                        "router {} declared but no method is routed",
                        router
                    )));
                }
                for m in routed {
                    if m.key_type.as_ref() != Some(key_type) {
                        return Err(invalid(format!(
                            "method {} routes on {} but router {} produces {}",
                            m.name,
                            m.key_type.map(|k| k.name()).unwrap_or("nothing"),
                            router,
                            key_type
                        )));
                    }
                }
            }
        }

        let mut listener_names = HashSet::new();
        for l in &self.listeners {
            if !listener_names.insert(l.name.as_str()) {
                return Err(invalid(format!("duplicate listener {}", l.name)));
            }
        }

        let mut ref_names = HashSet::new();
        for r in &self.refs {
            if !ref_names.insert(r.as_str()) {
                return Err(invalid(format!("duplicate reference {}", r)));
            }
        }

        Ok(Registration {
            implementation: self
                .implementation
                .unwrap_or_else(|| std::any::type_name::<I>().to_string()),
            iface: TypeTag::of::<I>(),
            methods: self.methods,
            routing,
            refs: self.refs,
            listeners: self.listeners,
            config: self.config,
            factory,
            handle,
            server,
            name,
        })
    }
}
