//! Method registration and resolution.
//!
//! A [`MethodTable`] is the explicit name → method table the host builds.
//! The [`MethodRegistry`] sits in front of any [`Service`] and caches
//! successful lookups for its lifetime:
//!
//! ```ignore
//! let table = Arc::new(MethodTable::new());
//! table.register("sum", |a: i64, b: i64| Ok::<_, MethodError>(a + b))?;
//! table.register_async("sleep", |ms: u64| async move {
//!     tokio::time::sleep(Duration::from_millis(ms)).await;
//!     Ok::<_, MethodError>(ms)
//! })?;
//!
//! let registry = MethodRegistry::new(table.clone());
//! let sum = registry.resolve("sum")?;
//! ```

use crate::error::{MethodError, RpcError, ServerError};
use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// An invocable method.
pub trait Method: Send + Sync + 'static {
    /// Invokes the method with positional parameters.
    ///
    /// No work happens until the returned future is polled.
    fn call(&self, params: Vec<Value>) -> BoxFuture<'_, Result<Value, MethodError>>;
}

/// A source of methods, looked up by name.
pub trait Service: Send + Sync + 'static {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Method>>;
}

impl<S: Service + ?Sized> Service for Arc<S> {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Method>> {
        (**self).lookup(name)
    }
}

/// Checks that a name can be registered.
pub fn is_valid_method_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('_')
}

/// Positional argument reader used by the typed adapters.
struct Params {
    values: std::vec::IntoIter<Value>,
    index: usize,
}

impl Params {
    fn new(params: Vec<Value>, expected: usize) -> Result<Self, MethodError> {
        if params.len() != expected {
            return Err(MethodError(format!(
                "expected {} arguments, got {}",
                expected,
                params.len()
            )));
        }
        Ok(Self {
            values: params.into_iter(),
            index: 0,
        })
    }

    fn next<A: DeserializeOwned>(&mut self) -> Result<A, MethodError> {
        let index = self.index;
        self.index += 1;
        let value = self
            .values
            .next()
            .ok_or_else(|| MethodError(format!("missing argument {}", index)))?;
        rmpv::ext::from_value(value)
            .map_err(|e| MethodError(format!("invalid argument {}: {}", index, e)))
    }
}

fn encode_result<T, E>(result: Result<T, E>) -> Result<Value, MethodError>
where
    T: Serialize,
    E: fmt::Display,
{
    let value = result.map_err(|e| MethodError(e.to_string()))?;
    rmpv::ext::to_value(value)
        .map_err(|e| MethodError(format!("failed to encode result: {}", e)))
}

/// A plain function usable as a method, with its argument list as `Args`.
pub trait Handler<Args>: Send + Sync + 'static {
    fn invoke(&self, params: Vec<Value>) -> Result<Value, MethodError>;
}

/// An async function usable as a method, with its argument list as `Args`.
pub trait AsyncHandler<Args>: Send + Sync + 'static {
    fn invoke(&self, params: Vec<Value>) -> BoxFuture<'static, Result<Value, MethodError>>;
}

macro_rules! one {
    ($arg:ident) => {
        1
    };
}

macro_rules! impl_handlers {
    ($($arg:ident),*) => {
        impl<F, T, E, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Result<T, E> + Send + Sync + 'static,
            T: Serialize,
            E: fmt::Display,
            $($arg: DeserializeOwned,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, params: Vec<Value>) -> Result<Value, MethodError> {
                let mut args = Params::new(params, 0 $(+ one!($arg))*)?;
                $(let $arg: $arg = args.next()?;)*
                encode_result((self)($($arg),*))
            }
        }

        impl<F, Fut, T, E, $($arg,)*> AsyncHandler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, E>> + Send + 'static,
            T: Serialize + 'static,
            E: fmt::Display + 'static,
            $($arg: DeserializeOwned,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, params: Vec<Value>) -> BoxFuture<'static, Result<Value, MethodError>> {
                let prepared = (|| -> Result<Fut, MethodError> {
                    let mut args = Params::new(params, 0 $(+ one!($arg))*)?;
                    $(let $arg: $arg = args.next()?;)*
                    Ok((self)($($arg),*))
                })();
                match prepared {
                    Ok(fut) => async move { encode_result(fut.await) }.boxed(),
                    Err(e) => future::ready(Err(e)).boxed(),
                }
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A1);
impl_handlers!(A1, A2);
impl_handlers!(A1, A2, A3);
impl_handlers!(A1, A2, A3, A4);
impl_handlers!(A1, A2, A3, A4, A5);
impl_handlers!(A1, A2, A3, A4, A5, A6);

struct SyncFn<F, Args> {
    f: F,
    _args: PhantomData<fn(Args)>,
}

impl<F, Args> Method for SyncFn<F, Args>
where
    F: Handler<Args>,
    Args: 'static,
{
    fn call(&self, params: Vec<Value>) -> BoxFuture<'_, Result<Value, MethodError>> {
        async move { self.f.invoke(params) }.boxed()
    }
}

struct AsyncFn<F, Args> {
    f: F,
    _args: PhantomData<fn(Args)>,
}

impl<F, Args> Method for AsyncFn<F, Args>
where
    F: AsyncHandler<Args>,
    Args: 'static,
{
    fn call(&self, params: Vec<Value>) -> BoxFuture<'_, Result<Value, MethodError>> {
        async move { self.f.invoke(params).await }.boxed()
    }
}

struct RawFn<F>(F);

impl<F> Method for RawFn<F>
where
    F: Fn(Vec<Value>) -> Result<Value, MethodError> + Send + Sync + 'static,
{
    fn call(&self, params: Vec<Value>) -> BoxFuture<'_, Result<Value, MethodError>> {
        async move { (self.0)(params) }.boxed()
    }
}

/// Name → method table built by the host.
///
/// Registration takes `&self`, so methods can be added while connections
/// are being served.
#[derive(Default)]
pub struct MethodTable {
    methods: RwLock<HashMap<String, Arc<dyn Method>>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function taking typed positional arguments.
    pub fn register<F, Args>(&self, name: impl Into<String>, f: F) -> Result<(), ServerError>
    where
        F: Handler<Args>,
        Args: 'static,
    {
        self.register_method(
            name,
            Arc::new(SyncFn {
                f,
                _args: PhantomData,
            }),
        )
    }

    /// Registers an async function taking typed positional arguments.
    pub fn register_async<F, Args>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<(), ServerError>
    where
        F: AsyncHandler<Args>,
        Args: 'static,
    {
        self.register_method(
            name,
            Arc::new(AsyncFn {
                f,
                _args: PhantomData,
            }),
        )
    }

    /// Registers a function receiving the raw parameter list.
    pub fn register_raw<F>(&self, name: impl Into<String>, f: F) -> Result<(), ServerError>
    where
        F: Fn(Vec<Value>) -> Result<Value, MethodError> + Send + Sync + 'static,
    {
        self.register_method(name, Arc::new(RawFn(f)))
    }

    /// Registers a method object, replacing any previous entry.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        method: Arc<dyn Method>,
    ) -> Result<(), ServerError> {
        let name = name.into();
        if !is_valid_method_name(&name) {
            return Err(ServerError::InvalidMethodName(name));
        }
        tracing::debug!("Registered method {}", name);
        self.methods.write().insert(name, method);
        Ok(())
    }

    /// Removes a method. Registries that already resolved it keep their copy.
    pub fn unregister(&self, name: &str) -> bool {
        self.methods.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}

impl Service for MethodTable {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.read().get(name).cloned()
    }
}

/// Resolves method names through a [`Service`], caching every hit.
///
/// Cached entries are never invalidated. Misses are not cached, so a
/// method added to the service later becomes reachable on the next call.
/// Concurrent resolutions of the same new name keep whichever entry was
/// inserted first.
pub struct MethodRegistry {
    service: Arc<dyn Service>,
    cache: DashMap<String, Arc<dyn Method>>,
}

impl MethodRegistry {
    pub fn new(service: impl Service) -> Self {
        Self {
            service: Arc::new(service),
            cache: DashMap::new(),
        }
    }

    /// Resolves `name` to a method.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Method>, RpcError> {
        if let Some(method) = self.cache.get(name) {
            return Ok(method.value().clone());
        }

        // Underscore names are private to the host.
        if name.starts_with('_') {
            return Err(RpcError::MethodNotFound(name.to_string()));
        }

        let method = self
            .service
            .lookup(name)
            .ok_or_else(|| RpcError::MethodNotFound(name.to_string()))?;

        let entry = self.cache.entry(name.to_string()).or_insert(method);
        Ok(entry.value().clone())
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Returns the number of cached methods.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
