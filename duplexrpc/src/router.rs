use foldhash::fast::RandomState;
use futures_util::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{collections::HashMap, future::Future, sync::Arc};

use crate::{
    Context,
    error::{Error, ErrorKind, Result},
};

/// Decodes one positional parameter.
///
/// Every `serde` deserializable type decodes straight from its JSON value.
/// Other implementors (such as [`ReaderParam`](crate::ReaderParam)) may
/// suspend until the value becomes available, honoring the context's
/// cancellation.
pub trait FromParam: Sized + Send {
    fn from_param(ctx: &Context, value: Value) -> impl Future<Output = Result<Self>> + Send;
}

impl<T: DeserializeOwned + Send> FromParam for T {
    fn from_param(_: &Context, value: Value) -> impl Future<Output = Result<Self>> + Send {
        async move { Ok(serde_json::from_value(value)?) }
    }
}

/// The full positional parameter list of a method, as a tuple of
/// [`FromParam`] types.
pub trait FromParams: Sized + Send {
    /// Type names of the parameters, in order.
    fn shapes() -> Vec<&'static str>;

    fn from_params(ctx: &Context, params: Vec<Value>)
    -> impl Future<Output = Result<Self>> + Send;
}

macro_rules! impl_from_params {
    ($($ty:ident),*) => {
        impl<$($ty: FromParam),*> FromParams for ($($ty,)*) {
            fn shapes() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$ty>()),*]
            }

            #[allow(unused_mut, unused_variables)]
            fn from_params(
                ctx: &Context,
                params: Vec<Value>,
            ) -> impl Future<Output = Result<Self>> + Send {
                async move {
                    let expected = Self::shapes().len();
                    if params.len() != expected {
                        return Err(Error::new(
                            ErrorKind::InvalidParams,
                            format!("expected {expected} params, got {}", params.len()),
                        ));
                    }
                    let mut params = params.into_iter();
                    Ok(($(
                        <$ty as FromParam>::from_param(ctx, params.next().unwrap_or_default()).await?,
                    )*))
                }
            }
        }
    };
}

impl_from_params!();
impl_from_params!(A);
impl_from_params!(A, B);
impl_from_params!(A, B, C);
impl_from_params!(A, B, C, D);
impl_from_params!(A, B, C, D, E);
impl_from_params!(A, B, C, D, E, F);
impl_from_params!(A, B, C, D, E, F, G);
impl_from_params!(A, B, C, D, E, F, G, H);

pub type Method = Box<dyn Fn(Context, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Declared shape of a registered method.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub params: Vec<&'static str>,
    pub result: &'static str,
}

struct MethodEntry {
    info: MethodInfo,
    invoke: Method,
}

/// The handler methods of one namespace, declared explicitly.
///
/// ```rust
/// # use duplexrpc::{Methods, Router};
/// let mut router = Router::default();
/// router
///     .register(
///         "Math",
///         Methods::new().method("Add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) }),
///     )
///     .unwrap();
/// ```
#[derive(Default)]
pub struct Methods {
    entries: Vec<(String, MethodEntry)>,
}

impl Methods {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method taking its positional parameters as a tuple.
    #[must_use]
    pub fn method<P, R, F, Fut>(mut self, name: &str, func: F) -> Self
    where
        P: FromParams + 'static,
        R: Serialize + 'static,
        F: Fn(Context, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let func = Arc::new(func);
        let invoke: Method = Box::new(move |ctx, params| {
            let func = func.clone();
            Box::pin(async move {
                let params = P::from_params(&ctx, params)
                    .await
                    .map_err(|e| match e.kind {
                        ErrorKind::InvalidParams => e,
                        _ => Error::new(ErrorKind::InvalidParams, e.to_string()),
                    })?;
                let rsp = func(ctx, params).await?;
                Ok(serde_json::to_value(rsp)?)
            })
        });

        let info = MethodInfo {
            params: P::shapes(),
            result: std::any::type_name::<R>(),
        };
        self.entries
            .push((name.to_string(), MethodEntry { info, invoke }));
        self
    }
}

/// Method registry: maps `Namespace.Method` to typed handlers.
///
/// Built once before serving; read-only afterwards, so dispatch needs no
/// locking.
#[derive(Default)]
pub struct Router {
    methods: HashMap<String, MethodEntry, RandomState>,
    aliases: HashMap<String, String, RandomState>,
}

impl Router {
    /// Registers every method of `methods` under `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateMethod` if any `(namespace, name)` is already taken;
    /// the registry is left untouched in that case.
    pub fn register(&mut self, namespace: &str, methods: Methods) -> Result<()> {
        let mut seen = std::collections::HashSet::<&str, RandomState>::default();
        for (name, _) in &methods.entries {
            let full_name = format!("{namespace}.{name}");
            if !seen.insert(name.as_str())
                || self.methods.contains_key(&full_name)
                || self.aliases.contains_key(&full_name)
            {
                return Err(Error::new(
                    ErrorKind::DuplicateMethod,
                    format!("method already registered: {full_name}"),
                ));
            }
        }

        for (name, entry) in methods.entries {
            let full_name = format!("{namespace}.{name}");
            tracing::debug!(method = %full_name, params = ?entry.info.params, "registered method");
            self.methods.insert(full_name, entry);
        }
        Ok(())
    }

    /// Makes `alias` dispatch to the already registered `original`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAlias` if `original` is not a registered method, and
    /// `DuplicateMethod` if `alias` already names a method or alias.
    pub fn alias_method(&mut self, alias: &str, original: &str) -> Result<()> {
        if !self.methods.contains_key(original) {
            return Err(Error::new(
                ErrorKind::UnknownAlias,
                format!("alias target not registered: {original}"),
            ));
        }
        if self.methods.contains_key(alias) || self.aliases.contains_key(alias) {
            return Err(Error::new(
                ErrorKind::DuplicateMethod,
                format!("alias name already taken: {alias}"),
            ));
        }
        self.aliases.insert(alias.to_string(), original.to_string());
        Ok(())
    }

    pub fn method_names(&self) -> impl Iterator<Item = &String> {
        self.methods.keys()
    }

    #[must_use]
    pub fn method_info(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.get(self.resolve(name)).map(|entry| &entry.info)
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&String, &String)> {
        self.aliases.iter()
    }

    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map_or(name, String::as_str)
    }

    /// Decodes `params`, invokes the handler and encodes its result.
    ///
    /// # Errors
    ///
    /// `MethodNotFound` for unknown names, `InvalidParams` for decode
    /// failures, and the handler's own error otherwise.
    pub async fn dispatch(&self, ctx: Context, method: &str, params: Vec<Value>) -> Result<Value> {
        let Some(entry) = self.methods.get(self.resolve(method)) else {
            return Err(Error::new(
                ErrorKind::MethodNotFound,
                format!("method not found: {method}"),
            ));
        };
        (entry.invoke)(ctx, params).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods.keys())
            .field("aliases", &self.aliases)
            .finish()
    }
}
