use std::collections::BTreeMap;

use serde::Serialize;

use crate::{MethodInfo, Methods, Result, Router};

/// Result of `rpc.listMethods`.
#[derive(Debug, Serialize)]
pub struct MethodList {
    pub methods: BTreeMap<String, MethodInfo>,
    pub aliases: BTreeMap<String, String>,
}

impl MethodList {
    /// Name the listing is served under.
    pub const METHOD: &'static str = "rpc.listMethods";

    #[must_use]
    pub fn of(router: &Router) -> Self {
        Self {
            methods: router
                .method_names()
                .filter_map(|name| Some((name.clone(), router.method_info(name)?.clone())))
                .collect(),
            aliases: router
                .aliases()
                .map(|(alias, original)| (alias.clone(), original.clone()))
                .collect(),
        }
    }
}

pub(crate) fn register(router: &mut Router) -> Result<()> {
    router.register(
        "rpc",
        Methods::new().method("listMethods", |ctx, (): ()| async move {
            Ok(MethodList::of(&ctx.state.router))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, ServerConfig, State};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_methods() {
        let mut router = Router::default();
        router
            .register(
                "Math",
                Methods::new().method("Add", |_, (a, b): (i64, i64)| async move { Ok(a + b) }),
            )
            .unwrap();
        router.alias_method("Math.Plus", "Math.Add").unwrap();
        register(&mut router).unwrap();

        let state = Arc::new(State::new(router, ServerConfig::default()));
        let list = state
            .router
            .dispatch(Context::new(state.clone()), "rpc.listMethods", vec![])
            .await
            .unwrap();
        assert_eq!(
            list["methods"]["Math.Add"],
            json!({"params": ["i64", "i64"], "result": "i64"})
        );
        assert_eq!(list["aliases"], json!({"Math.Plus": "Math.Add"}));
        assert!(list["methods"]["rpc.listMethods"].is_object());
    }
}
