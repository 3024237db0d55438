use std::{
    net::SocketAddr,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use duplexrpc::{
    Client, ClientConfig, Context, Error, ErrorKind, Methods, Permissions, Router, Server,
    ServerConfig,
};
use serde_json::{Value, json};

async fn start() -> (Server, String, Arc<AtomicUsize>) {
    let invoked = Arc::new(AtomicUsize::new(0));
    let mut router = Router::default();
    router
        .register(
            "Auth",
            Methods::new().method("Whoami", {
                let invoked = invoked.clone();
                move |ctx: Context, (): ()| {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(ctx.permissions().cloned()) }
                }
            }),
        )
        .unwrap();

    let server = Server::builder(router, ServerConfig::default())
        .with_verifier(|token: String| async move {
            match token.as_str() {
                "abc" => Ok(Permissions::from(["read".to_string()])),
                _ => Err(Error::new(ErrorKind::Unauthorized, "unknown token".into())),
            }
        })
        .build()
        .unwrap();
    let addr = SocketAddr::from_str("127.0.0.1:0").unwrap();
    let addr = server.listen(addr).await.unwrap();
    (server, format!("http://{addr}/rpc/v0"), invoked)
}

async fn whoami(url: &str, authorization: Option<&str>) -> reqwest::Response {
    let mut req = reqwest::Client::new()
        .post(url)
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "Auth.Whoami", "params": []}));
    if let Some(value) = authorization {
        req = req.header("Authorization", value);
    }
    req.send().await.unwrap()
}

#[tokio::test]
async fn test_bearer_token() {
    let (server, url, invoked) = start().await;

    let rsp = whoami(&url, Some("Bearer abc")).await;
    assert_eq!(rsp.status(), 200);
    let body: Value = rsp.json().await.unwrap();
    assert_eq!(body["result"], json!(["read"]));

    let rsp = whoami(&url, None).await;
    assert_eq!(rsp.status(), 200);
    let body: Value = rsp.json().await.unwrap();
    assert_eq!(body["result"], Value::Null);
    assert_eq!(invoked.load(Ordering::SeqCst), 2);

    let rsp = whoami(&format!("{url}?token=abc"), None).await;
    let body: Value = rsp.json().await.unwrap();
    assert_eq!(body["result"], json!(["read"]));

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_rejected_tokens() {
    let (server, url, invoked) = start().await;

    let rsp = whoami(&url, Some("abc")).await;
    assert_eq!(rsp.status(), 401);
    let rsp = whoami(&url, Some("Bearer nope")).await;
    assert_eq!(rsp.status(), 401);
    let rsp = whoami(&format!("{url}?token=nope"), None).await;
    assert_eq!(rsp.status(), 401);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_client_token() {
    let (server, url, _) = start().await;

    let config = ClientConfig {
        token: Some("abc".into()),
        ..ClientConfig::default()
    };
    let client = Client::new(&url, config).unwrap();
    let permissions: Option<Permissions> = client.call("Auth.Whoami", vec![]).await.unwrap();
    assert_eq!(permissions, Some(Permissions::from(["read".to_string()])));

    let peer = client.connect(Router::default()).await.unwrap();
    let permissions: Option<Permissions> = peer.call("Auth.Whoami", vec![]).await.unwrap();
    assert_eq!(permissions, Some(Permissions::from(["read".to_string()])));
    peer.close();

    let config = ClientConfig {
        token: Some("nope".into()),
        ..ClientConfig::default()
    };
    let client = Client::new(&url, config).unwrap();
    let err = client.call::<Value>("Auth.Whoami", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::HttpStatus(401));
    let err = client.connect(Router::default()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::WebSocketConnectFailed);

    server.stop();
    server.join().await;
}
