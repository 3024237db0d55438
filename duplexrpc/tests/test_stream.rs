use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use duplexrpc::{
    Client, ClientConfig, Context, ErrorKind, Methods, ReaderParam, Router, Server, ServerConfig,
};
use serde_json::{Value, json};
use tokio::{io::AsyncReadExt, sync::Notify};
use uuid::Uuid;

fn router() -> Router {
    let mut router = Router::default();
    router
        .register(
            "Files",
            Methods::new().method(
                "Upload",
                |_: Context, (name, mut reader): (String, ReaderParam)| async move {
                    let mut content = String::new();
                    reader
                        .read_to_string(&mut content)
                        .await
                        .map_err(|e| duplexrpc::Error::application(20, e.to_string()))?;
                    Ok(format!("{name}: {content}"))
                },
            ),
        )
        .unwrap();
    router
}

async fn start(config: ServerConfig) -> (Server, String) {
    start_with(router(), config).await
}

async fn start_with(router: Router, config: ServerConfig) -> (Server, String) {
    let server = Server::create(router, &config).unwrap();
    let addr = SocketAddr::from_str("127.0.0.1:0").unwrap();
    let addr = server.listen(addr).await.unwrap();
    (server, format!("http://{addr}/rpc/v0"))
}

async fn wait_for_party(server: &Server) {
    while server.state().streams().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_post_before_call() {
    let (server, url) = start(ServerConfig::default()).await;
    let id = Uuid::new_v4();

    let upload = tokio::spawn({
        let url = format!("{url}/{id}");
        async move {
            reqwest::Client::new()
                .post(url)
                .body("early bytes")
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    wait_for_party(&server).await;

    let client = Client::new(&url, ClientConfig::default()).unwrap();
    let rsp: String = client
        .call("Files.Upload", vec![json!("a.txt"), json!(id)])
        .await
        .unwrap();
    assert_eq!(rsp, "a.txt: early bytes");
    assert_eq!(upload.await.unwrap(), 200);
    assert!(server.state().streams().is_empty());

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_post_after_call() {
    let (server, url) = start(ServerConfig::default()).await;
    let id = Uuid::new_v4();

    let call = tokio::spawn({
        let url = url.clone();
        async move {
            let client = Client::new(&url, ClientConfig::default()).unwrap();
            client
                .call::<String>("Files.Upload", vec![json!("b.txt"), json!(id)])
                .await
        }
    });
    wait_for_party(&server).await;

    let status = reqwest::Client::new()
        .post(format!("{url}/{id}"))
        .body("late bytes")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 200);
    assert_eq!(call.await.unwrap().unwrap(), "b.txt: late bytes");

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_reader_encoder() {
    let (server, url) = start(ServerConfig::default()).await;
    let client = Client::new(&url, ClientConfig::default()).unwrap();

    let payload = "x".repeat(256 * 1024);
    let id = client.reader_encoder().encode(std::io::Cursor::new(payload.clone()));
    let rsp: String = client
        .call("Files.Upload", vec![json!("big.bin"), json!(id)])
        .await
        .unwrap();
    assert_eq!(rsp, format!("big.bin: {payload}"));

    // the same method over a duplex connection.
    let peer = client.connect(Router::default()).await.unwrap();
    let id = client.reader_encoder().encode(&b"duplex bytes"[..]);
    let rsp: String = peer
        .call("Files.Upload", vec![json!("c.txt"), json!(id)])
        .await
        .unwrap();
    assert_eq!(rsp, "c.txt: duplex bytes");

    peer.close();
    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_cancelled_call_fails_post() {
    let config = ServerConfig {
        stream_timeout: Duration::from_millis(300),
        ..ServerConfig::default()
    };
    let (server, url) = start(config).await;
    let client = Client::new(&url, ClientConfig::default()).unwrap();
    let peer = client.connect(Router::default()).await.unwrap();
    let id = Uuid::new_v4();

    let call = tokio::spawn({
        let peer = peer.clone();
        async move {
            peer.call::<Value>("Files.Upload", vec![json!("d.txt"), json!(id)])
                .await
        }
    });
    wait_for_party(&server).await;

    // closing the connection cancels the waiting decode side.
    peer.close();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionClosed);
    while !server.state().streams().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let status = reqwest::Client::new()
        .post(format!("{url}/{id}"))
        .body("nobody reads this")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 500);
    assert!(server.state().streams().is_empty());

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_cancel_while_reading_fails_post() {
    let held = Arc::new(Notify::new());
    let mut router = Router::default();
    router
        .register(
            "Files",
            Methods::new().method("Hold", {
                let held = held.clone();
                move |ctx: Context, (reader,): (ReaderParam,)| {
                    let held = held.clone();
                    async move {
                        held.notify_one();
                        // keep the stream unread past the cancellation.
                        ctx.cancelled().await;
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        drop(reader);
                        Ok(())
                    }
                }
            }),
        )
        .unwrap();
    let (server, url) = start_with(router, ServerConfig::default()).await;
    let id = Uuid::new_v4();

    let upload = tokio::spawn({
        let url = format!("{url}/{id}");
        async move {
            reqwest::Client::new()
                .post(url)
                .body("never read")
                .send()
                .await
                .map(|rsp| rsp.status())
        }
    });
    let call = tokio::spawn({
        let url = url.clone();
        async move {
            let client = Client::new(&url, ClientConfig::default()).unwrap();
            client.call::<Value>("Files.Hold", vec![json!(id)]).await
        }
    });
    held.notified().await;
    assert!(server.state().streams().is_empty());

    // stopping cancels the POST after the handoff, while the stream is held.
    server.stop();
    assert_eq!(upload.await.unwrap().unwrap(), 500);
    server.join().await;
    let _ = call.await.unwrap();
}

#[tokio::test]
async fn test_stream_timeout() {
    let config = ServerConfig {
        stream_timeout: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let (server, url) = start(config).await;
    let client = Client::new(&url, ClientConfig::default()).unwrap();

    let err = client
        .call::<String>("Files.Upload", vec![json!("e.txt"), json!(Uuid::new_v4())])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
    assert!(err.msg.contains("Canceled"), "{err}");

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_malformed_id() {
    let (server, url) = start(ServerConfig::default()).await;

    let status = reqwest::Client::new()
        .post(format!("{url}/not-a-uuid"))
        .body("bytes")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, 400);

    let client = Client::new(&url, ClientConfig::default()).unwrap();
    let err = client
        .call::<String>("Files.Upload", vec![json!("f.txt"), json!("not-a-uuid")])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);

    server.stop();
    server.join().await;
}
