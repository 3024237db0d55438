use futures_util::future::BoxFuture;
use hyper::{
    Request,
    header::{AUTHORIZATION, HeaderValue},
};

use crate::{Error, ErrorKind, Permissions, Result};

const BEARER: &str = "Bearer ";

/// Maps a bearer token to the permissions it grants.
pub trait Verifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<Permissions>>;
}

impl<F, Fut> Verifier for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Permissions>> + Send + 'static,
{
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<Permissions>> {
        Box::pin(self(token.to_string()))
    }
}

/// Resolves the permissions of `req`.
///
/// A `token` query parameter stands in for a missing or empty
/// `Authorization` header and is rewritten into it. No token at all yields
/// `None`.
///
/// # Errors
///
/// `Unauthorized` if the header lacks the `Bearer ` prefix or the verifier
/// rejects the token.
pub(crate) async fn authenticate<B>(
    verifier: &dyn Verifier,
    req: &mut Request<B>,
) -> Result<Option<Permissions>> {
    // an empty header counts as absent.
    if req
        .headers()
        .get(AUTHORIZATION)
        .is_some_and(HeaderValue::is_empty)
    {
        req.headers_mut().remove(AUTHORIZATION);
    }
    if !req.headers().contains_key(AUTHORIZATION)
        && let Some(token) = query_token(req.uri().query())
    {
        let value = HeaderValue::from_str(&format!("{BEARER}{token}"))
            .map_err(|e| Error::new(ErrorKind::Unauthorized, e.to_string()))?;
        req.headers_mut().insert(AUTHORIZATION, value);
    }

    let Some(value) = req.headers().get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix(BEARER))
        .ok_or_else(|| Error::new(ErrorKind::Unauthorized, "missing bearer prefix".into()))?;

    verifier
        .verify(token)
        .await
        .map(Some)
        .map_err(|e| Error::new(ErrorKind::Unauthorized, e.to_string()))
}

fn query_token(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> impl Verifier {
        |token: String| async move {
            if token == "abc" {
                Ok(Permissions::from(["read".to_string()]))
            } else {
                Err(Error::new(ErrorKind::Unauthorized, "unknown token".into()))
            }
        }
    }

    fn request(uri: &str, authorization: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_header() {
        let mut req = request("/rpc/v0", Some("Bearer abc"));
        let permissions = authenticate(&verifier(), &mut req).await.unwrap();
        assert_eq!(permissions, Some(Permissions::from(["read".to_string()])));

        let mut req = request("/rpc/v0", None);
        assert_eq!(authenticate(&verifier(), &mut req).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejections() {
        let mut req = request("/rpc/v0", Some("abc"));
        let err = authenticate(&verifier(), &mut req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);

        let mut req = request("/rpc/v0", Some("Bearer nope"));
        let err = authenticate(&verifier(), &mut req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_query_token() {
        let mut req = request("/rpc/v0?token=abc", None);
        let permissions = authenticate(&verifier(), &mut req).await.unwrap();
        assert!(permissions.unwrap().contains("read"));
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer abc");

        let mut req = request("/rpc/v0?token=abc", Some(""));
        let permissions = authenticate(&verifier(), &mut req).await.unwrap();
        assert!(permissions.unwrap().contains("read"));

        let mut req = request("/rpc/v0", Some(""));
        assert_eq!(authenticate(&verifier(), &mut req).await.unwrap(), None);
        assert!(!req.headers().contains_key(AUTHORIZATION));

        // the header wins over the query parameter.
        let mut req = request("/rpc/v0?token=nope", Some("Bearer abc"));
        assert!(authenticate(&verifier(), &mut req).await.is_ok());
    }
}
