use crate::Client;
use futures::future::{join_all, BoxFuture};
use http::{HeaderValue, Request, Response};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

pub const ENABLED_FLAGS_HEADER: &str = "X-Enabled-Flags";

/// Evaluates the flags named in a request header for the user named in
/// another, and reports the enabled ones in `X-Enabled-Flags`.
#[derive(Clone)]
pub struct FlagsLayer {
    client: Arc<Client>,
    header_name: String,
    user_header_name: String,
}

impl FlagsLayer {
    pub fn new(client: Client) -> Self {
        Self::from_shared(Arc::new(client))
    }

    pub fn from_shared(client: Arc<Client>) -> Self {
        Self {
            client,
            header_name: "X-Feature-Flags".to_string(),
            user_header_name: "X-User-ID".to_string(),
        }
    }

    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn with_user_header_name(mut self, name: impl Into<String>) -> Self {
        self.user_header_name = name.into();
        self
    }
}

impl<S> Layer<S> for FlagsLayer {
    type Service = FlagsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FlagsMiddleware {
            inner,
            client: self.client.clone(),
            header_name: self.header_name.clone(),
            user_header_name: self.user_header_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct FlagsMiddleware<S> {
    inner: S,
    client: Arc<Client>,
    header_name: String,
    user_header_name: String,
}

#[pin_project]
pub struct FlagsFuture<F> {
    #[pin]
    inner: F,
    flags_future: Option<BoxFuture<'static, Vec<String>>>,
    enabled_flags: Vec<String>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for FlagsMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: http_body::Body + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = FlagsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let header_text = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let flags = header_text(self.header_name.as_str()).map(|s| {
            s.split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>()
        });
        let user_id = header_text(self.user_header_name.as_str());

        let flags_future = match (flags, user_id) {
            (Some(flags), Some(user_id)) => {
                let client = self.client.clone();
                let fut = async move {
                    let checks = flags.iter().map(|flag| {
                        let client = &client;
                        let user_id = &user_id;
                        async move { client.is(flag).enabled_for(user_id).await }
                    });
                    let results = join_all(checks).await;
                    flags
                        .iter()
                        .zip(results)
                        .filter(|(_, enabled)| *enabled)
                        .map(|(flag, _)| flag.clone())
                        .collect::<Vec<_>>()
                };
                Some(Box::pin(fut) as BoxFuture<'static, Vec<String>>)
            }
            _ => None,
        };

        req.extensions_mut().insert(FlagsState {
            client: self.client.clone(),
        });

        FlagsFuture {
            inner: self.inner.call(req),
            flags_future,
            enabled_flags: Vec::new(),
        }
    }
}

impl<F, ResBody, E> Future for FlagsFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Some(flags_future) = this.flags_future.as_mut() {
            match flags_future.as_mut().poll(cx) {
                Poll::Ready(enabled) => {
                    *this.enabled_flags = enabled;
                    *this.flags_future = None;
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.inner.poll(cx) {
            Poll::Ready(Ok(mut response)) => {
                if !this.enabled_flags.is_empty() {
                    if let Ok(value) = HeaderValue::from_str(&this.enabled_flags.join(",")) {
                        response.headers_mut().insert(ENABLED_FLAGS_HEADER, value);
                    }
                }
                Poll::Ready(Ok(response))
            }
            other => other,
        }
    }
}

#[derive(Clone)]
pub struct FlagsState {
    pub client: Arc<Client>,
}

pub trait RequestExt {
    fn flags_client(&self) -> Option<&Client>;
}

impl<T> RequestExt for Request<T> {
    fn flags_client(&self) -> Option<&Client> {
        self.extensions()
            .get::<FlagsState>()
            .map(|state| state.client.as_ref())
    }
}
