use bytes::Bytes;
use flags_eval::config::Config;
use flags_eval::middleware::{FlagsLayer, RequestExt, ENABLED_FLAGS_HEADER};
use flags_eval::Client;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use std::convert::Infallible;
use std::sync::Arc;
use tower::{ServiceBuilder, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let client = Arc::new(
        Client::builder()
            .with_config(Config::from_env()?)
            .with_memory_cache()
            .build()?,
    );

    let service = ServiceBuilder::new()
        .layer(FlagsLayer::from_shared(client.clone()))
        .service_fn(handle_request);

    let request = Request::builder()
        .uri("/")
        .header("X-User-ID", "user-42")
        .header("X-Feature-Flags", "feature-1,feature-2,feature-3")
        .body(Empty::<Bytes>::new())?;

    let response = service.oneshot(request).await?;

    println!("Response status: {}", response.status());
    if let Some(enabled_flags) = response.headers().get(ENABLED_FLAGS_HEADER) {
        println!("Enabled flags: {:?}", enabled_flags);
    }

    let service = ServiceBuilder::new()
        .layer(FlagsLayer::from_shared(client))
        .service_fn(handle_request_with_flag_check);

    let request = Request::builder()
        .uri("/protected")
        .header("X-User-ID", "user-42")
        .body(Empty::<Bytes>::new())?;

    let response = service.oneshot(request).await?;
    println!("\nProtected endpoint response: {}", response.status());

    let body_bytes = response.into_body().collect().await?.to_bytes();
    println!("Response body: {}", String::from_utf8_lossy(&body_bytes));

    Ok(())
}

async fn handle_request<B>(_req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(Response::new(Full::new("Hello from the service!".into())))
}

async fn handle_request_with_flag_check<B>(req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
    let user_id = req
        .headers()
        .get("X-User-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let (status, body) = match req.flags_client() {
        Some(client) if client.is("premium-features").enabled_for(user_id).await => {
            (StatusCode::OK, "Premium features are enabled!")
        }
        Some(_) => (StatusCode::FORBIDDEN, "Premium features are not enabled"),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "Flags client not available"),
    };

    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    Ok(response)
}
