use axum::routing::get;
use log::info;
use std::net::{Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

mod auth;
mod collaborations;
mod context;
mod docs;
mod errors;
mod schemas;
mod serialized;
mod themes;

pub mod config;
pub mod logging;

pub use context::{JaminCollab, ServerContext};

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9090;

pub type Router = axum::Router<ServerContext>;

/// Starts the Jamin server
pub async fn run_server(port: u16, context: ServerContext) -> anyhow::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/auth", auth::router())
        .nest("/themes", themes::router())
        .nest("/collaborations", collaborations::router());

    let root_router: axum::Router = Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context);

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");

    axum::serve(listener, root_router.into_make_service()).await?;

    Ok(())
}
