use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Plain-text acknowledgement of an inbound echo request.
pub fn acknowledgement(own_name: &str, request_id: u64) -> String {
    format!("HOSTNAME='{}', req_id={}", own_name, request_id)
}

struct ResponderState {
    own_name: String,
}

/// Inbound side of an instance. Answers every echo request, independent of
/// what the outbound dispatcher is doing.
#[derive(Clone)]
pub struct Responder {
    state: Arc<ResponderState>,
}

impl Responder {
    pub fn new(own_name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ResponderState {
                own_name: own_name.into(),
            }),
        }
    }

    pub fn respond(&self, caller: &str, request_id: u64) -> String {
        debug!("<- /echo/{}/{}", caller, request_id);
        acknowledgement(&self.state.own_name, request_id)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/echo/{caller}/{request_id}", post(echo_handler))
            .route("/health", get(health_handler))
            .with_state(self.clone())
    }

    /// Serve on `listener` until `shutdown` resolves, then drain open connections.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        info!("Responder listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Responder stopped");
        Ok(())
    }
}

async fn echo_handler(
    State(responder): State<Responder>,
    Path((caller, request_id)): Path<(String, u64)>,
) -> String {
    responder.respond(&caller, request_id)
}

async fn health_handler() -> &'static str {
    "ok"
}
