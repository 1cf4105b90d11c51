use std::convert::Infallible;
use std::net::SocketAddr;
use warp::hyper::HeaderMap;
use warp::{self, Filter};
use log::{info, error, warn};

use uplink_relay::assistant::Assistant;
use uplink_relay::config::ServerConfig;
use uplink_relay::constants::{HEALTH_PATH, WS_PATH};
use uplink_relay::core::ip_extractor::extract_client_identity;
use uplink_relay::core::server::{RelayServer, SharedRelayServer};
use uplink_relay::handlers::websocket::handle_ws_client;

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Load config from the environment
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: {:?}", config);

    let assistant = match Assistant::from_config(&config) {
        Ok(assistant) => assistant,
        Err(e) => {
            error!("Failed to initialize the assistant: {}", e);
            std::process::exit(1);
        }
    };
    if !config.collaborator_enabled() {
        warn!("GEMINI_API_KEY is not set, assistant features will answer with offline fallbacks");
    }

    let server = RelayServer::new(config.clone(), assistant);
    server.start_housekeeping();

    // Create WebSocket route
    let trust_proxy = config.trust_proxy;
    // Transport cap sits above the frame limit so oversize frames get a notice
    let max_message_size = config.max_frame_size.saturating_mul(2);
    let ws_route = warp::path(WS_PATH)
        .and(warp::ws())
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and(with_server(server.clone()))
        .map(
            move |ws: warp::ws::Ws,
                  headers: HeaderMap,
                  remote: Option<SocketAddr>,
                  server: SharedRelayServer| {
                let identity = extract_client_identity(&headers, remote, trust_proxy);
                info!("New websocket connection from {}", identity);
                ws.max_message_size(max_message_size)
                    .on_upgrade(move |socket| handle_ws_client(socket, server, identity))
            },
        );

    // Create health check route
    let health_route = warp::path(HEALTH_PATH).map(|| "OK");

    // Combine routes
    let routes = ws_route.or(health_route);

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    match (config.enable_tls, config.tls_cert_path, config.tls_key_path) {
        (true, Some(cert_path), Some(key_path)) => {
            info!("Starting uplink relay on wss://{}", addr);
            warp::serve(routes)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .run(addr)
                .await;
        }
        _ => {
            info!("Starting uplink relay on ws://{}", addr);
            warp::serve(routes).run(addr).await;
        }
    }
}

// Helper function to include the relay server in request state
fn with_server(
    server: SharedRelayServer,
) -> impl Filter<Extract = (SharedRelayServer,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
