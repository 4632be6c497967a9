#[macro_use]
extern crate log;

use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use lighthouse_crew::authentication::with_operator;
use lighthouse_crew::broker::{Broker, LocalBroker};
use lighthouse_crew::config::{self, Configuration};
use lighthouse_crew::connection::{ConnectionManager, ConnectionOptions};
use lighthouse_crew::handler;
use lighthouse_crew::persistence::{FileStorage, KeyValueStore, MemoryStorage};
use lighthouse_crew::presentation::{HostSettings, PresentationHost, SessionStore};
use warp::Filter;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match config::load_configuration() {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load configuration: {e}");
            std::process::exit(1);
        }
    };

    let broker = build_broker(&config);
    let host = Arc::new(build_host(&config, broker.clone()));

    match &config.broker_api_key {
        Some(key) => match host.connect(key).await {
            Ok(()) => {
                host.spawn_heartbeat();
            }
            Err(e) => error!("Could not reach the broker, continuing offline: {e}"),
        },
        None => warn!("No broker API key configured, running in offline mode"),
    }

    let health_route = warp::path!("health").and(warp::get()).and_then(handler::health_handler);

    let bridge_route = warp::path!("ws")
        .and(warp::ws())
        .and(warp::query::<handler::BridgeQuery>())
        .and(with_broker(broker))
        .and_then(handler::bridge_handler);

    let session_route = warp::path!("session")
        .and(warp::get())
        .and(with_host(host.clone()))
        .and_then(handler::session_handler);

    let operator = with_operator(config.operator_secret.clone());

    let reset_route = warp::path!("session" / "reset")
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::reset_session_handler);

    let new_session_route = warp::path!("session" / "new")
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::new_session_handler);

    let slide_route = warp::path!("slide" / u32)
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::slide_handler);

    let start_vote_route = warp::path!("votes" / usize / "start")
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::start_vote_handler);

    let end_vote_route = warp::path!("votes" / usize / "end")
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::end_vote_handler);

    let start_poll_route = warp::path!("polls" / String / "start")
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::start_poll_handler);

    let end_poll_route = warp::path!("polls" / String / "end")
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::end_poll_handler);

    let phase_route = warp::path!("phase" / String)
        .and(warp::post())
        .and(operator.clone())
        .and(with_host(host.clone()))
        .and_then(handler::phase_handler);

    let path_route = warp::path!("path" / usize / String)
        .and(warp::post())
        .and(operator)
        .and(with_host(host.clone()))
        .and_then(handler::path_handler);

    let routes = health_route
        .or(bridge_route)
        .or(session_route)
        .or(reset_route)
        .or(new_session_route)
        .or(slide_route)
        .or(start_vote_route)
        .or(end_vote_route)
        .or(start_poll_route)
        .or(end_poll_route)
        .or(phase_route)
        .or(path_route)
        .recover(handler::handle_rejection)
        .with(warp::cors().allow_any_origin());

    let address: IpAddr = match config.service_address.parse() {
        Ok(address) => address,
        Err(e) => {
            error!("Invalid service address {}: {e}", config.service_address);
            std::process::exit(1);
        }
    };

    info!("Serving on {address}:{}", config.service_port);
    warp::serve(routes).run((address, config.service_port)).await;
}

/// Vote apps reach the broker through the websocket bridge with the same
/// key. Without a key nothing is ever acknowledged, so the bridge refuses
/// every client and the presentation stays offline.
fn build_broker(config: &Configuration) -> Arc<dyn Broker> {
    match &config.broker_api_key {
        Some(key) => Arc::new(LocalBroker::new(key.as_str())),
        None => Arc::new(LocalBroker::silent()),
    }
}

fn build_host(config: &Configuration, broker: Arc<dyn Broker>) -> PresentationHost {
    let storage: Arc<dyn KeyValueStore> = match &config.storage_dir {
        Some(dir) => match FileStorage::new(dir) {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                warn!(
                    "Storage at {} unavailable, keeping state in memory: {e}",
                    dir.display()
                );
                Arc::new(MemoryStorage::new())
            }
        },
        None => Arc::new(MemoryStorage::new()),
    };

    let timeout = Duration::from_millis(config.connection_timeout_ms);
    let options = ConnectionOptions::presentation().with_timeout(timeout);
    let connection = Arc::new(ConnectionManager::new(broker, options));
    let store = Arc::new(SessionStore::open(storage));

    PresentationHost::new(connection, store, HostSettings::from(config))
}

fn with_host(
    host: Arc<PresentationHost>,
) -> impl Filter<Extract = (Arc<PresentationHost>,), Error = Infallible> + Clone {
    warp::any().map(move || host.clone())
}

fn with_broker(
    broker: Arc<dyn Broker>,
) -> impl Filter<Extract = (Arc<dyn Broker>,), Error = Infallible> + Clone {
    warp::any().map(move || broker.clone())
}
