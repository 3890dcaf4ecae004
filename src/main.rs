//! Binary entrypoint.
//!
//! Mirrors the teacher's `production_server` bin: load env, init
//! tracing, build shared state, bind actix-web. With no subcommand the
//! process runs the HTTP server; any [`cli::Command`] instead runs that
//! one operation against the store and exits, matching the original
//! implementation's argv-length dispatch.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;

use oai_coalesce_proxy::api::{self, AppState};
use oai_coalesce_proxy::cli::{self, Command};
use oai_coalesce_proxy::config::Config;
use oai_coalesce_proxy::scheduler::Scheduler;
use oai_coalesce_proxy::store::Store;
use oai_coalesce_proxy::upstream::HttpUpstream;

#[derive(Parser, Debug)]
#[command(name = "oai-coalesce-proxy")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let store = Store::connect(&config.database.url).await?;

    let cli = Cli::parse();
    if let Some(command) = cli.command {
        return cli::run(command, &store).await;
    }

    let upstream = Arc::new(HttpUpstream::new(
        config.upstream.base_url.clone(),
        config.upstream.api_key.clone(),
        config.upstream.org.clone(),
    ));
    let scheduler = Scheduler::new(upstream, config.scheduler.flush_interval);
    let flush_handle = tokio::spawn(scheduler.clone().run());

    let model = api::model_name(&config);
    let state = web::Data::new(AppState {
        scheduler: scheduler.clone(),
        store,
        model,
    });

    tracing::info!("binding on {}", config.server.bind_addr);
    let bind_addr = config.server.bind_addr.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(api::configure)
    })
    .bind(bind_addr)?
    .run();

    server.await?;

    scheduler.shutdown().await;
    flush_handle.await?;

    Ok(())
}
