use actix_web::{web, App, HttpServer};
use log::{info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

use updock::app_state::AppState;
use updock::config::AppConfig;
use updock::upload::handlers::{upload_delete_handler, upload_post_handler};

fn init_logging(config_file: &str) {
    if Path::new(config_file).exists() {
        log4rs::init_file(config_file, Default::default()).expect("Failed to initialize logging");
    } else {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}")))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info))
            .expect("Failed to build default logging config");
        log4rs::init_config(config).expect("Failed to initialize logging");
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load().expect("Failed to load configuration");
    init_logging(&config.logging.config_file);

    let server = config.server.clone();
    info!("Starting updock on {}:{}", server.host, server.port);

    let state = AppState::from_config(config);
    let max_payload = server.max_payload_size as usize;

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::default().limit(max_payload))
            .route("/files", web::post().to(upload_post_handler))
            .route("/files", web::delete().to(upload_delete_handler))
            .route("/files/{name}", web::delete().to(upload_delete_handler))
    })
    .workers(server.workers)
    .bind((server.host.as_str(), server.port))?
    .run()
    .await
}
