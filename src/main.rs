use actix_web::{App, HttpServer};
use buttplug_session::buttplug::device_manager;
use buttplug_session::config::Config;
use buttplug_session::routes;
use env_logger::Env;
use dotenv::dotenv;
use log::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();
    let bind_address = config.bind_address.clone();
    info!("Using Buttplug server at {}", config.server_address);
    device_manager::initialize_device(config);

    HttpServer::new(|| {
        App::new()
            .configure(routes::setup_routes)
    })
    .bind(bind_address.as_str())?
    .run()
    .await
}
