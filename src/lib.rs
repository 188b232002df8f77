pub mod agents;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod events;
pub mod groups;
pub mod ident;
pub mod inbox;
pub mod models;
pub mod rate_limit;
pub mod roundtable;
pub mod routes;
pub mod storage;
pub mod sweeper;
pub mod webhooks;

use agents::AgentService;
use config::HubConfig;
use events::EventBus;
use groups::GroupService;
use inbox::InboxService;
use rate_limit::{RateLimitConfig, RateLimiter};
use rocket_cors::{AllowedOrigins, CorsOptions};
use roundtable::RoundTableService;
use storage::DynStorage;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = HubConfig::from_env();
    let storage = storage::build_storage(&config).unwrap_or_else(|e| {
        eprintln!("⚠️  Storage configuration error: {e}");
        std::process::exit(1);
    });
    rocket_with_storage(config, storage, RateLimitConfig::from_env())
}

/// Builder entry for tests: explicit config, in-process storage, explicit
/// rate limits (avoids env var races between parallel tests).
pub fn rocket_with_config(
    config: HubConfig,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    let storage: DynStorage = std::sync::Arc::new(storage::memory::MemoryStorage::new());
    rocket_with_storage(config, storage, rate_config)
}

pub fn rocket_with_storage(
    config: HubConfig,
    storage: DynStorage,
    rate_limit_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    let events = EventBus::new();

    // Subscribe the webhook dispatcher BEFORE handing the bus to Rocket
    let webhook_receiver = events.sender.subscribe();
    let webhook_storage = storage.clone();

    let agent_service = AgentService::new(storage.clone(), config.clone());
    let inbox_service = InboxService::new(storage.clone(), events.clone(), config.clone());
    let group_service = GroupService::new(storage.clone(), events.clone(), config.clone());
    let round_table_service = RoundTableService::new(
        storage.clone(),
        events.clone(),
        group_service.clone(),
        config.clone(),
    );

    let sweeper_storage = storage.clone();
    let sweeper_agents = agent_service.clone();
    let sweeper_round_tables = round_table_service.clone();
    let sweeper_config = config.clone();

    let rate_limiter = RateLimiter::new();

    let allowed_origins = match &config.cors_origin {
        Some(origin) => AllowedOrigins::some_exact(&[origin.as_str()]),
        None => AllowedOrigins::all(),
    };
    let cors = CorsOptions {
        allowed_origins,
        ..Default::default()
    }
    .to_cors()
    .expect("Failed to create CORS");

    // Raise the JSON limit above the 1 MB body ceiling so the size check in
    // the inbox engine is the one that answers, with the protocol error.
    let mut figment = rocket::Config::figment()
        .merge(("limits.json", 4 * 1024 * 1024))
        .merge(("limits.string", 4 * 1024 * 1024));
    if let Some(port) = config.port {
        figment = figment.merge(("port", port));
    }

    rocket::custom(figment)
        .manage(config)
        .manage(storage)
        .manage(events)
        .manage(agent_service)
        .manage(inbox_service)
        .manage(group_service)
        .manage(round_table_service)
        .manage(rate_limit_config)
        .manage(rate_limiter)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::not_found,
                routes::unauthorized,
                routes::unprocessable,
                routes::too_many_requests,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::stats,
                routes::register,
                routes::list_agents,
                routes::get_agent,
                routes::delete_agent,
                routes::heartbeat,
                routes::rotate_key,
                routes::get_trusted,
                routes::add_trusted,
                routes::remove_trusted,
                routes::get_webhook,
                routes::set_webhook,
                routes::delete_webhook,
                routes::send_message,
                routes::pull_message,
                routes::inbox_stats,
                routes::reclaim_inbox,
                routes::ack_message,
                routes::nack_message,
                routes::reply_message,
                routes::message_status,
                routes::create_group,
                routes::list_groups,
                routes::get_group,
                routes::delete_group,
                routes::join_group,
                routes::leave_group,
                routes::group_members,
                routes::add_group_member,
                routes::remove_group_member,
                routes::post_group_message,
                routes::group_history,
                routes::create_round_table,
                routes::list_round_tables,
                routes::get_round_table,
                routes::speak_round_table,
                routes::resolve_round_table,
                routes::issue_key,
                routes::revoke_key,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Webhook Dispatcher",
            move |_rocket| {
                Box::pin(async move {
                    webhooks::spawn_dispatcher(webhook_receiver, webhook_storage);
                    println!("🔗 Webhook dispatcher started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Background Sweeper",
            move |_rocket| {
                Box::pin(async move {
                    sweeper::spawn_sweeper(
                        sweeper_storage,
                        sweeper_agents,
                        sweeper_round_tables,
                        sweeper_config,
                    );
                    println!("🧹 Background sweeper started");
                })
            },
        ))
}
