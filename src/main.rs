#[cfg(feature = "ssr")]
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[cfg(feature = "ssr")]
#[tokio::main]
async fn main() {
    use axum::Router;
    use leptos::prelude::*;
    use leptos_axum::{generate_route_list, LeptosRoutes};
    use tracing::info;
    use whos_the_cone::app::*;
    use whos_the_cone::config::AppConfig;
    use whos_the_cone::{build_pool, create_schema, seed_catalog};

    init_tracing();

    let config = AppConfig::from_env().expect("Invalid configuration.");
    let pool = build_pool(&config).expect("Failed to create pool.");
    {
        let mut conn = pool.get().expect("Failed to get a database connection.");
        create_schema(&mut conn).expect("Failed to create the schema.");
        seed_catalog(&mut conn).expect("Failed to seed players and games.");
    }
    info!(database = %config.database_url, pool_size = config.pool_size, "database ready");

    let conf = get_configuration(None).unwrap();
    let addr = conf.leptos_options.site_addr;
    let leptos_options = conf.leptos_options;
    let routes = generate_route_list(App);

    let leptos_options_clone = leptos_options.clone();
    let app = Router::new()
        .leptos_routes_with_context(
            &leptos_options,
            routes,
            // Provide pool for server functions.
            move || provide_context(pool.clone()),
            move || shell(leptos_options_clone.clone()),
        )
        .fallback(leptos_axum::file_and_error_handler(shell))
        .with_state(leptos_options.clone());

    info!("listening on http://{}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app.into_make_service())
        .await
        .unwrap();
}

#[cfg(not(feature = "ssr"))]
pub fn main() {
    // no client-side main function, see lib.rs for hydration
}
