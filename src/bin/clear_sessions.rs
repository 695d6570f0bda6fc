#[cfg(feature = "ssr")]
use whos_the_cone::{clear_sessions, config::AppConfig, establish_connection};

#[cfg(feature = "ssr")]
fn main() {
    let config = AppConfig::from_env().expect("Invalid configuration");
    let mut conn =
        establish_connection(&config.database_url).expect("Failed to connect to the database");
    let removed = clear_sessions(&mut conn).expect("Failed to clear sessions");
    println!("Cleared {} sessions with their participants and votes.", removed);
}

#[cfg(not(feature = "ssr"))]
fn main() {
    println!("This binary requires the 'ssr' feature to be enabled.");
}
