use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    /// Buffer size of the change-feed broadcast channel. A lagging subscriber
    /// loses the oldest events once the buffer wraps.
    /// Set via APPROVD_FEED_CAPACITY. Default: 256.
    pub feed_capacity: usize,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        database_url: std::env::var("APPROVD_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "sqlite://approvd.db?mode=rwc".into()),
        feed_capacity: std::env::var("APPROVD_FEED_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256),
    })
}
