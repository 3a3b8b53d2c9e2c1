use crate::config::HttpConfig;

/// Creates the [`reqwest::Client`] used to fetch images.
///
/// The client has no overall request timeout: every load attempt is bounded by the
/// loader's own per-attempt timeout instead.
pub fn create_client(config: &HttpConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .user_agent(config.user_agent.as_str())
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
}
