//! Relay line client.
//!
//! See [`relay_client::cli`] for usage.

fn main() -> anyhow::Result<()> {
    relay_client::cli::run()
}
