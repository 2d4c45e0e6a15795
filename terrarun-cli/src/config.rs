//! CLI configuration

use terrarun_client::TerrarunClient;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Terrarun server
    pub server_url: String,
}

impl Config {
    pub fn client(&self) -> TerrarunClient {
        TerrarunClient::new(self.server_url.clone())
    }
}
