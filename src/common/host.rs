use std::time::Duration;

use tracing::{info, warn};

const FIND_IP_URL: &str = "http://ifconfig.me";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Provenance string recorded on every clip this process produces.
pub async fn resolve_process_host(configured: Option<&str>) -> String {
    if let Some(host) = configured.map(str::trim).filter(|h| !h.is_empty()) {
        return host.to_string();
    }

    match lookup_public_address().await {
        Ok(addr) => {
            info!("Resolved process host: {}", addr);
            addr
        }
        Err(e) => {
            warn!("Cannot resolve public address, using 'unknown': {}", e);
            "unknown".to_string()
        }
    }
}

async fn lookup_public_address() -> Result<String, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
    let body = client
        .get(FIND_IP_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body.trim().to_string())
}
