pub mod epo;
pub mod normalize;
pub mod patents_view;
pub mod trademark;
pub mod traits;

pub use epo::{EpoProvider, PublicationReference, EPO_SOURCE};
pub use patents_view::{PatentsViewProvider, PATENTS_VIEW_SOURCE};
pub use trademark::{TrademarkProvider, TRADEMARK_ID_PREFIX, TRADEMARK_SOURCE};
pub use traits::{Jurisdiction, RegistryProvider, SearchMode, SearchQuery};

use crate::{Error, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use std::time::Duration;

/// Turn a non-2xx response into the matching error, passing success through
pub(crate) async fn ensure_success(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(Duration::from_secs(1), Duration::from_secs);
        return Err(Error::RateLimitExceeded { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::ProviderStatus {
        provider: provider.to_string(),
        status: status.as_u16(),
        message: body.chars().take(200).collect(),
    })
}
