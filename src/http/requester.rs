//! Remote request construction for the synchronization services.
use std::collections::{BTreeMap, HashMap};

use url::Url;

use crate::codec;
use crate::config::ClientConfig;
use crate::features::Feature;
use crate::http::{HttpRequest, Method, Transport};
use crate::requests::FeatureRequest;
use crate::{Error, Result};

const FEATURES_PATH: &str = "/v2/features";
const EVENTS_PATH: &str = "/v2/events";

fn query_params(request: &FeatureRequest) -> BTreeMap<&'static str, String> {
    let mut params = BTreeMap::new();
    params.insert("conditions", "true".to_owned());

    let mut ids: Vec<&str> = request.feature_ids().collect();
    ids.sort_unstable();
    if !ids.is_empty() {
        params.insert("features", ids.join(","));
    }
    if let Some(context) = request.context() {
        params.insert("context", context.to_owned());
    }
    if !request.user().trim().is_empty() {
        params.insert("user", request.user().to_owned());
    }
    params
}

fn build_url(
    config: &ClientConfig,
    path: &str,
    params: &BTreeMap<&'static str, String>,
) -> Result<Url> {
    Url::parse_with_params(
        &format!("{}{}", config.connection.base_url, path),
        params.iter(),
    )
    .map_err(Error::InvalidBaseUrl)
}

fn build_request(url: Url, config: &ClientConfig, request: &FeatureRequest) -> HttpRequest {
    let headers = config
        .connection
        .headers()
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect();
    HttpRequest {
        method: if request.payload().is_some() {
            Method::Post
        } else {
            Method::Get
        },
        url,
        headers,
        body: request.payload().map(str::to_owned),
        timeout: request.call_timeout().unwrap_or(config.call_timeout),
    }
}

/// Fetch the requested features from the batch endpoint and decode the response.
pub(crate) async fn fetch_features(
    transport: &dyn Transport,
    config: &ClientConfig,
    request: &FeatureRequest,
) -> Result<HashMap<String, Feature>> {
    let url = build_url(config, FEATURES_PATH, &query_params(request))?;
    let response = transport.send(build_request(url, config, request)).await?;
    if !response.is_success() {
        return Err(Error::Status(response.status));
    }
    codec::decode_feature_map(&response.body)
}

/// Build the long-lived streaming request for the given subscription scope.
pub(crate) fn stream_request(
    config: &ClientConfig,
    scope: &FeatureRequest,
) -> Result<HttpRequest> {
    let mut params = query_params(scope);
    params.insert(
        "refreshInterval",
        config.cache.refresh_interval.as_secs().to_string(),
    );
    params.insert(
        "keepAliveInterval",
        config.cache.keep_alive_interval.as_secs().to_string(),
    );
    let url = build_url(config, EVENTS_PATH, &params)?;
    Ok(build_request(url, config, scope))
}
