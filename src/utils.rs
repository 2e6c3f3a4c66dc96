use std::collections::HashMap;

use anyhow::{anyhow, Result};
use url::Url;

/// Query parameters of a request URI such as `/api/display/strip?index=0&total=3`
pub fn query_params(uri: &str) -> Result<HashMap<String, String>> {
    let url = Url::parse(&format!("http://localhost{uri}"))?;
    Ok(url.query_pairs().into_owned().collect())
}

/// Path component of a request URI, without the query string
pub fn uri_path(uri: &str) -> &str {
    uri.split_once('?').map(|(path, _)| path).unwrap_or(uri)
}

pub fn required_param<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Result<T> {
    match params.get(key) {
        Some(v) => v.trim().parse::<T>().map_err(|_| anyhow!("invalid parameter {key}: `{v}`")),
        None => Err(anyhow!("missing parameter {key}")),
    }
}

pub fn optional_param<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match params.get(key) {
        Some(_) => required_param(params, key).map(Some),
        None => Ok(None),
    }
}
