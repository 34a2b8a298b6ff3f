//! Conditional revalidation of previously fetched responses.

use super::client::{ApiResult, Page, Validators};
use ohno::app_err;
use serde::{Deserialize, Serialize};

/// A payload together with the validators it was served with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse<T> {
    pub data: T,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl<T> CachedResponse<T> {
    #[must_use]
    pub fn validators(&self) -> Validators {
        Validators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

/// Where a revalidated payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revalidated<T> {
    pub response: CachedResponse<T>,
    pub source: ResponseSource,
}

/// Issue `request` with conditional headers derived from `cached`.
///
/// A fresh response replaces the cached one. A "not modified" answer yields the cached payload
/// unchanged. Every other outcome is passed through untouched, rate-limit observation included,
/// so the caller can feed the shared budget whichever path was taken. Without a cached value no
/// conditional headers are sent.
pub async fn revalidate<T, F, Fut>(cached: Option<CachedResponse<T>>, request: F) -> ApiResult<Revalidated<T>>
where
    F: FnOnce(Validators) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    let validators = cached.as_ref().map(CachedResponse::validators).unwrap_or_default();

    match request(validators).await {
        ApiResult::NotModified(rl) => match cached {
            Some(response) => ApiResult::Success(
                Revalidated {
                    response,
                    source: ResponseSource::Cache,
                },
                rl,
            ),
            None => ApiResult::Failed(app_err!("server reported 'not modified' for an uncached request"), rl),
        },
        other => other.map(|page| Revalidated {
            response: CachedResponse {
                data: page.data,
                etag: page.etag,
                last_modified: page.last_modified,
            },
            source: ResponseSource::Network,
        }),
    }
}
