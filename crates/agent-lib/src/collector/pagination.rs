//! Continuation-token pagination with a per-page timeout

use super::{ListOptions, Page};
use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Fetch every page of a list call.
///
/// Each page is requested with `page_size` items and must complete within
/// `page_timeout`; the timeout is also passed to the server.
pub async fn list_all<T, F, Fut>(
    resource: &str,
    page_size: u32,
    page_timeout: Duration,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(ListOptions) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut continue_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let options = ListOptions {
            limit: page_size,
            continue_token: continue_token.take(),
            timeout_seconds: page_timeout.as_secs().min(u32::MAX as u64) as u32,
        };

        let page = tokio::time::timeout(page_timeout, fetch(options))
            .await
            .map_err(|_| anyhow!("timed out after {page_timeout:?} listing {resource}"))??;

        pages += 1;
        items.extend(page.items);

        match page.continue_token {
            Some(token) if !token.is_empty() => continue_token = Some(token),
            _ => break,
        }
    }

    debug!(resource = %resource, pages = pages, items = items.len(), "Listed resource");
    Ok(items)
}
