//! Fetch command implementation.

use crate::client::ReqwestClient;
use pushnote_protocol::{PageRequest, Snippet};
use pushnote_sync::{HttpServicesApi, PaginationTracker, ServicesApi};
use tracing::debug;

/// Runs the fetch command.
pub async fn run(
    api_url: &str,
    token: Option<String>,
    limit: u32,
    max_pages: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let api = HttpServicesApi::new(api_url, ReqwestClient::new(token)?);
    let mut tracker = PaginationTracker::new(limit);
    let mut services: Vec<Snippet> = Vec::new();
    let mut pages = 0;

    while tracker.allows_pagination(false) && max_pages.map_or(true, |max| pages < max) {
        let request = PageRequest {
            limit,
            after: tracker.next_page_cursor().cloned(),
        };
        let page = api.fetch_services(&request).await?;
        debug!(page = pages, count = page.len(), "page fetched");
        tracker.update_state(&page);
        pages += 1;
        if page.is_empty() {
            break;
        }
        services.extend(page);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&services)?);
        }
        _ => {
            for service in &services {
                println!("{:>8}  {}", service.id.to_string(), service.name);
            }
            println!();
            println!(
                "{} services in {} page(s){}",
                services.len(),
                pages,
                if tracker.is_fully_paginated() {
                    ""
                } else {
                    ", more available"
                }
            );
        }
    }

    Ok(())
}
