//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Request Stream Example
//!
//! Serves requests by iterating the server directly. Every request is
//! answered with `418 I'm a teapot` and `"<METHOD>: <url>"`.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example serve -- 127.0.0.1:4505
//! ```
//!
//! Then:
//! ```bash
//! curl -v http://127.0.0.1:4505/hello
//! ```

use futures::StreamExt;
use http::{Response, StatusCode};
use httpmux_service::{full, serve};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let address = std::env::args().nth(1).unwrap_or_else(|| ":4505".to_string());
    let mut server = serve(address.as_str()).await?;
    info!(local_addr = %server.local_addr()?, "Serving, press Ctrl+C to stop");

    let closer = server.closer();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        closer.close();
    });

    while let Some(request) = server.next().await {
        let request = request?;
        let body = format!("{}: {}", request.method(), request.url());
        let mut response = Response::new(full(body));
        *response.status_mut() = StatusCode::IM_A_TEAPOT;
        if let Err(e) = request.respond_with(response) {
            warn!(error = %e, "Failed to respond");
        }
    }

    let metrics = server.metrics();
    info!(
        connections = metrics.total_connections,
        requests = metrics.requests_received,
        errors = metrics.total_errors(),
        "Server stopped"
    );
    Ok(())
}
