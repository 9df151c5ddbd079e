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

//! Shutdown Example
//!
//! Serves a fixed number of requests, then closes the server from inside
//! the request loop. Open keep-alive connections are closed with it.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example close_server
//! for i in 1 2 3; do curl http://127.0.0.1:4505/$i; done
//! ```

use futures::StreamExt;
use http::Response;
use httpmux_service::{ServerConfig, full, serve_with_config};
use tracing::info;
use tracing_subscriber::EnvFilter;

const REQUESTS: u64 = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let config = ServerConfig::default().with_max_connections(64);
    let mut server = serve_with_config(4505u16, config).await?;
    info!("Serving {REQUESTS} requests on {}", server.local_addr()?);

    let mut served = 0;
    while let Some(request) = server.next().await {
        let request = request?;
        served += 1;
        request.respond_with(Response::new(full(format!("request {served} of {REQUESTS}\n"))))?;

        if served == REQUESTS {
            server.close();
        }
    }

    info!("{}", server.snapshot());
    Ok(())
}
