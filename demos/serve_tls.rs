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

//! TLS Example
//!
//! Serves HTTPS with a PEM certificate chain and private key, offering
//! HTTP/2 and HTTP/1.1 through ALPN.
//!
//! ## Usage
//!
//! ```bash
//! openssl req -x509 -newkey rsa:2048 -nodes -subj '/CN=localhost' \
//!     -keyout key.pem -out cert.pem
//! cargo run --example serve_tls -- cert.pem key.pem
//! curl -k https://localhost:4505/secure
//! ```

use futures::StreamExt;
use http::Response;
use httpmux_service::{ListenOptions, TlsListenOptions, full, serve};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let cert = args.next().unwrap_or_else(|| "cert.pem".to_string());
    let key = args.next().unwrap_or_else(|| "key.pem".to_string());

    let options = TlsListenOptions::new(ListenOptions::port(4505), cert, key)
        .with_alpn_protocols(["h2", "http/1.1"]);
    let mut server = serve(options).await?;
    info!(local_addr = %server.local_addr()?, "Serving HTTPS");

    let closer = server.closer();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        closer.close();
    });

    while let Some(request) = server.next().await {
        let request = request?;
        let body = format!("{:?} {} {}\n", request.version(), request.method(), request.url());
        request.respond_with(Response::new(full(body)))?;
    }
    Ok(())
}
