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

//! Handler Example
//!
//! Hands every request to an async closure running on its own task.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example listen_and_serve
//! curl -d 'hello' http://127.0.0.1:4505/echo
//! ```

use http::Response;
use http_body_util::BodyExt;
use httpmux_service::{RequestContext, full, listen_and_serve};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("Echoing request bodies on 127.0.0.1:4505");

    listen_and_serve("127.0.0.1:4505", |mut request: RequestContext| async move {
        // Echo the request body back
        let body = match request.take_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => "unreadable body".into(),
        };
        let _ = request.respond_with(Response::new(full(body)));
    })
    .await?;

    Ok(())
}
