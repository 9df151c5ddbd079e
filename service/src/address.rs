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

//! Listen address resolution
//!
//! Every form a caller may hand to [`serve`](crate::serve) resolves into
//! [`BindOptions`] through the [`ToBindOptions`] trait:
//!
//! | Input                         | Result                              |
//! |-------------------------------|-------------------------------------|
//! | `None` / `()`                 | `0.0.0.0:80`                        |
//! | `4505u16` or `"4505"`         | `0.0.0.0:4505`                      |
//! | `":4505"`                     | `0.0.0.0:4505`                      |
//! | `"localhost:4505"`            | `localhost:4505`                    |
//! | `"localhost"`                 | `localhost:80`                      |
//! | [`ListenOptions`]             | as given                            |
//! | [`TlsListenOptions`]          | TLS listener on the given address   |
//!
//! Anything carrying userinfo, a path, a query or a fragment is rejected
//! with [`ServerError::InvalidAddress`].

use crate::{Result, ServerError};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

/// Hostname used when an address names only a port
pub const DEFAULT_HOSTNAME: &str = "0.0.0.0";

/// Port used when an address names no port
pub const DEFAULT_PORT: u16 = 80;

/// Plain TCP listen options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// Hostname or IP literal to bind
    pub hostname: String,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
}

impl ListenOptions {
    /// Create listen options for the given hostname and port
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Listen on all interfaces at the given port
    pub fn port(port: u16) -> Self {
        Self::new(DEFAULT_HOSTNAME, port)
    }
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self::port(DEFAULT_PORT)
    }
}

impl fmt::Display for ListenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname.contains(':') {
            write!(f, "[{}]:{}", self.hostname, self.port)
        } else {
            write!(f, "{}:{}", self.hostname, self.port)
        }
    }
}

/// TLS listen options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsListenOptions {
    /// Address to bind
    pub listen: ListenOptions,
    /// PEM file holding the certificate chain
    pub cert_file: PathBuf,
    /// PEM file holding the private key
    pub key_file: PathBuf,
    /// ALPN protocols to offer, in preference order (e.g. `h2`, `http/1.1`)
    pub alpn_protocols: Vec<String>,
}

impl TlsListenOptions {
    /// Create TLS listen options
    pub fn new(
        listen: ListenOptions,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            listen,
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            alpn_protocols: Vec::new(),
        }
    }

    /// Set the ALPN protocols to negotiate
    pub fn with_alpn_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }
}

/// Fully resolved listener construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOptions {
    /// Plain TCP listener
    Http(ListenOptions),
    /// TLS listener
    Https(TlsListenOptions),
}

impl BindOptions {
    /// Address part of the options
    pub fn listen(&self) -> &ListenOptions {
        match self {
            BindOptions::Http(listen) => listen,
            BindOptions::Https(tls) => &tls.listen,
        }
    }

    /// Check if the options describe a TLS listener
    pub fn is_tls(&self) -> bool {
        matches!(self, BindOptions::Https(_))
    }
}

/// Conversion into [`BindOptions`]
///
/// Implemented for every address form [`serve`](crate::serve) accepts.
pub trait ToBindOptions {
    /// Resolve into listener construction parameters
    fn to_bind_options(&self) -> Result<BindOptions>;
}

impl ToBindOptions for BindOptions {
    fn to_bind_options(&self) -> Result<BindOptions> {
        Ok(self.clone())
    }
}

impl ToBindOptions for ListenOptions {
    fn to_bind_options(&self) -> Result<BindOptions> {
        Ok(BindOptions::Http(self.clone()))
    }
}

impl ToBindOptions for TlsListenOptions {
    fn to_bind_options(&self) -> Result<BindOptions> {
        Ok(BindOptions::Https(self.clone()))
    }
}

impl ToBindOptions for u16 {
    fn to_bind_options(&self) -> Result<BindOptions> {
        Ok(BindOptions::Http(ListenOptions::port(*self)))
    }
}

impl ToBindOptions for SocketAddr {
    fn to_bind_options(&self) -> Result<BindOptions> {
        Ok(BindOptions::Http(ListenOptions::new(
            self.ip().to_string(),
            self.port(),
        )))
    }
}

impl ToBindOptions for () {
    fn to_bind_options(&self) -> Result<BindOptions> {
        Ok(BindOptions::Http(ListenOptions::default()))
    }
}

impl ToBindOptions for str {
    fn to_bind_options(&self) -> Result<BindOptions> {
        parse_address(self).map(BindOptions::Http)
    }
}

impl ToBindOptions for String {
    fn to_bind_options(&self) -> Result<BindOptions> {
        self.as_str().to_bind_options()
    }
}

impl<T: ToBindOptions> ToBindOptions for Option<T> {
    fn to_bind_options(&self) -> Result<BindOptions> {
        match self {
            Some(address) => address.to_bind_options(),
            None => ().to_bind_options(),
        }
    }
}

impl<T: ToBindOptions + ?Sized> ToBindOptions for &T {
    fn to_bind_options(&self) -> Result<BindOptions> {
        (**self).to_bind_options()
    }
}

/// Parse a `host:port`, `:port`, `host` or bare port string
pub fn parse_address(address: &str) -> Result<ListenOptions> {
    let invalid = || ServerError::InvalidAddress(address.to_string());

    if !address.is_empty() && address.bytes().all(|b| b.is_ascii_digit()) {
        let port = address.parse::<u16>().map_err(|_| invalid())?;
        return Ok(ListenOptions::port(port));
    }

    let authority = match address.strip_prefix(':') {
        Some(_) => format!("{DEFAULT_HOSTNAME}{address}"),
        None => address.to_string(),
    };

    let url = Url::parse(&format!("http://{authority}")).map_err(|_| invalid())?;

    if !url.username().is_empty()
        || url.password().is_some()
        || url.path() != "/"
        || url.query().is_some()
        || url.fragment().is_some()
    {
        return Err(invalid());
    }

    let hostname = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(invalid)?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    Ok(ListenOptions::new(hostname, url.port().unwrap_or(DEFAULT_PORT)))
}
