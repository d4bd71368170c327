use std::fmt::{self, Display};

use async_trait::async_trait;

use crate::{config::Version, error::ResolveError};

#[cfg(feature = "mc-bedrock")]
pub use bedrock::BedrockResolver;

/// Browser identity sent to the vendor; the download page varies its output
/// by client.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.33 (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.33";

pub const DOWNLOAD_PAGE: &str = "https://www.minecraft.net/en-us/download/server/bedrock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Product {
    #[default]
    BedrockLinux,
    BedrockWindows,
}

impl Product {
    fn link_prefix(&self) -> &'static str {
        match self {
            Product::BedrockLinux => "https://www.minecraft.net/bedrockdedicatedserver/bin-linux/",
            Product::BedrockWindows => "https://www.minecraft.net/bedrockdedicatedserver/bin-win/",
        }
    }
}

impl Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Product::BedrockLinux => write!(f, "bedrock-linux"),
            Product::BedrockWindows => write!(f, "bedrock-windows"),
        }
    }
}

/// Latest published build of a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: Version,
    pub url: String,
}

impl Release {
    /// Builds a release from an artifact URL whose file name carries the version,
    /// e.g. `.../bedrock-server-1.21.44.01.zip`.
    pub fn from_url<S: Into<String>>(url: S) -> Result<Self, ResolveError> {
        let url = url.into();
        let version = version_from_url(&url)?;
        Ok(Self { version, url })
    }
}

/// Answers "what is the newest build and where is it". No side effects.
#[async_trait]
pub trait VersionResolver: Send + Sync {
    async fn resolve(&self, product: Product) -> Result<Release, ResolveError>;
}

pub fn version_from_url(url: &str) -> Result<Version, ResolveError> {
    let file = url.rsplit('/').next().unwrap_or(url);
    let token = file
        .strip_prefix("bedrock-server-")
        .and_then(|rest| rest.strip_suffix(".zip"))
        .ok_or_else(|| ResolveError::InvalidVersion(url.to_string()))?;

    token
        .parse()
        .map_err(|_| ResolveError::InvalidVersion(url.to_string()))
}

#[cfg(feature = "mc-bedrock")]
mod bedrock {
    use std::time::Duration;

    use async_trait::async_trait;
    use regex::Regex;
    use reqwest::header::{self, HeaderMap, HeaderValue};

    use super::{DOWNLOAD_PAGE, Product, Release, USER_AGENT, VersionResolver};
    use crate::error::ResolveError;

    /// Scrapes the vendor download page for the current artifact link.
    #[derive(Debug, Clone)]
    pub struct BedrockResolver {
        client: reqwest::Client,
        page_url: String,
    }

    impl BedrockResolver {
        pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
            Self::with_page(DOWNLOAD_PAGE, timeout)
        }

        pub fn with_page<S: Into<String>>(page_url: S, timeout: Duration) -> Result<Self, ResolveError> {
            let page_url = page_url.into();
            let mut headers = HeaderMap::new();
            headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
            headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));

            let client = reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .default_headers(headers)
                .timeout(timeout)
                .build()
                .map_err(|e| ResolveError::Network {
                    url: page_url.clone(),
                    reason: e.to_string(),
                })?;

            Ok(Self { client, page_url })
        }

        fn map_err(&self, e: reqwest::Error) -> ResolveError {
            if e.is_timeout() {
                ResolveError::Timeout {
                    url: self.page_url.clone(),
                }
            } else {
                ResolveError::Network {
                    url: self.page_url.clone(),
                    reason: e.to_string(),
                }
            }
        }
    }

    #[async_trait]
    impl VersionResolver for BedrockResolver {
        async fn resolve(&self, product: Product) -> Result<Release, ResolveError> {
            tracing::info!("Connecting to {} to get the latest {} version", self.page_url, product);

            let resp = self
                .client
                .get(&self.page_url)
                .send()
                .await
                .map_err(|e| self.map_err(e))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ResolveError::BadStatus {
                    url: self.page_url.clone(),
                    status: status.as_u16(),
                });
            }

            let body = resp.text().await.map_err(|e| self.map_err(e))?;
            let url = find_download_link(&body, product).ok_or_else(|| ResolveError::LinkNotFound {
                url: self.page_url.clone(),
            })?;

            let release = Release::from_url(url)?;
            tracing::info!("Latest {} build is {}", product, release.version);
            Ok(release)
        }
    }

    pub(super) fn find_download_link(page: &str, product: Product) -> Option<String> {
        let pattern = format!(r#"{}[^"]*"#, regex::escape(product.link_prefix()));
        let re = Regex::new(&pattern).ok()?;
        re.find(page).map(|m| m.as_str().to_string())
    }
}
