//! Object-store backend configuration.

use std::time::Duration;

use object_store::aws::{AmazonS3, AmazonS3Builder};

use datastream_core::{Error, ErrorConduit, PollSettings, Result};

/// Default number of objects examined per prefix listing.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

/// S3-compatible object store configuration.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Endpoint URL (e.g. a MinIO server). `None` uses AWS.
    pub endpoint: Option<String>,

    /// Bucket region.
    pub region: String,

    /// Access key id.
    pub access_key_id: Option<String>,

    /// Secret access key.
    pub secret_access_key: Option<String>,

    /// Bucket name.
    pub bucket: String,

    /// Allow plain-HTTP endpoints.
    pub allow_http: bool,

    /// Maximum number of objects examined per prefix on each poll.
    pub list_page_size: usize,

    /// Poll loop settings.
    pub poll: PollSettings,
}

impl ObjectStoreConfig {
    /// Create a configuration for the given bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            bucket: bucket.into(),
            allow_http: false,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            poll: PollSettings::default(),
        }
    }

    /// Set a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.allow_http = self.allow_http || endpoint.starts_with("http://");
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set static credentials.
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    /// Allow or forbid plain-HTTP endpoints.
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Set the listing bound per prefix.
    pub fn with_list_page_size(mut self, size: usize) -> Self {
        self.list_page_size = size.max(1);
        self
    }

    /// Set the sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.poll = self.poll.with_interval(interval);
        self
    }

    /// Attach an error conduit.
    pub fn with_error_conduit(mut self, conduit: ErrorConduit) -> Self {
        self.poll = self.poll.with_error_conduit(conduit);
        self
    }

    /// Replace the poll settings.
    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Build an S3 client with path-style addressing.
    pub fn build_s3(&self) -> Result<AmazonS3> {
        if self.bucket.is_empty() {
            return Err(Error::Config("bucket name is required".to_string()));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&self.bucket)
            .with_region(&self.region)
            .with_allow_http(self.allow_http)
            .with_virtual_hosted_style_request(false);

        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key) = &self.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &self.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        builder
            .build()
            .map_err(|e| Error::Config(format!("failed to configure bucket {}: {}", self.bucket, e)))
    }
}
