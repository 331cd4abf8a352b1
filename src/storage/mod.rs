use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, path::Path as ObjectPath, Attribute,
    Attributes, ObjectStore, PutOptions, PutPayload,
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum S3Vendor {
    #[default]
    AWS,
    Minio,
    DigitalOcean,
    Wasabi,
    Backblaze,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        path: String,
        public_url: Option<String>,
    },
    S3 {
        #[serde(default)]
        vendor: S3Vendor,
        bucket: String,
        region: String,
        access_key: String,
        secret_key: String,
        endpoint: Option<String>,
        prefix: Option<String>,
        public_url: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            path: "recordings".to_string(),
            public_url: None,
        }
    }
}

pub struct StoredObject {
    pub size: u64,
    pub stream: BoxStream<'static, object_store::Result<Bytes>>,
}

/// Recording archive on local disk or an S3-compatible bucket.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<dyn ObjectStore>,
    prefix: String,
    is_local: bool,
    local_root: Option<PathBuf>,
    public_base: Option<String>,
}

impl Storage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        match config {
            StorageConfig::Local { path, public_url } => {
                let root = PathBuf::from(path);
                std::fs::create_dir_all(&root)
                    .with_context(|| format!("create storage directory {}", path))?;
                let store = LocalFileSystem::new_with_prefix(&root)?;
                Ok(Self {
                    inner: Arc::new(store),
                    prefix: "".to_string(),
                    is_local: true,
                    local_root: Some(root),
                    public_base: public_url.clone(),
                })
            }
            StorageConfig::S3 {
                vendor,
                bucket,
                region,
                access_key,
                secret_key,
                endpoint,
                prefix,
                public_url,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_region(region)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key);

                if let Some(ep) = endpoint.as_deref().filter(|ep| !ep.is_empty()) {
                    builder = builder.with_endpoint(ep);
                }
                if *vendor != S3Vendor::AWS {
                    builder = builder.with_virtual_hosted_style_request(false);
                }

                let public_base = public_url.clone().or_else(|| match vendor {
                    S3Vendor::AWS => Some(format!("https://{}.s3.{}.amazonaws.com", bucket, region)),
                    _ => None,
                });

                Ok(Self {
                    inner: Arc::new(builder.build()?),
                    prefix: prefix.clone().unwrap_or_default(),
                    is_local: false,
                    local_root: None,
                    public_base,
                })
            }
        }
    }

    fn normalize_path(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), path)
        }
    }

    fn object_path(&self, path: &str) -> ObjectPath {
        ObjectPath::from(self.normalize_path(path))
    }

    /// Writes `bytes` and returns the key relative to the configured prefix,
    /// which doubles as the storage file id.
    pub async fn write(&self, path: &str, bytes: Bytes, content_type: Option<&str>) -> Result<String> {
        if let Some(parent) = self.local_path(path).as_ref().and_then(|p| p.parent()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let object_path = self.object_path(path);
        let mut opts = PutOptions::default();
        // the local backend rejects attributes
        if let (false, Some(content_type)) = (self.is_local, content_type) {
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
            opts.attributes = attributes;
        }
        self.inner
            .put_opts(&object_path, PutPayload::from(bytes), opts)
            .await
            .with_context(|| format!("put {}", object_path))?;
        Ok(path.trim_start_matches('/').to_string())
    }

    /// Opens an object as a byte stream together with its size.
    pub async fn read_stream(&self, path: &str) -> Result<StoredObject> {
        let object_path = self.object_path(path);
        let result = self
            .inner
            .get(&object_path)
            .await
            .with_context(|| format!("get {}", object_path))?;
        Ok(StoredObject {
            size: result.meta.size as u64,
            stream: result.into_stream(),
        })
    }

    /// Public read URL for an object. Fails when no public endpoint is known
    /// for this backend.
    pub fn public_url(&self, path: &str) -> Result<String> {
        let base = self
            .public_base
            .as_deref()
            .ok_or_else(|| anyhow!("storage has no public url configured"))?;
        let key = self
            .normalize_path(path)
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!("{}/{}", base.trim_end_matches('/'), key))
    }

    pub fn local_path(&self, path: &str) -> Option<PathBuf> {
        self.local_root
            .as_ref()
            .map(|root| root.join(path.trim_start_matches('/')))
    }
}
