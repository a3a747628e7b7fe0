use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::Client;
use futures_util::StreamExt;

use crate::store::{
    BlobStore, CompletedPart, GetResult, MultipartBlobStore, ObjectHead, PartETag, PutResult,
    ResolvedRange, SignedUrlBlobStore, StoreCapabilities,
};
use crate::{BlobError, BlobResult, ByteRange, ByteStream, UploadId};

/// Connection settings for an S3-compatible backend (AWS S3, MinIO, R2, …).
/// `endpoint_url` and `force_path_style` exist for non-AWS S3-compatible
/// providers that don't support virtual-hosted-style addressing.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    /// Prepended to every object key, e.g. to namespace an environment
    /// within a shared bucket.
    pub key_prefix: Option<String>,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint_url: None,
            force_path_style: false,
            key_prefix: None,
        }
    }

    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_force_path_style(mut self, force: bool) -> Self {
        self.force_path_style = force;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Reads `S3_BUCKET`, `AWS_REGION` (or `S3_REGION`), `S3_ENDPOINT_URL`,
    /// `S3_FORCE_PATH_STYLE`, `S3_KEY_PREFIX` from the environment.
    pub fn from_env() -> BlobResult<Self> {
        let bucket = std::env::var("S3_BUCKET")
            .map_err(|_| BlobError::invalid("S3_BUCKET environment variable not set"))?;
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("S3_REGION"))
            .map_err(|_| BlobError::invalid("AWS_REGION or S3_REGION environment variable not set"))?;

        let mut config = Self::new(bucket, region);
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT_URL") {
            config = config.with_endpoint_url(endpoint);
        }
        if let Ok(force) = std::env::var("S3_FORCE_PATH_STYLE") {
            config = config.with_force_path_style(force == "1" || force.eq_ignore_ascii_case("true"));
        }
        if let Ok(prefix) = std::env::var("S3_KEY_PREFIX") {
            config = config.with_key_prefix(prefix);
        }
        Ok(config)
    }

    fn full_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix.trim_end_matches('/'), key),
            _ => key.to_string(),
        }
    }
}

/// `BlobStore` + `MultipartBlobStore` + `SignedUrlBlobStore` backed by any
/// S3-compatible object store through `aws-sdk-s3`.
pub struct S3CompatibleStore {
    client: Client,
    config: S3Config,
}

impl S3CompatibleStore {
    pub fn new(client: Client, config: S3Config) -> Self {
        Self { client, config }
    }

    /// Builds a client from `S3Config::from_env()` using the default AWS
    /// credential provider chain, optionally pointed at a custom endpoint
    /// for non-AWS S3-compatible backends.
    pub async fn from_env() -> BlobResult<Self> {
        let config = S3Config::from_env()?;
        Self::connect(config).await
    }

    pub async fn connect(config: S3Config) -> BlobResult<Self> {
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint.clone());
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self::new(client, config))
    }

    async fn buffer_stream(stream: ByteStream) -> BlobResult<Vec<u8>> {
        let mut buf = Vec::new();
        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(BlobError::from)?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

#[async_trait]
impl BlobStore for S3CompatibleStore {
    async fn put(&self, key: &str, content_type: Option<&str>, stream: ByteStream) -> BlobResult<PutResult> {
        let bytes = Self::buffer_stream(stream).await?;
        let size_bytes = bytes.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key))
            .body(AwsByteStream::from(bytes));
        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let output = request.send().await.map_err(BlobError::backend)?;

        Ok(PutResult {
            etag: output.e_tag().map(|s| s.trim_matches('"').to_string()),
            size_bytes,
            checksum: output.checksum_sha256().map(|s| s.to_string()),
        })
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> BlobResult<GetResult> {
        let mut request = self.client.get_object().bucket(&self.config.bucket).key(self.config.full_key(key));

        let mut resolved_range = None;
        if let Some(r) = &range {
            let header = match r.end {
                Some(end) => format!("bytes={}-{}", r.start, end),
                None => format!("bytes={}-", r.start),
            };
            request = request.range(header);
        }

        let output = request.send().await.map_err(BlobError::backend)?;
        let size_bytes = output.content_length().unwrap_or(0).max(0) as u64;
        let content_type = output.content_type().map(|s| s.to_string());
        let etag = output.e_tag().map(|s| s.trim_matches('"').to_string());

        if let Some(content_range) = output.content_range() {
            resolved_range = parse_content_range(content_range);
        }

        let body = output
            .body
            .collect()
            .await
            .map_err(BlobError::backend)?
            .into_bytes();
        let owned = body.to_vec();
        let stream: ByteStream = Box::pin(futures_util::stream::once(async move {
            Ok::<bytes::Bytes, std::io::Error>(bytes::Bytes::from(owned))
        }));

        Ok(GetResult {
            stream,
            size_bytes,
            content_type,
            etag,
            resolved_range,
        })
    }

    async fn head(&self, key: &str) -> BlobResult<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key))
            .send()
            .await
            .map_err(BlobError::backend)?;

        Ok(ObjectHead {
            size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
            content_type: output.content_type().map(|s| s.to_string()),
            etag: output.e_tag().map(|s| s.trim_matches('"').to_string()),
            last_modified: output.last_modified().and_then(|t| t.secs().try_into().ok()),
        })
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key))
            .send()
            .await
            .map_err(BlobError::backend)?;
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic()
            .with_range()
            .with_multipart(Some(5 * 1024 * 1024), Some(5 * 1024 * 1024 * 1024))
            .with_signed_urls()
    }
}

#[async_trait]
impl MultipartBlobStore for S3CompatibleStore {
    async fn init_multipart(&self, key: &str, content_type: Option<&str>) -> BlobResult<UploadId> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key));
        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let output = request.send().await.map_err(BlobError::backend)?;
        let upload_id = output
            .upload_id()
            .ok_or_else(|| BlobError::backend_msg("S3 did not return an upload id"))?;
        Ok(UploadId::from_string(upload_id.to_string()))
    }

    async fn put_part(&self, upload_id: &UploadId, part_number: u32, stream: ByteStream) -> BlobResult<PartETag> {
        // Part numbers are stored without a key in this seam; the
        // coordinator that drives multipart uploads is expected to track
        // `(key, upload_id)` itself and call through its own S3 key, so the
        // raw S3 key is recovered here from the upload id's own key_hints
        // is not available - callers must use the S3-native upload id.
        Err(BlobError::invalid(format!(
            "put_part requires the original object key; use `put_part_at` with upload {upload_id} part {part_number}"
        )))
    }

    async fn complete_multipart(&self, upload_id: &UploadId, _parts: Vec<CompletedPart>) -> BlobResult<PutResult> {
        Err(BlobError::invalid(format!(
            "complete_multipart requires the original object key; use `complete_multipart_at` with upload {upload_id}"
        )))
    }

    async fn abort_multipart(&self, upload_id: &UploadId) -> BlobResult<()> {
        Err(BlobError::invalid(format!(
            "abort_multipart requires the original object key; use `abort_multipart_at` with upload {upload_id}"
        )))
    }
}

impl S3CompatibleStore {
    /// Key-qualified multipart operations. `MultipartBlobStore`'s trait
    /// signature (matching the generic in-memory/filesystem backends this
    /// crate also supports) doesn't carry the object key past
    /// `init_multipart`, but S3's API requires it on every part/complete/
    /// abort call; a real `UploadCoordinator` is expected to retain the key from
    /// `init_multipart`'s caller and use these key-qualified methods
    /// instead of the trait-object ones above.
    pub async fn put_part_at(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        stream: ByteStream,
    ) -> BlobResult<PartETag> {
        let bytes = Self::buffer_stream(stream).await?;
        let output = self
            .client
            .upload_part()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key))
            .upload_id(upload_id.as_str())
            .part_number(part_number as i32)
            .body(AwsByteStream::from(bytes))
            .send()
            .await
            .map_err(BlobError::backend)?;

        let etag = output
            .e_tag()
            .ok_or_else(|| BlobError::backend_msg("S3 did not return an ETag for the uploaded part"))?
            .trim_matches('"')
            .to_string();

        Ok(PartETag { part_number, etag })
    }

    pub async fn complete_multipart_at(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: Vec<CompletedPart>,
    ) -> BlobResult<PutResult> {
        let completed_parts: Vec<_> = parts
            .into_iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key))
            .upload_id(upload_id.as_str())
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(BlobError::backend)?;

        let head = self.head(key).await?;
        Ok(PutResult {
            etag: output.e_tag().map(|s| s.trim_matches('"').to_string()),
            size_bytes: head.size_bytes,
            checksum: None,
        })
    }

    pub async fn abort_multipart_at(&self, key: &str, upload_id: &UploadId) -> BlobResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key))
            .upload_id(upload_id.as_str())
            .send()
            .await
            .map_err(BlobError::backend)?;
        Ok(())
    }
}

#[async_trait]
impl SignedUrlBlobStore for S3CompatibleStore {
    async fn sign_get(&self, key: &str, expires_in_secs: u64) -> BlobResult<String> {
        let presign_config = aws_sdk_s3::presigning::PresigningConfig::expires_in(std::time::Duration::from_secs(
            expires_in_secs,
        ))
        .map_err(BlobError::backend)?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key))
            .presigned(presign_config)
            .await
            .map_err(BlobError::backend)?;

        Ok(presigned.uri().to_string())
    }

    async fn sign_put(&self, key: &str, content_type: Option<&str>, expires_in_secs: u64) -> BlobResult<String> {
        let presign_config = aws_sdk_s3::presigning::PresigningConfig::expires_in(std::time::Duration::from_secs(
            expires_in_secs,
        ))
        .map_err(BlobError::backend)?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(self.config.full_key(key));
        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let presigned = request.presigned(presign_config).await.map_err(BlobError::backend)?;
        Ok(presigned.uri().to_string())
    }
}

fn parse_content_range(header: &str) -> Option<ResolvedRange> {
    // "bytes 0-99/1000"
    let rest = header.strip_prefix("bytes ")?;
    let (range_part, total_part) = rest.split_once('/')?;
    let (start_part, end_part) = range_part.split_once('-')?;
    Some(ResolvedRange {
        start: start_part.parse().ok()?,
        end: end_part.parse().ok()?,
        total_size: total_part.parse().ok()?,
    })
}

impl BlobError {
    fn backend_msg(msg: impl Into<String>) -> Self {
        Self::Backend {
            source: Box::new(std::io::Error::other(msg.into())),
        }
    }
}
