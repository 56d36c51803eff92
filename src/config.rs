use crate::backends::{managed_media::ManagedMediaSettings, ObjectStoreSettings};
use crate::models::{BackendKind, Category};
use crate::services::{
    orchestrator::{OrchestratorSettings, MAX_WORKER_POOL_SIZE},
    validator::{UploadPolicy, MIB},
};
use anyhow::{bail, Result};
use clap::Parser;
use std::{path::PathBuf, time::Duration};

/// Centralized application configuration.
/// Built once from CLI arguments and `UPLOAD_VAULT_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub default_provider: BackendKind,
    pub upload_dir: PathBuf,
    pub public_path: String,
    pub s3: Option<ObjectStoreSettings>,
    pub media: Option<ManagedMediaSettings>,
    pub policy: UploadPolicy,
    pub orchestrator: OrchestratorSettings,
    pub signed_url_expiry_secs: u64,
    pub reconcile_interval: Option<Duration>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Unified file upload and storage service")]
pub struct Args {
    /// Host to bind to
    #[arg(long, env = "UPLOAD_VAULT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind to
    #[arg(long, env = "UPLOAD_VAULT_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Metadata registry URL
    #[arg(
        long,
        env = "UPLOAD_VAULT_DATABASE_URL",
        default_value = "sqlite://./data/meta/upload_vault.db"
    )]
    pub database_url: String,

    /// Provider used when a request names none (local, object-store, managed-media)
    #[arg(long, env = "UPLOAD_VAULT_DEFAULT_PROVIDER", default_value = "local")]
    pub default_provider: BackendKind,

    /// Root directory of the local backend
    #[arg(long, env = "UPLOAD_VAULT_UPLOAD_DIR", default_value = "./data/uploads")]
    pub upload_dir: PathBuf,

    /// URL path under which local files are served
    #[arg(long, env = "UPLOAD_VAULT_PUBLIC_PATH", default_value = "/uploads")]
    pub public_path: String,

    /// S3 bucket; the object-store backend is disabled when unset
    #[arg(long, env = "UPLOAD_VAULT_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "UPLOAD_VAULT_S3_REGION", default_value = "eu-west-3")]
    pub s3_region: String,

    /// Custom S3-compatible endpoint (MinIO, R2, ...)
    #[arg(long, env = "UPLOAD_VAULT_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// CDN or bucket URL used for public objects
    #[arg(long, env = "UPLOAD_VAULT_S3_PUBLIC_BASE_URL")]
    pub s3_public_base_url: Option<String>,

    #[arg(long, env = "UPLOAD_VAULT_MULTIPART_THRESHOLD_BYTES", default_value_t = 10 * MIB)]
    pub multipart_threshold_bytes: u64,

    #[arg(long, env = "UPLOAD_VAULT_MULTIPART_PART_BYTES", default_value_t = 10 * MIB)]
    pub multipart_part_bytes: u64,

    /// Managed media cloud name; the managed-media backend is disabled when unset
    #[arg(long, env = "UPLOAD_VAULT_MEDIA_CLOUD_NAME")]
    pub media_cloud_name: Option<String>,

    #[arg(long, env = "UPLOAD_VAULT_MEDIA_API_KEY")]
    pub media_api_key: Option<String>,

    #[arg(long, env = "UPLOAD_VAULT_MEDIA_API_SECRET", hide_env_values = true)]
    pub media_api_secret: Option<String>,

    #[arg(
        long,
        env = "UPLOAD_VAULT_MEDIA_API_BASE_URL",
        default_value = "https://api.cloudinary.com"
    )]
    pub media_api_base_url: String,

    #[arg(
        long,
        env = "UPLOAD_VAULT_MEDIA_DELIVERY_BASE_URL",
        default_value = "https://res.cloudinary.com"
    )]
    pub media_delivery_base_url: String,

    #[arg(long, env = "UPLOAD_VAULT_MEDIA_DEFAULT_FOLDER")]
    pub media_default_folder: Option<String>,

    #[arg(long, env = "UPLOAD_VAULT_AUDIO_MAX_BYTES", default_value_t = 500 * MIB)]
    pub audio_max_bytes: u64,

    #[arg(long, env = "UPLOAD_VAULT_VIDEO_MAX_BYTES", default_value_t = 500 * MIB)]
    pub video_max_bytes: u64,

    #[arg(long, env = "UPLOAD_VAULT_DOCUMENT_MAX_BYTES", default_value_t = 50 * MIB)]
    pub document_max_bytes: u64,

    #[arg(long, env = "UPLOAD_VAULT_IMAGE_MAX_BYTES", default_value_t = 20 * MIB)]
    pub image_max_bytes: u64,

    /// Comma-separated overrides of the built-in allow-lists
    #[arg(long, env = "UPLOAD_VAULT_AUDIO_MIME_TYPES", value_delimiter = ',')]
    pub audio_mime_types: Vec<String>,

    #[arg(long, env = "UPLOAD_VAULT_AUDIO_EXTENSIONS", value_delimiter = ',')]
    pub audio_extensions: Vec<String>,

    #[arg(long, env = "UPLOAD_VAULT_VIDEO_MIME_TYPES", value_delimiter = ',')]
    pub video_mime_types: Vec<String>,

    #[arg(long, env = "UPLOAD_VAULT_VIDEO_EXTENSIONS", value_delimiter = ',')]
    pub video_extensions: Vec<String>,

    #[arg(long, env = "UPLOAD_VAULT_DOCUMENT_MIME_TYPES", value_delimiter = ',')]
    pub document_mime_types: Vec<String>,

    #[arg(long, env = "UPLOAD_VAULT_DOCUMENT_EXTENSIONS", value_delimiter = ',')]
    pub document_extensions: Vec<String>,

    #[arg(long, env = "UPLOAD_VAULT_IMAGE_MIME_TYPES", value_delimiter = ',')]
    pub image_mime_types: Vec<String>,

    #[arg(long, env = "UPLOAD_VAULT_IMAGE_EXTENSIONS", value_delimiter = ',')]
    pub image_extensions: Vec<String>,

    /// Concurrent uploads per batch (1-64)
    #[arg(long, env = "UPLOAD_VAULT_WORKER_POOL_SIZE", default_value_t = 4)]
    pub worker_pool_size: usize,

    #[arg(long, env = "UPLOAD_VAULT_MAX_BATCH_FILES", default_value_t = 10)]
    pub max_batch_files: usize,

    #[arg(long, env = "UPLOAD_VAULT_BACKEND_TIMEOUT_SECS", default_value_t = 30)]
    pub backend_timeout_secs: u64,

    #[arg(long, env = "UPLOAD_VAULT_SIGNED_URL_EXPIRY_SECS", default_value_t = 3600)]
    pub signed_url_expiry_secs: u64,

    /// Seconds between tombstone reconciliation passes; 0 disables
    #[arg(long, env = "UPLOAD_VAULT_RECONCILE_INTERVAL_SECS", default_value_t = 300)]
    pub reconcile_interval_secs: u64,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    pub fn from_args(args: Args) -> Result<Self> {
        if args.backend_timeout_secs == 0 {
            bail!("backend timeout must be at least one second");
        }
        if args.public_path.trim_matches('/').is_empty() {
            bail!("public path must not be empty");
        }
        if args.multipart_part_bytes < 5 * MIB {
            bail!("multipart part size must be at least 5 MiB");
        }

        let mut policy = UploadPolicy::default()
            .with_max_bytes(Category::Audio, args.audio_max_bytes)
            .with_max_bytes(Category::Video, args.video_max_bytes)
            .with_max_bytes(Category::Document, args.document_max_bytes)
            .with_max_bytes(Category::Image, args.image_max_bytes);
        let overrides = [
            (Category::Audio, &args.audio_mime_types, &args.audio_extensions),
            (Category::Video, &args.video_mime_types, &args.video_extensions),
            (Category::Document, &args.document_mime_types, &args.document_extensions),
            (Category::Image, &args.image_mime_types, &args.image_extensions),
        ];
        for (category, mime_types, extensions) in overrides {
            if !mime_types.is_empty() {
                policy = policy.with_mime_types(category, mime_types);
            }
            if !extensions.is_empty() {
                policy = policy.with_extensions(category, extensions);
            }
        }

        let s3 = args.s3_bucket.clone().map(|bucket| ObjectStoreSettings {
            bucket,
            region: args.s3_region.clone(),
            endpoint: args.s3_endpoint.clone(),
            public_base_url: args.s3_public_base_url.clone(),
            multipart_threshold: to_usize(args.multipart_threshold_bytes),
            part_size: to_usize(args.multipart_part_bytes),
        });

        let media = match (
            args.media_cloud_name.clone(),
            args.media_api_key.clone(),
            args.media_api_secret.clone(),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(ManagedMediaSettings {
                cloud_name,
                api_key,
                api_secret,
                api_base_url: args.media_api_base_url.clone(),
                delivery_base_url: args.media_delivery_base_url.clone(),
                root_folder: args.media_default_folder.clone(),
            }),
            (None, None, None) => None,
            _ => bail!("managed media needs cloud name, api key and api secret together"),
        };

        let configured = match args.default_provider {
            BackendKind::Local => true,
            BackendKind::ObjectStore => s3.is_some(),
            BackendKind::ManagedMedia => media.is_some(),
        };
        if !configured {
            bail!("default provider `{}` is not configured", args.default_provider);
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            database_url: args.database_url,
            default_provider: args.default_provider,
            upload_dir: args.upload_dir,
            public_path: args.public_path,
            s3,
            media,
            policy,
            orchestrator: OrchestratorSettings {
                worker_pool_size: args.worker_pool_size.clamp(1, MAX_WORKER_POOL_SIZE),
                max_batch_files: args.max_batch_files.max(1),
                backend_timeout: Duration::from_secs(args.backend_timeout_secs),
            },
            signed_url_expiry_secs: args.signed_url_expiry_secs,
            reconcile_interval: (args.reconcile_interval_secs > 0)
                .then(|| Duration::from_secs(args.reconcile_interval_secs)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Largest request body the upload routes accept.
    pub fn body_limit(&self) -> usize {
        to_usize(self.policy.largest_limit())
            .saturating_mul(self.orchestrator.max_batch_files)
            .saturating_add(to_usize(MIB))
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}
