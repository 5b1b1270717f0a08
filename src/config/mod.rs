//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    CacheBackend, DEFAULT_COUNT_TTL_SECS, DEFAULT_ENTITY_TTL_SECS, DEFAULT_LIST_TTL_SECS,
    DEFAULT_MEMORY_CAPACITY, DEFAULT_OP_TIMEOUT_MS, MAX_ENTRY_TTL,
};
use crate::relations::{DEFAULT_CHUNK_SIZE, DEFAULT_PARALLEL_THRESHOLD};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quill";
const ENV_PREFIX: &str = "QUILL";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_BACKEND: &str = "memory";
const DEFAULT_MAX_CONCURRENT_LOADS: u64 = 16;
const DEFAULT_LOAD_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_POOL_MAX_IDLE: u64 = 64;
const MAX_CACHE_OP_TIMEOUT_MS: u64 = 60_000;

/// Command-line arguments for the quill binary.
#[derive(Debug, Parser)]
#[command(name = "quill", version, about = "Blog content reader with cached relation loading")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUILL_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Read posts with their category and tags.
    Posts(PostsArgs),
    /// List categories.
    Categories(CategoriesArgs),
    /// List tags.
    Tags(TagsArgs),
    /// Apply pending database migrations.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PostsArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    #[command(subcommand)]
    pub command: PostsCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PostsCommand {
    /// List posts, published only unless a status is given.
    List(PostListArgs),
    /// Show one post by its public id.
    Get(PostGetArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PostListArgs {
    /// Restrict to one status (draft|published|archived); lists any status when `all`.
    #[arg(long, value_name = "STATUS")]
    pub status: Option<String>,

    /// Restrict to one category.
    #[arg(long = "category", value_name = "ID")]
    pub category_id: Option<i32>,

    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    #[arg(long, default_value_t = 20)]
    pub limit: u64,
}

#[derive(Debug, Args, Clone)]
pub struct PostGetArgs {
    #[arg(value_name = "POST_ID")]
    pub post_id: String,
}

#[derive(Debug, Args, Clone)]
pub struct CategoriesArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    /// Only categories that are not deactivated.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub active: bool,

    /// Render the parent/child hierarchy instead of a flat list.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub tree: bool,
}

#[derive(Debug, Args, Clone)]
pub struct TagsArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    /// Only tags with exactly this name.
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the cache backend (redis|memory|disabled).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the ceiling on concurrently running relation loaders.
    #[arg(long = "relations-max-concurrent-loads", value_name = "COUNT")]
    pub relations_max_concurrent_loads: Option<u64>,

    /// Override the relation loading timeout; zero disables it.
    #[arg(long = "relations-load-timeout-ms", value_name = "MILLIS")]
    pub relations_load_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub relations: RelationsSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub entity_ttl: Duration,
    pub list_ttl: Duration,
    pub count_ttl: Duration,
    pub memory_capacity: NonZeroUsize,
    /// Deadline for one cache command; a slower answer is treated as a miss.
    pub op_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RelationsSettings {
    pub max_concurrent_loads: NonZeroUsize,
    pub parallel_assembly_threshold: NonZeroUsize,
    pub assembly_chunk_size: NonZeroUsize,
    /// `None` when disabled with a zero value.
    pub load_timeout: Option<Duration>,
    pub pool_max_idle: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Posts(args) => raw.apply_runtime_overrides(&args.overrides),
        Command::Categories(args) => raw.apply_runtime_overrides(&args.overrides),
        Command::Tags(args) => raw.apply_runtime_overrides(&args.overrides),
        Command::Migrate(args) => raw.apply_database_override(&args.database),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    relations: RawRelationsSettings,
}

impl RawSettings {
    fn apply_runtime_overrides(&mut self, overrides: &RuntimeOverrides) {
        self.apply_database_override(&overrides.database);

        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(max) = overrides.relations_max_concurrent_loads {
            self.relations.max_concurrent_loads = Some(max);
        }
        if let Some(timeout) = overrides.relations_load_timeout_ms {
            self.relations.load_timeout_ms = Some(timeout);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            relations,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            relations: build_relations_settings(relations)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend_name = cache
        .backend
        .unwrap_or_else(|| DEFAULT_CACHE_BACKEND.to_string());
    let backend = match backend_name.trim().to_ascii_lowercase().as_str() {
        "redis" => {
            let url = non_blank(cache.redis_url).ok_or_else(|| {
                LoadError::invalid("cache.redis_url", "required when cache.backend is `redis`")
            })?;
            CacheBackend::Redis { url }
        }
        "memory" => CacheBackend::Memory,
        "disabled" | "none" => CacheBackend::Disabled,
        other => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`; expected redis, memory or disabled"),
            ));
        }
    };

    let entity_ttl = ttl_seconds(
        cache.entity_ttl_seconds.unwrap_or(DEFAULT_ENTITY_TTL_SECS),
        "cache.entity_ttl_seconds",
    )?;
    let list_ttl = ttl_seconds(
        cache.list_ttl_seconds.unwrap_or(DEFAULT_LIST_TTL_SECS),
        "cache.list_ttl_seconds",
    )?;
    let count_ttl = ttl_seconds(
        cache.count_ttl_seconds.unwrap_or(DEFAULT_COUNT_TTL_SECS),
        "cache.count_ttl_seconds",
    )?;
    let memory_capacity = non_zero_usize(
        cache
            .memory_capacity
            .unwrap_or(DEFAULT_MEMORY_CAPACITY as u64),
        "cache.memory_capacity",
    )?;
    let op_timeout_ms = cache.op_timeout_ms.unwrap_or(DEFAULT_OP_TIMEOUT_MS);
    if op_timeout_ms == 0 || op_timeout_ms > MAX_CACHE_OP_TIMEOUT_MS {
        return Err(LoadError::invalid(
            "cache.op_timeout_ms",
            format!("must be between 1 and {MAX_CACHE_OP_TIMEOUT_MS}"),
        ));
    }

    Ok(CacheSettings {
        backend,
        entity_ttl,
        list_ttl,
        count_ttl,
        memory_capacity,
        op_timeout: Duration::from_millis(op_timeout_ms),
    })
}

fn build_relations_settings(
    relations: RawRelationsSettings,
) -> Result<RelationsSettings, LoadError> {
    let max_concurrent_loads = non_zero_usize(
        relations
            .max_concurrent_loads
            .unwrap_or(DEFAULT_MAX_CONCURRENT_LOADS),
        "relations.max_concurrent_loads",
    )?;
    let parallel_assembly_threshold = non_zero_usize(
        relations
            .parallel_assembly_threshold
            .unwrap_or(DEFAULT_PARALLEL_THRESHOLD as u64),
        "relations.parallel_assembly_threshold",
    )?;
    let assembly_chunk_size = non_zero_usize(
        relations
            .assembly_chunk_size
            .unwrap_or(DEFAULT_CHUNK_SIZE as u64),
        "relations.assembly_chunk_size",
    )?;

    let timeout_ms = relations
        .load_timeout_ms
        .unwrap_or(DEFAULT_LOAD_TIMEOUT_MS);
    let load_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));

    let pool_max_idle = usize::try_from(relations.pool_max_idle.unwrap_or(DEFAULT_POOL_MAX_IDLE))
        .map_err(|_| {
            LoadError::invalid(
                "relations.pool_max_idle",
                "value exceeds supported range for usize",
            )
        })?;

    Ok(RelationsSettings {
        max_concurrent_loads,
        parallel_assembly_threshold,
        assembly_chunk_size,
        load_timeout,
        pool_max_idle,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    entity_ttl_seconds: Option<u64>,
    list_ttl_seconds: Option<u64>,
    count_ttl_seconds: Option<u64>,
    memory_capacity: Option<u64>,
    op_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRelationsSettings {
    max_concurrent_loads: Option<u64>,
    parallel_assembly_threshold: Option<u64>,
    assembly_chunk_size: Option<u64>,
    load_timeout_ms: Option<u64>,
    pool_max_idle: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn ttl_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let ttl = Duration::from_secs(value);
    if ttl > MAX_ENTRY_TTL {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {} seconds", MAX_ENTRY_TTL.as_secs()),
        ));
    }
    Ok(ttl)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
