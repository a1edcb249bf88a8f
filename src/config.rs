use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use gridfs_store::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_BUFFERED_LEN, DEFAULT_MAX_WORKERS};
use sqlx::sqlite::SqliteSynchronous;
use std::{env, fmt::Display, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub bucket: String,
    pub chunk_size: u32,
    pub max_workers: usize,
    pub max_buffered_len: u64,
    pub write_durability: WriteDurability,
}

/// How hard SQLite works to make a committed write survive a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WriteDurability {
    Off,
    Normal,
    Full,
    Extra,
}

impl WriteDurability {
    pub fn synchronous(self) -> SqliteSynchronous {
        match self {
            WriteDurability::Off => SqliteSynchronous::Off,
            WriteDurability::Normal => SqliteSynchronous::Normal,
            WriteDurability::Full => SqliteSynchronous::Full,
            WriteDurability::Extra => SqliteSynchronous::Extra,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked blob store with ranged reads and writes")]
pub struct Args {
    /// Host to bind to (overrides GRIDFS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GRIDFS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides GRIDFS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket name; collections are `<bucket>.files` and `<bucket>.chunks` (overrides GRIDFS_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Chunk size in bytes for new files (overrides GRIDFS_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u32>,

    /// Concurrent bucket operations (overrides GRIDFS_MAX_WORKERS)
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Largest read served from memory (overrides GRIDFS_MAX_BUFFERED_LEN)
    #[arg(long)]
    pub max_buffered_len: Option<u64>,

    /// SQLite synchronous level for writes (overrides GRIDFS_WRITE_DURABILITY)
    #[arg(long, value_enum)]
    pub write_durability: Option<WriteDurability>,

    /// Create the bucket collections and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("GRIDFS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("GRIDFS_PORT", 3000u16)?;
        let env_db = env::var("GRIDFS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/gridfs.db".into());
        let env_bucket = env::var("GRIDFS_BUCKET").unwrap_or_else(|_| "fs".into());
        let env_chunk_size = env_parse("GRIDFS_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let env_workers = env_parse("GRIDFS_MAX_WORKERS", DEFAULT_MAX_WORKERS)?;
        let env_buffered = env_parse("GRIDFS_MAX_BUFFERED_LEN", DEFAULT_MAX_BUFFERED_LEN)?;
        let env_durability = match env::var("GRIDFS_WRITE_DURABILITY") {
            Ok(value) => <WriteDurability as ValueEnum>::from_str(&value, true)
                .map_err(|err| anyhow!("parsing GRIDFS_WRITE_DURABILITY value `{}`: {}", value, err))?,
            Err(env::VarError::NotPresent) => WriteDurability::Full,
            Err(err) => return Err(err).context("reading GRIDFS_WRITE_DURABILITY"),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            chunk_size: args.chunk_size.unwrap_or(env_chunk_size),
            max_workers: args.max_workers.unwrap_or(env_workers),
            max_buffered_len: args.max_buffered_len.unwrap_or(env_buffered),
            write_durability: args.write_durability.unwrap_or(env_durability),
        };

        if cfg.chunk_size == 0 {
            anyhow::bail!("chunk size must be positive");
        }
        if cfg.max_workers == 0 {
            anyhow::bail!("max workers must be positive");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", name, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_defaults_when_unset() {
        let value = env_parse("GRIDFS_TEST_UNSET_VARIABLE", 7u32).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_durability_maps_to_sqlite_levels() {
        assert!(matches!(
            WriteDurability::Off.synchronous(),
            SqliteSynchronous::Off
        ));
        assert!(matches!(
            <WriteDurability as ValueEnum>::from_str("FULL", true).unwrap().synchronous(),
            SqliteSynchronous::Full
        ));
    }
}
