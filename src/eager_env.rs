use std::env;
use std::sync::LazyLock;

macro_rules! define_env_vars {
    ($(($name:ident, $env_name:expr, $type:ty $(, $default:expr)?)),* $(,)?) => {
        $(
            pub static $name: LazyLock<$type> = LazyLock::new(|| {
                #[allow(unused_mut, unused_assignments)]
                let mut default: Option<$type> = None;
                $( default = Some($default.into()); )?

                // Runtime environment first, then the `.env` value baked in at build time
                let val = match env::var($env_name)
                    .ok()
                    .or_else(|| option_env!($env_name).map(str::to_string))
                {
                    Some(val) => val,
                    None => {
                        return default.unwrap_or_else(|| {
                            panic!("Missing required environment variable: {}", $env_name)
                        })
                    }
                };
                val.parse::<$type>().unwrap_or_else(|_| {
                    panic!(
                        "Failed to parse environment variable {} with value '{}' as {}",
                        $env_name,
                        val,
                        stringify!($type)
                    )
                })
            });
        )*

        /// Force initialization of all environment variables at startup
        /// Call this early in main() to fail fast if any env vars are missing
        pub fn check_env() {
            $(
                let _ = &*$name;
            )*
        }
    };
}

// Define all environment variables
define_env_vars!(
    (ENVIRONMENT, "ENVIRONMENT", String, "development"),
    (IP, "IP", String, ""),
    (RPC_PORT, "RPC_PORT", u16, 8100u16),
    (HTTP_PORT, "HTTP_PORT", u16, 8101u16),
    (DATABASE_NODE_URLS, "DATABASE_NODE_URLS", String),
    (DATABASE_KEYSPACE, "DATABASE_KEYSPACE", String),
    (REGISTRATION_PREFIX, "REGISTRATION_PREFIX", String, "pattern_servers"),
    (DISK_BASE_DIR, "DISK_BASE_DIR", String),
    (BUCKET_NAME, "BUCKET_NAME", String),
    (BUCKET_NAME_V2, "BUCKET_NAME_V2", String),
    (USE_BUCKET_V2, "USE_BUCKET_V2", bool, false),
    (PROJECT_IDS_V2, "PROJECT_IDS_V2", String, ""),
    (
        CLOUD_STORAGE_ENDPOINT,
        "CLOUD_STORAGE_ENDPOINT",
        String,
        "https://storage.googleapis.com"
    ),
    (CLOUD_STORAGE_TOKEN, "CLOUD_STORAGE_TOKEN", String, ""),
    (CHUNK_CACHE_SIZE, "CHUNK_CACHE_SIZE", usize, 5usize),
    (EVENT_INFO_CACHE_SIZE, "EVENT_INFO_CACHE_SIZE", usize, 10usize),
    (LEASE_TTL_SECONDS, "LEASE_TTL_SECONDS", u64, 10u64),
    (WATCH_INTERVAL_SECONDS, "WATCH_INTERVAL_SECONDS", u64, 5u64),
    (SCATTER_TIMEOUT_SECONDS, "SCATTER_TIMEOUT_SECONDS", u64, 600u64),
);
