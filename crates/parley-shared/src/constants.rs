/// Application name
pub const APP_NAME: &str = "Parley";

/// Default base URL of the remote message log service
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:4000";

/// Default interval between delta fetches for the active channel, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Prefix of every direct-channel canonical key
pub const DIRECT_KEY_PREFIX: &str = "dm:";

/// Separator between the two participants inside a canonical key
pub const DIRECT_KEY_SEPARATOR: char = ',';

/// Query parameter carrying the cursor on delta fetches
pub const SINCE_ID_PARAM: &str = "sinceId";
