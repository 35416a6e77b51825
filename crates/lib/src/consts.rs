/// Application name used for data directories and environment variable prefixes.
pub const APP_NAME: &str = "keel";

/// Version written into every state file. Files with a newer version are rejected.
pub const STATE_VERSION: u32 = 1;

/// State file name inside the state directory.
pub const STATE_FILENAME: &str = "state.json";

/// Lock file name inside the state directory.
pub const LOCK_FILENAME: &str = ".lock";

/// Placeholder printed wherever a secret value would otherwise be shown.
pub const SECRET_MASK: &str = "[secret]";

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "KEEL_STATE_DIR";

/// Environment variable naming the provider config file.
pub const PROVIDER_CONFIG_ENV: &str = "KEEL_PROVIDER_CONFIG";

/// Provider config file looked up next to the program.
pub const PROVIDER_CONFIG_FILENAME: &str = "provider.json";

/// Directory under the state directory used by the local provider by default.
pub const LOCAL_PROVIDER_DIRNAME: &str = "local-provider";
