//! Default values for ssecheck configuration.
//!
//! All hardcoded defaults are centralized here for easy maintenance.

// ============================================================================
// Test Service Defaults
// ============================================================================

/// How long to keep polling the test service before giving up (5 s).
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 5_000;

/// Initial delay between status queries while the test service starts.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Upper bound for the doubling poll delay.
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Listener Defaults
// ============================================================================

/// Hostname the test service uses to reach the harness.
pub const DEFAULT_HOST: &str = "localhost";

/// Port the harness listens on.
pub const DEFAULT_PORT: u16 = 8111;

/// How long to wait for our own listener to answer `HEAD /` (10 s).
pub const DEFAULT_LISTENER_READY_TIMEOUT_MS: u64 = 10_000;

/// Delay between readiness probes of our own listener.
pub const DEFAULT_LISTENER_PROBE_INTERVAL_MS: u64 = 10;

// ============================================================================
// Wait Defaults
// ============================================================================

/// How long a test waits for the test service to open a stream.
pub const DEFAULT_AWAIT_CONNECTION_TIMEOUT_MS: u64 = 5_000;

/// How long a test waits for a callback from the test service.
pub const DEFAULT_AWAIT_MESSAGE_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// Queue Defaults
// ============================================================================

/// Capacity of each endpoint's new-connection notification queue.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// Capacity of each stream connection's chunk queue.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1_000;

/// Callbacks released to a test but not yet read, before the test service is held back.
pub const DEFAULT_CALLBACK_CAPACITY: usize = 100;

// ============================================================================
// Paths
// ============================================================================

/// Project-local config file name.
pub const CONFIG_FILE_NAME: &str = "ssecheck.toml";

/// Directory under the user config dir.
pub const CONFIG_DIR_NAME: &str = "ssecheck";

/// Path prefix under which mock endpoints are served.
pub const ENDPOINT_PATH_PREFIX: &str = "/endpoints/";
