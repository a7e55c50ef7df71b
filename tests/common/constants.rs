//! Shared constants for end-to-end tests

// ============================================================================
// Server Configuration
// ============================================================================

/// Secret the test server signs asset URLs with
pub const TEST_SIGNING_SECRET: &[u8] = b"e2e-signing-secret";

/// Feed poll interval used by the test server (milliseconds)
pub const TEST_FEED_POLL_MS: u64 = 25;

// ============================================================================
// Test Inputs
// ============================================================================

/// Relative input path (under `inputs/`) of a spoken-word recording
pub const TALK_INPUT: &str = "e2e/talk.wav";

/// Relative input path (under `inputs/`) of a short video clip
pub const CLIP_INPUT: &str = "e2e/clip.mp4";

/// Bytes uploaded for audio inputs; a WAV header is enough for detection
pub const WAV_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;
