/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5001;

/// Maximum text length of a single message, in characters
pub const MAX_TEXT_LEN: usize = 4_000;

/// Maximum request body size, mirrors the 10 MiB JSON limit of the web API
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Outbound queue depth for one realtime connection
pub const CHANNEL_BUFFER: usize = 64;

/// Cookie carrying the session token issued by the auth service
pub const SESSION_COOKIE: &str = "jwt";

/// Query parameter carrying the session token on the WebSocket handshake
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Path of the realtime channel endpoint
pub const CHANNEL_PATH: &str = "/ws";
