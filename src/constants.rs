/// Canonical upstream path for the responses endpoint
pub const RESPONSES_PATH: &str = "/codex/v1/responses";

/// Bare alias accepted from clients, rewritten to [`RESPONSES_PATH`] upstream
pub const RESPONSES_ALIAS_PATH: &str = "/v1/responses";

/// Session identifier headers, in lookup priority order. The resolved
/// identifier is written back to all three on the outbound request.
pub const SESSION_HEADERS: [&str; 3] = ["x-session-id", "conversation_id", "session_id"];

/// Cache key headers, in lookup priority order
pub const CACHE_KEY_HEADERS: [&str; 2] = ["x-prompt-cache-key", "prompt_cache_key"];

/// Cookie holding a previously issued session identifier
pub const SESSION_COOKIE: &str = "codex_session_id";

/// JSON body field normalized on requests and overridden on responses
pub const CACHE_KEY_FIELD: &str = "prompt_cache_key";

/// SSE sentinel payload that ends a stream; never parsed as JSON
pub const SSE_DONE: &str = "[DONE]";
