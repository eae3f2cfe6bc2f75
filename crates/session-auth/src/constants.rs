//! Endpoint, route and storage slot names

/// Refresh endpoint, relative to the API base URL.
pub const DEFAULT_REFRESH_PATH: &str = "refresh";

/// Route the client is sent to when the session cannot be renewed.
pub const DEFAULT_LOGIN_ROUTE: &str = "/auth/login";

/// Query flag on the refresh call telling downstream layers not to attach
/// the access token to it.
pub const SKIP_AUTHORIZATION_PARAM: (&str, &str) = ("authorization", "false");

/// Storage slot holding the access token.
pub const ACCESS_TOKEN_SLOT: &str = "accessToken";

/// Storage slot holding the refresh token. Never rewritten by the refresh flow.
pub const REFRESH_TOKEN_SLOT: &str = "refreshToken";
