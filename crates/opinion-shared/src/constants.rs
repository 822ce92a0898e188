/// Application name, also the idle window title restored on focus
pub const APP_NAME: &str = "Second Opinion";

/// Window title shown while a message arrived in a background tab
pub const NEW_MESSAGE_TITLE: &str = "New Message!";

/// Path of the WebSocket endpoint on the relay
pub const WS_PATH: &str = "/ws";

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default relay URL for local development clients
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3000/ws";
