//! Client bootstrap script injected into rewritten documents.
//!
//! The script publishes `window.__BRIDGE_PREFIX__`, `window.__BRIDGE_TARGET__`,
//! `window.__BRIDGE_WS_PATH__` and `window.__BRIDGE_BASE__`, reroutes `fetch`, `XMLHttpRequest.open`,
//! `WebSocket` and `Worker` through the relay, turns download links into
//! relayed navigations and stubs the usual analytics globals.

const TEMPLATE: &str = include_str!("../../assets/bootstrap.js");

const PREFIX_SLOT: &str = "\"{{RELAY_PREFIX}}\"";
const TARGET_SLOT: &str = "\"{{RELAY_TARGET}}\"";
const WS_PATH_SLOT: &str = "\"{{RELAY_WS_PATH}}\"";

/// Render the `<script>` element for a document served from `target_origin`.
/// Page-created WebSockets are sent to `prefix` + `websocket_path`.
pub fn bootstrap_script(prefix: &str, websocket_path: &str, target_origin: &str) -> String {
    let body = TEMPLATE
        .replace(PREFIX_SLOT, &js_string(prefix))
        .replace(WS_PATH_SLOT, &js_string(websocket_path))
        .replace(TARGET_SLOT, &js_string(target_origin));
    format!("<script>{}</script>", body.trim_end())
}

/// JSON string literal that is also safe inside an HTML script element.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| String::from("\"\""))
        .replace("</", "<\\/")
}
