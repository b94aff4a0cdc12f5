use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use mime_guess::from_path;
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets"]
pub struct BridgeAssets;

const BRIDGE_PAGE: &str = "bridge.html";
const CONFIG_PLACEHOLDER: &str = "\"__BRIDGE_CONFIG__\"";

/// Values the bridge page script needs, inlined as a JSON object
#[derive(Debug, serde::Serialize)]
pub struct BridgeConfig<'a> {
    /// `{api_prefix}/{code}`; display data lives here, tracking under `/track`
    pub api_base: &'a str,
    pub event_id: &'a str,
    pub default_url: &'a str,
}

/// JSON safe to drop inside a `<script>` element
fn script_json(config: &BridgeConfig<'_>) -> Option<String> {
    serde_json::to_string(config)
        .ok()
        .map(|json| json.replace('<', "\\u003c").replace('>', "\\u003e"))
}

/// Embedded bridge page with its config inlined
pub fn render_bridge(config: &BridgeConfig<'_>) -> Response {
    let page = BridgeAssets::get(BRIDGE_PAGE)
        .and_then(|file| String::from_utf8(file.data.into_owned()).ok());

    let (Some(page), Some(json)) = (page, script_json(config)) else {
        tracing::error!("bridge page asset missing from build");
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("404 Not Found"))
            .unwrap_or_default();
    };

    let mime = from_path(BRIDGE_PAGE).first_or_octet_stream();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(page.replace(CONFIG_PLACEHOLDER, &json)))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_json_escapes_markup() {
        let config = BridgeConfig {
            api_base: "/api/q/</script><script>alert(1)",
            event_id: "00112233445566778899aabbccddeeff",
            default_url: "https://example.com/",
        };
        let json = script_json(&config).unwrap();
        assert!(!json.contains("</script>"));
        assert!(json.contains("\\u003c/script\\u003e"));
    }

    #[test]
    fn test_bridge_page_embeds_placeholder() {
        let page = BridgeAssets::get(BRIDGE_PAGE).unwrap();
        let text = std::str::from_utf8(&page.data).unwrap();
        assert!(text.contains(CONFIG_PLACEHOLDER));
    }
}
