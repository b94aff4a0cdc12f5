//! User-Agent classification by ordered substring matching
//!
//! Runs inline on the redirect path, so it is plain string scanning with no
//! regex engine or UA database. Order matters throughout: tablets before
//! phones, and specific browsers before the generic Chrome/Safari tokens they
//! embed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub browser: String,
    pub browser_version: Option<String>,
    pub os: String,
    pub os_version: Option<String>,
    pub is_bot: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Desktop,
            browser: UNKNOWN.to_string(),
            browser_version: None,
            os: UNKNOWN.to_string(),
            os_version: None,
            is_bot: false,
        }
    }
}

const UNKNOWN: &str = "Unknown";

/// Matched anywhere in the lowercased UA. Named crawlers are listed in full
/// because bare words like "bot" or "telegram" also appear in phone models
/// (CUBOT) and in-app browser tokens (Telegram-Android).
const BOT_SIGNATURES: &[&str] = &[
    "googlebot",
    "bingbot",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "applebot",
    "twitterbot",
    "linkedinbot",
    "slackbot",
    "discordbot",
    "telegrambot",
    "petalbot",
    "semrushbot",
    "ahrefsbot",
    "facebot",
    "bot/",
    "bot;",
    "+http",
    "crawler",
    "spider",
    "slurp",
    "facebookexternalhit",
    "facebookcatalog",
    "embedly",
    "quora link preview",
    "skypeuripreview",
    "headlesschrome",
    "phantomjs",
    "lighthouse",
    "pingdom",
    "uptimerobot",
    "curl/",
    "wget/",
    "python-requests",
    "go-http-client",
    "okhttp",
    "java/",
    "axios/",
    "node-fetch",
];

/// Link-preview fetchers that identify themselves only by a leading token
const BOT_PREFIXES: &[&str] = &["whatsapp/"];

/// (needle, browser name, version token). In-app browsers first, then engines
/// whose UA also carries "Chrome/" or "Safari/".
const BROWSER_PATTERNS: &[(&str, &str, &str)] = &[
    ("fban", "Facebook", "fbav/"),
    ("fbav/", "Facebook", "fbav/"),
    ("instagram", "Instagram", "instagram "),
    ("line/", "LINE", "line/"),
    ("snapchat", "Snapchat", "snapchat/"),
    ("bytedancewebview", "TikTok", "bytedancewebview/"),
    ("musical_ly", "TikTok", "musical_ly_"),
    ("linkedinapp", "LinkedIn", "linkedinapp/"),
    ("micromessenger", "WeChat", "micromessenger/"),
    ("edga/", "Edge", "edga/"),
    ("edgios/", "Edge", "edgios/"),
    ("edg/", "Edge", "edg/"),
    ("edge/", "Edge", "edge/"),
    ("opios/", "Opera", "opios/"),
    ("opr/", "Opera", "opr/"),
    ("opera mini", "Opera Mini", "opera mini/"),
    ("opera", "Opera", "version/"),
    ("samsungbrowser/", "Samsung Internet", "samsungbrowser/"),
    ("ucbrowser/", "UC Browser", "ucbrowser/"),
    ("yabrowser/", "Yandex", "yabrowser/"),
    ("vivaldi/", "Vivaldi", "vivaldi/"),
    ("crios/", "Chrome", "crios/"),
    ("fxios/", "Firefox", "fxios/"),
    ("firefox/", "Firefox", "firefox/"),
    ("chromium/", "Chromium", "chromium/"),
    ("chrome/", "Chrome", "chrome/"),
    ("msie ", "Internet Explorer", "msie "),
    ("trident/", "Internet Explorer", "rv:"),
];

pub fn is_bot(user_agent: &str) -> bool {
    matches_bot(&user_agent.trim().to_lowercase())
}

fn matches_bot(ua: &str) -> bool {
    BOT_SIGNATURES.iter().any(|sig| ua.contains(sig))
        || BOT_PREFIXES.iter().any(|prefix| ua.starts_with(prefix))
}

pub fn classify(user_agent: &str) -> DeviceInfo {
    let trimmed = user_agent.trim();
    if trimmed.is_empty() {
        return DeviceInfo::default();
    }

    let ua = trimmed.to_lowercase();
    let (browser, browser_version) = detect_browser(&ua);
    let (os, os_version) = detect_os(&ua);

    DeviceInfo {
        device_type: detect_device_type(&ua),
        browser,
        browser_version,
        os,
        os_version,
        is_bot: matches_bot(&ua),
    }
}

fn detect_device_type(ua: &str) -> DeviceType {
    // Android tablets omit the "Mobile" token that Android phones carry
    let android_tablet = ua.contains("android") && !ua.contains("mobile");
    if ua.contains("ipad")
        || ua.contains("tablet")
        || ua.contains("kindle")
        || ua.contains("silk/")
        || ua.contains("playbook")
        || android_tablet
    {
        return DeviceType::Tablet;
    }

    if ua.contains("mobi")
        || ua.contains("iphone")
        || ua.contains("ipod")
        || ua.contains("android")
        || ua.contains("windows phone")
        || ua.contains("blackberry")
        || ua.contains("opera mini")
    {
        return DeviceType::Mobile;
    }

    DeviceType::Desktop
}

fn detect_browser(ua: &str) -> (String, Option<String>) {
    for (needle, name, version_token) in BROWSER_PATTERNS {
        if ua.contains(needle) {
            return (name.to_string(), version_after(ua, version_token));
        }
    }

    // Safari proper only identifies itself through "Version/x Safari/y"
    if ua.contains("safari/") {
        return ("Safari".to_string(), version_after(ua, "version/"));
    }

    // iOS WebViews without a Safari token
    if ua.contains("applewebkit/") && (ua.contains("iphone") || ua.contains("ipad")) {
        return ("WebView".to_string(), None);
    }

    (UNKNOWN.to_string(), None)
}

fn detect_os(ua: &str) -> (String, Option<String>) {
    if ua.contains("windows phone") {
        return ("Windows Phone".to_string(), version_after(ua, "windows phone "));
    }

    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        let version = version_after(ua, "iphone os ").or_else(|| version_after(ua, "cpu os "));
        return ("iOS".to_string(), version);
    }

    if ua.contains("android") {
        return ("Android".to_string(), version_after(ua, "android "));
    }

    if ua.contains("cros ") {
        return ("Chrome OS".to_string(), None);
    }

    if ua.contains("windows nt") {
        let version = version_after(ua, "windows nt ").map(|nt| match nt.as_str() {
            "10.0" => "10".to_string(),
            "6.3" => "8.1".to_string(),
            "6.2" => "8".to_string(),
            "6.1" => "7".to_string(),
            _ => nt,
        });
        return ("Windows".to_string(), version);
    }

    if ua.contains("mac os x") || ua.contains("macintosh") {
        return ("macOS".to_string(), version_after(ua, "mac os x "));
    }

    if ua.contains("linux") {
        return ("Linux".to_string(), None);
    }

    (UNKNOWN.to_string(), None)
}

/// Version digits immediately following `token`, with `_` normalised to `.`
fn version_after(ua: &str, token: &str) -> Option<String> {
    let start = ua.find(token)? + token.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        .map(|c| if c == '_' { '.' } else { c })
        .collect();
    let version = version.trim_end_matches('.').to_string();

    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Mobile/15E148 Safari/604.1";
    const ANDROID_CHROME: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.82 Mobile Safari/537.36";
    const ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X710) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";
    const WINDOWS_EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.51";
    const SAMSUNG: &str = "Mozilla/5.0 (Linux; Android 13; SAMSUNG SM-S911B) AppleWebKit/537.36 (KHTML, like Gecko) SamsungBrowser/24.0 Chrome/117.0.0.0 Mobile Safari/537.36";
    const INSTAGRAM: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 Instagram 321.0.2.24.105";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";
    const MAC_FIREFOX: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0";
    const GOOGLEBOT: &str = "Mozilla/5.0 (Linux; Android 6.0.1; Nexus 5X Build/MMB29P) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.118 Mobile Safari/537.36 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

    #[test]
    fn test_iphone_safari() {
        let info = classify(IPHONE_SAFARI);
        assert_eq!(info.device_type, DeviceType::Mobile);
        assert_eq!(info.browser, "Safari");
        assert_eq!(info.browser_version.as_deref(), Some("17.4.1"));
        assert_eq!(info.os, "iOS");
        assert_eq!(info.os_version.as_deref(), Some("17.4.1"));
        assert!(!info.is_bot);
    }

    #[test]
    fn test_android_phone_and_tablet() {
        let phone = classify(ANDROID_CHROME);
        assert_eq!(phone.device_type, DeviceType::Mobile);
        assert_eq!(phone.browser, "Chrome");
        assert_eq!(phone.os, "Android");
        assert_eq!(phone.os_version.as_deref(), Some("14"));

        let tablet = classify(ANDROID_TABLET);
        assert_eq!(tablet.device_type, DeviceType::Tablet);
    }

    #[test]
    fn test_ipad_is_tablet() {
        let info = classify(IPAD);
        assert_eq!(info.device_type, DeviceType::Tablet);
        assert_eq!(info.os, "iOS");
        assert_eq!(info.os_version.as_deref(), Some("16.6"));
    }

    #[test]
    fn test_edge_not_chrome() {
        let info = classify(WINDOWS_EDGE);
        assert_eq!(info.browser, "Edge");
        assert_eq!(info.browser_version.as_deref(), Some("124.0.2478.51"));
        assert_eq!(info.os, "Windows");
        assert_eq!(info.os_version.as_deref(), Some("10"));
        assert_eq!(info.device_type, DeviceType::Desktop);
    }

    #[test]
    fn test_specific_browsers() {
        assert_eq!(classify(SAMSUNG).browser, "Samsung Internet");
        assert_eq!(classify(INSTAGRAM).browser, "Instagram");
        let firefox = classify(MAC_FIREFOX);
        assert_eq!(firefox.browser, "Firefox");
        assert_eq!(firefox.os, "macOS");
        assert_eq!(firefox.os_version.as_deref(), Some("14.4"));
    }

    #[test]
    fn test_bots() {
        assert!(classify(GOOGLEBOT).is_bot);
        assert!(is_bot("facebookexternalhit/1.1"));
        assert!(is_bot("curl/8.4.0"));
        assert!(!is_bot(IPHONE_SAFARI));
        assert!(is_bot("Mozilla/5.0 (compatible; bingbot/2.0; +http://www.bing.com/bingbot.htm)"));
        assert!(is_bot("TelegramBot (like TwitterBot)"));
        assert!(is_bot("WhatsApp/2.23.20.0 A"));
    }

    #[test]
    fn test_humans_with_bot_like_tokens() {
        let cubot = "Mozilla/5.0 (Linux; Android 11; CUBOT X50) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
        let info = classify(cubot);
        assert!(!info.is_bot);
        assert_eq!(info.device_type, DeviceType::Mobile);

        let telegram_in_app =
            format!("{ANDROID_CHROME} Telegram-Android/10.12.0 (Google Pixel 8; Android 14; SDK 34; HIGH)");
        assert!(!classify(&telegram_in_app).is_bot);
        assert!(!is_bot(&format!("{IPHONE_SAFARI} WhatsApp/2.24.1")));
        assert!(!is_bot(ANDROID_CHROME));
    }

    #[test]
    fn test_empty_user_agent_defaults() {
        let info = classify("   ");
        assert_eq!(info, DeviceInfo::default());
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert!(!info.is_bot);
    }
}
