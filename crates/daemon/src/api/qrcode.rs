//! `/qrcode` — the mobile-pairing payload, rendered as ASCII or SVG
//! (spec §6 "QR pairing payload", §4.5 endpoint table).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use qrcode::render::unicode;
use qrcode::QrCode;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QrcodeQuery {
    #[serde(default = "default_format")]
    pub format: String,
    /// Optional human-readable label for the pairing device, folded into
    /// the payload but not otherwise interpreted.
    pub nickname: Option<String>,
}

fn default_format() -> String {
    "ascii".into()
}

/// Builds the `muxd://<host>:<port>?token=<token>&nickname=<nickname>`
/// pairing URL a mobile client scans to connect.
fn pairing_url(state: &AppState, nickname: Option<&str>) -> String {
    let (host, port) = &state.bound_addr;
    let mut url = format!("muxd://{host}:{port}?token={}", state.connection_token);
    if let Some(nick) = nickname {
        url.push_str("&nickname=");
        url.push_str(&urlencoding_escape(nick));
    }
    url
}

/// Minimal percent-encoding for the nickname query param; avoids pulling
/// in a full URL crate for one field.
fn urlencoding_escape(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') { c.to_string() } else { format!("%{:02X}", c as u32) })
        .collect()
}

pub async fn qrcode(State(state): State<AppState>, Query(query): Query<QrcodeQuery>) -> impl IntoResponse {
    let payload = pairing_url(&state, query.nickname.as_deref());

    let code = match QrCode::new(payload.as_bytes()) {
        Ok(c) => c,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode QR code: {e}")).into_response(),
    };

    match query.format.as_str() {
        "ascii" => {
            let art = code.render::<unicode::Dense1x2>().quiet_zone(true).build();
            (StatusCode::OK, [("content-type", "text/plain; charset=utf-8")], art).into_response()
        }
        "svg" => {
            let svg = code.render::<qrcode::render::svg::Color>().min_dimensions(256, 256).build();
            (StatusCode::OK, [("content-type", "image/svg+xml")], svg).into_response()
        }
        other => (StatusCode::BAD_REQUEST, format!("unsupported format '{other}', expected 'ascii' or 'svg'")).into_response(),
    }
}
