//! Pairing-payload rendering: opaque payload in, displayable artifact out.

use base64::Engine;
use cw_domain::{Error, Result};
use qrcode::{render::svg, QrCode};

/// Render a pairing payload as an SVG QR code.
pub fn render_qr_svg(payload: &str) -> Result<String> {
    let svg = QrCode::new(payload)
        .map_err(|e| Error::Other(format!("QR encoding failed: {e}")))?
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(svg)
}

/// Render a pairing payload as a `data:` URL suitable for an `<img>` tag.
pub fn render_data_url(payload: &str) -> Result<String> {
    let svg = render_qr_svg(payload)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(svg.as_bytes());
    Ok(format!("data:image/svg+xml;base64,{encoded}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn svg_renders_for_a_typical_payload() {
        let svg = render_qr_svg("2@AbCdEf123456,KeyMaterial==,MoreMaterial==").unwrap();
        assert!(svg.starts_with("<?xml") || svg.starts_with("<svg"));
        assert!(svg.contains("svg"));
    }

    #[test]
    fn data_url_round_trips_to_the_svg() {
        let payload = "cw-pair:acct:1234";
        let url = render_data_url(payload).unwrap();
        let b64 = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(String::from_utf8(svg).unwrap(), render_qr_svg(payload).unwrap());
    }

    #[test]
    fn long_payload_still_encodes() {
        let payload = "cw-pair:".repeat(64);
        assert!(render_qr_svg(&payload).is_ok());
    }
}
