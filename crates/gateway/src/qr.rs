/// Terminal rendering of pairing challenges.
use qrcode::{QrCode, render::unicode};

/// Render `payload` as a QR code made of half-block characters, light on
/// dark so it scans from a dark terminal.
pub fn render_terminal(payload: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(payload.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
