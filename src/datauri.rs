use base64::Engine;
use base64::engine::general_purpose;
use percent_encoding::percent_decode_str;

use crate::error::ExtractError;

pub(crate) fn is_svg_data_uri(value: &str) -> bool {
    value
        .trim_start()
        .get(..18)
        .map(|head| head.eq_ignore_ascii_case("data:image/svg+xml"))
        .unwrap_or(false)
}

// `;base64` selects base64; anything else is percent-decoded.
pub fn decode_svg_data_uri(uri: &str) -> Result<String, ExtractError> {
    let uri = uri.trim();
    if !is_svg_data_uri(uri) {
        return Err(ExtractError::Decode("not an svg data uri".to_string()));
    }
    let Some((header, payload)) = uri.split_once(',') else {
        return Err(ExtractError::Decode("data uri without payload".to_string()));
    };
    let is_base64 = header
        .split(';')
        .any(|part| part.trim().eq_ignore_ascii_case("base64"));

    if is_base64 {
        let unescaped = percent_decode_str(payload).decode_utf8_lossy();
        let compact: String = unescaped.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = general_purpose::STANDARD
            .decode(compact.as_bytes())
            .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(compact.as_bytes()))
            .or_else(|_| general_purpose::URL_SAFE.decode(compact.as_bytes()))
            .map_err(|err| ExtractError::Decode(format!("base64: {err}")))?;
        String::from_utf8(bytes).map_err(|err| ExtractError::Decode(format!("utf-8: {err}")))
    } else {
        percent_decode_str(payload)
            .decode_utf8()
            .map(|text| text.into_owned())
            .map_err(|err| ExtractError::Decode(format!("utf-8: {err}")))
    }
}
