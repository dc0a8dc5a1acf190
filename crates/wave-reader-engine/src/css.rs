//! CSS fragment template for one waving element.

use wave_reader_core::{ElementId, Settings};

use crate::WaveParams;

/// Attribute the host stamps on matched elements so rules can target them.
pub const ELEMENT_ATTRIBUTE: &str = "data-wave-reader-id";

const ROTATION_VAR: &str = "--wave-rotation:";
const TRANSLATION_VAR: &str = "--wave-translation:";

/// Render the rule for one element, values printed to 2 decimals.
#[must_use]
pub fn render_fragment(element: ElementId, params: WaveParams, settings: &Settings) -> String {
    let rotation = params.rotation_deg;
    let translation = params.translate_pct;
    format!(
        "[{ELEMENT_ATTRIBUTE}=\"{element}\"] {{ \
         {ROTATION_VAR} {rotation:.2}deg; \
         {TRANSLATION_VAR} {translation:.2}%; \
         --wave-color: {color}; \
         --wave-opacity: {opacity:.2}; \
         transform: translateX({translation:.2}%) rotate({rotation:.2}deg); \
         transition: transform {speed}ms ease-in-out; }}",
        color = sanitize_color(&settings.wave_color),
        opacity = settings.opacity,
        speed = settings.wave_speed_ms,
    )
}

/// Extract the transform parameters from a rendered rule.
#[must_use]
pub fn parse_fragment(css: &str) -> Option<WaveParams> {
    Some(WaveParams {
        rotation_deg: read_var(css, ROTATION_VAR, "deg")?,
        translate_pct: read_var(css, TRANSLATION_VAR, "%")?,
    })
}

fn read_var(css: &str, var: &str, unit: &str) -> Option<f64> {
    let (_, rest) = css.split_once(var)?;
    let (value, _) = rest.split_once(';')?;
    value.trim().strip_suffix(unit)?.parse().ok()
}

/// Keep a color value from breaking out of its declaration.
fn sanitize_color(color: &str) -> &str {
    let safe = !color.is_empty()
        && color
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '(' | ')' | ',' | '.' | '%' | ' ' | '-'));
    if safe { color } else { "currentColor" }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_fragment_targets_element() {
        let css = render_fragment(
            7,
            WaveParams { rotation_deg: -12.345, translate_pct: 3.0 },
            &Settings::default(),
        );
        assert!(css.starts_with("[data-wave-reader-id=\"7\"]"));
        assert!(css.contains("rotate(-12.35deg)") || css.contains("rotate(-12.34deg)"));
        assert!(css.contains("translateX(3.00%)"));
        assert!(css.contains("transition: transform 2000ms"));
    }

    #[test]
    fn test_hostile_color_replaced() {
        let settings = Settings {
            wave_color: "red; } body { display: none".to_string(),
            ..Settings::default()
        };
        let css = render_fragment(1, WaveParams::default(), &settings);
        assert!(css.contains("--wave-color: currentColor;"));
        assert!(!css.contains("display"));
    }

    #[test]
    fn test_parse_rejects_foreign_css() {
        assert!(parse_fragment("p { color: red; }").is_none());
    }

    proptest! {
        #[test]
        fn fragment_reproduces_params(
            rotation in -180.0f64..=180.0,
            translation in 0.0f64..=10.0,
        ) {
            let params = WaveParams { rotation_deg: rotation, translate_pct: translation };
            let css = render_fragment(1, params, &Settings::default());
            let parsed = parse_fragment(&css).expect("rendered fragment parses");
            prop_assert!((parsed.rotation_deg - rotation).abs() <= 0.005 + 1e-9);
            prop_assert!((parsed.translate_pct - translation).abs() <= 0.005 + 1e-9);
        }
    }
}
