//! Cleanup of decoded text before it leaves the engine.

use unicode_normalization::UnicodeNormalization;

const ZERO_WIDTH: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationForm {
    #[default]
    Nfc,
    Nfkc,
    Nfd,
    Nfkd,
    None,
}

/// Options for [`post_process`]. The defaults match what the recognition
/// engine applies when a language is configured.
#[derive(Debug, Clone)]
pub struct PostProcessOptions {
    pub normalization: NormalizationForm,
    pub remove_zero_width: bool,
    pub remove_control_chars: bool,
    /// Explicit rewrites; when empty, the language hint selects a default
    /// typographic map.
    pub replacements: Vec<(String, String)>,
    pub language: String,
    pub collapse_whitespace: bool,
    pub trim: bool,
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self {
            normalization: NormalizationForm::Nfc,
            remove_zero_width: true,
            remove_control_chars: true,
            replacements: Vec::new(),
            language: String::new(),
            collapse_whitespace: true,
            trim: true,
        }
    }
}

impl PostProcessOptions {
    pub fn for_language(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }
}

pub fn post_process(text: &str, options: &PostProcessOptions) -> String {
    let mut out = match options.normalization {
        NormalizationForm::Nfc => text.nfc().collect::<String>(),
        NormalizationForm::Nfkc => text.nfkc().collect(),
        NormalizationForm::Nfd => text.nfd().collect(),
        NormalizationForm::Nfkd => text.nfkd().collect(),
        NormalizationForm::None => text.to_string(),
    };

    if options.remove_zero_width {
        out.retain(|c| !ZERO_WIDTH.contains(&c));
    }

    if options.remove_control_chars {
        out.retain(|c| !is_stripped_control(c));
    }

    let replacements;
    let map: &[(String, String)] = if options.replacements.is_empty() {
        replacements = default_replacements(&options.language);
        &replacements
    } else {
        &options.replacements
    };
    // Longer keys first so "--" wins over "-".
    let mut ordered: Vec<&(String, String)> = map.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    for (from, to) in ordered {
        if out.contains(from.as_str()) {
            out = out.replace(from.as_str(), to);
        }
    }

    if options.collapse_whitespace {
        out = collapse_whitespace(&out);
    }
    if options.trim {
        out = out.trim().to_string();
    }
    out
}

fn is_stripped_control(c: char) -> bool {
    if matches!(c, '\n' | '\r' | '\t') {
        return false;
    }
    // Cc plus the common Cf formatting characters OCR output picks up.
    c.is_control()
        || matches!(c,
            '\u{00AD}'
            | '\u{200E}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FFF9}'..='\u{FFFB}')
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Typographic rewrites applied when no explicit map is configured.
fn default_replacements(language: &str) -> Vec<(String, String)> {
    let mut map: Vec<(&str, &str)> = vec![
        ("\u{2018}", "'"),
        ("\u{2019}", "'"),
        ("\u{201C}", "\""),
        ("\u{201D}", "\""),
        ("\u{2013}", "-"),
        ("\u{2014}", "-"),
        ("\u{00A0}", " "),
        ("\u{2009}", " "),
    ];
    match language {
        "de" => {
            map.push(("\u{201E}", "\""));
            map.push(("\u{201A}", "'"));
        }
        "fr" => {
            // Guillemets carry their padding spaces.
            map.push(("\u{00AB}\u{00A0}", "\""));
            map.push(("\u{00A0}\u{00BB}", "\""));
            map.push(("\u{00AB}", "\""));
            map.push(("\u{00BB}", "\""));
        }
        _ => {}
    }
    map.into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

/// Whether a decoded string is plausible recognizer output.
///
/// Empty text passes; otherwise control characters must stay below 5% and
/// letters plus digits above 30% of all characters.
pub fn validate_text(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    let mut total = 0usize;
    let mut controls = 0usize;
    let mut alnum = 0usize;
    for c in text.chars() {
        total += 1;
        if c.is_control() {
            controls += 1;
        }
        if c.is_alphanumeric() {
            alnum += 1;
        }
    }
    let total = total as f64;
    (controls as f64) / total < 0.05 && (alnum as f64) / total > 0.3
}

const DE_MARKS: &str = "äöüßÄÖÜ";
const FR_MARKS: &str = "èêàùçâîôûëïœÈÊÀÙÇ";
const ES_MARKS: &str = "áíóúñ¿¡ÁÍÓÚÑ";

/// Best-effort language guess over decoded text; diagnostic only.
pub fn detect_language(text: &str) -> &'static str {
    let mut letters = 0usize;
    let mut ascii_letters = 0usize;
    let mut de = 0usize;
    let mut fr = 0usize;
    let mut es = 0usize;

    for c in text.chars() {
        if c.is_alphabetic() {
            letters += 1;
            if c.is_ascii_alphabetic() {
                ascii_letters += 1;
            }
        }
        if DE_MARKS.contains(c) {
            de += 1;
        }
        if FR_MARKS.contains(c) {
            fr += 1;
        }
        if ES_MARKS.contains(c) {
            es += 1;
        }
    }

    if de > fr && de > es {
        return "de";
    }
    if fr > de && fr > es {
        return "fr";
    }
    if es > de && es > fr {
        return "es";
    }
    if letters > 0 && ascii_letters * 5 > letters * 4 {
        return "en";
    }
    ""
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_cleans_ocr_noise() {
        // S7
        let input = "\u{FEFF}  Hello\tWorld\u{200B}!  ";
        let options = PostProcessOptions::for_language("en");
        assert_eq!(post_process(input, &options), "Hello World!");
    }

    #[test]
    fn zero_width_characters_are_removed() {
        let options = PostProcessOptions::default();
        let out = post_process("a\u{200B}b\u{200C}c\u{200D}d\u{FEFF}e", &options);
        assert_eq!(out, "abcde");
        assert!(!out.chars().any(|c| ZERO_WIDTH.contains(&c)));
    }

    #[test]
    fn control_characters_are_removed_except_layout() {
        let options = PostProcessOptions {
            collapse_whitespace: false,
            trim: false,
            ..Default::default()
        };
        let out = post_process("a\u{0007}b\nc\td\u{007F}", &options);
        assert_eq!(out, "ab\nc\td");
    }

    #[test]
    fn typographic_defaults_for_english() {
        let options = PostProcessOptions::for_language("en");
        let out = post_process("\u{201C}It\u{2019}s\u{201D} \u{2014} fine", &options);
        assert_eq!(out, "\"It's\" - fine");
    }

    #[test]
    fn german_quotes_are_rewritten() {
        let options = PostProcessOptions::for_language("de");
        assert_eq!(post_process("\u{201E}Hallo\u{201C}", &options), "\"Hallo\"");
    }

    #[test]
    fn french_guillemets_keep_no_padding() {
        let options = PostProcessOptions::for_language("fr");
        assert_eq!(
            post_process("\u{00AB}\u{00A0}Bonjour\u{00A0}\u{00BB}", &options),
            "\"Bonjour\""
        );
    }

    #[test]
    fn explicit_replacements_apply_longest_first() {
        let options = PostProcessOptions {
            replacements: vec![
                ("-".to_string(), "_".to_string()),
                ("--".to_string(), "=".to_string()),
            ],
            ..Default::default()
        };
        assert_eq!(post_process("a--b-c", &options), "a=b_c");
    }

    #[test]
    fn whitespace_runs_collapse_to_single_space() {
        let options = PostProcessOptions::default();
        let out = post_process("a  b\t\tc \n d", &options);
        assert_eq!(out, "a b c d");
        assert!(!out.contains("  "));
    }

    #[test]
    fn normalization_forms() {
        // Decomposed e + combining acute recomposes under NFC.
        let decomposed = "e\u{0301}";
        let nfc = post_process(decomposed, &PostProcessOptions::default());
        assert_eq!(nfc, "\u{00E9}");

        let none = PostProcessOptions {
            normalization: NormalizationForm::None,
            ..Default::default()
        };
        assert_eq!(post_process(decomposed, &none), decomposed);
    }

    #[test]
    fn validate_accepts_clean_ascii() {
        assert!(validate_text(""));
        assert!(validate_text("Hello World 123"));
        assert!(validate_text(&post_process("  any ascii text!  ", &PostProcessOptions::default())));
    }

    #[test]
    fn validate_rejects_garbage() {
        assert!(!validate_text("....!!!???"));
        let noisy: String = std::iter::repeat('\u{0007}').take(10).chain("ab".chars()).collect();
        assert!(!validate_text(&noisy));
    }

    #[test]
    fn language_detection_rules() {
        assert_eq!(detect_language("Straße über Köln"), "de");
        assert_eq!(detect_language("être à côté"), "fr");
        assert_eq!(detect_language("mañana señor ¿qué?"), "es");
        assert_eq!(detect_language("plain english text"), "en");
        assert_eq!(detect_language(""), "");
        assert_eq!(detect_language("12345 !!!"), "");
    }
}
