//! Pattern rules over raw OCR text: technician line, ticket number, date, legal text.
//!
//! Every extractor returns `None`/`false` on no match. The technician line is
//! cleaned first so the same rules apply whichever OCR backend produced it.

use std::sync::LazyLock;

use regex::Regex;

/// Compliance phrase printed on the ticket variant that requires a signature.
pub const LEGAL_PHRASE: &str = "I have reviewed this form";

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

// "by John D Technician", with an optional "Ld" token before the role.
static BY_NAME_ROLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)by\s+([a-z][a-z]+)\s+([a-z])\s+(?:ld\s+)?([a-z][a-z]+)").unwrap()
});
// "by John DTechnician": initial run into the role.
static BY_NAME_JOINED_ROLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)by\s+([a-z][a-z]+)\s+([a-z])([a-z][a-z]+)").unwrap()
});
// "by John D": role missing or garbled.
static BY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)by\s+([a-z][a-z]+)\s+([a-z])").unwrap());

static TICKET_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#([0-9]{5,7})").unwrap());
static TICKET_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{1,2}/[0-9]{1,2}/[0-9]{2}").unwrap());

/// Technician read off the "by ..." line, before roster normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicianMatch {
    /// "FirstName LastInitial", title-cased first name and upper-cased initial.
    pub name: String,
    /// Role token as matched, not normalised.
    pub role: Option<String>,
}

/// Undo common OCR artifacts before pattern matching.
///
/// Pipes become `I`, slashes are dropped, other punctuation becomes a space,
/// and whitespace runs collapse to a single space.
pub fn clean_ocr_text(text: &str) -> String {
    let text = text.replace('|', "I").replace(['/', '\\'], "");
    let text = NON_WORD.replace_all(&text, " ");
    WHITESPACE.replace_all(&text, " ").into_owned()
}

/// Extract the technician name and role from a "by <Name> <Initial> <Role>" line.
pub fn extract_technician(text: &str) -> Option<TechnicianMatch> {
    let text = clean_ocr_text(text);

    for pattern in [&*BY_NAME_ROLE, &*BY_NAME_JOINED_ROLE] {
        if let Some(caps) = pattern.captures(&text) {
            return Some(TechnicianMatch {
                name: canonical_form(&caps[1], &caps[2]),
                role: Some(caps[3].to_string()),
            });
        }
    }

    BY_NAME.captures(&text).map(|caps| TechnicianMatch {
        name: canonical_form(&caps[1], &caps[2]),
        role: None,
    })
}

/// First run of 5-7 digits directly after `#`.
pub fn extract_ticket_number(text: &str) -> Option<String> {
    TICKET_NUMBER.captures(text).map(|caps| caps[1].to_string())
}

/// First `M/D/YY`-shaped token, unvalidated.
pub fn extract_date(text: &str) -> Option<String> {
    TICKET_DATE.find(text).map(|m| m.as_str().to_string())
}

/// Case-sensitive check for [`LEGAL_PHRASE`] on full-page text.
pub fn has_legal_text(text: &str) -> bool {
    text.contains(LEGAL_PHRASE)
}

fn canonical_form(first: &str, initial: &str) -> String {
    format!("{} {}", title_case(first), initial.to_uppercase())
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
